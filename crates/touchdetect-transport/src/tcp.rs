//! TCP 传输（WSG 夹爪）

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use crate::{ByteTransport, TransportError};

/// 读超时下限（`TcpStream` 不接受零超时）
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// TCP 传输
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpTransport {
    /// 连接到 `host:port`
    ///
    /// 依次尝试解析出的每个地址，返回第一个连接成功的。
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream, timeout),
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                },
            }
        }

        Err(TransportError::Io(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address resolved for {host}:{port}"),
            )
        })))
    }

    /// 包装已连接的流
    pub fn from_stream(stream: TcpStream, read_timeout: Duration) -> Result<Self, TransportError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(read_timeout.max(MIN_READ_TIMEOUT)))?;
        debug!("Connected to {}", peer);
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl ByteTransport for TcpTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        trace!("{} TX {} bytes", self.peer, data.len());
        self.stream.write_all(data)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(buf)? {
            0 => Err(TransportError::Closed),
            n => Ok(n),
        }
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.stream.set_nonblocking(true)?;
        let mut scratch = [0u8; 256];
        let result = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break Err(TransportError::Closed),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e.into()),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.stream
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_loopback_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, Duration::from_millis(500)).unwrap();
        transport.write_all(b"ping").unwrap();

        let mut buf = [0u8; 4];
        let mut received = 0;
        while received < 4 {
            received += transport.read(&mut buf[received..]).unwrap();
        }
        assert_eq!(&buf, b"ping");
        server.join().unwrap();

        // 服务端关闭后读到 EOF
        assert!(matches!(transport.read(&mut buf), Err(TransportError::Closed)));
    }

    #[test]
    fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut transport =
            TcpTransport::connect("127.0.0.1", port, Duration::from_millis(20)).unwrap();
        let (_socket, _) = listener.accept().unwrap();

        let mut buf = [0u8; 4];
        assert!(transport.read(&mut buf).unwrap_err().is_timeout());
        assert_eq!(transport.try_read(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_connect_refused() {
        // 绑定后立即释放，端口大概率无人监听
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert!(TcpTransport::connect("127.0.0.1", port, Duration::from_millis(200)).is_err());
    }
}

//! # TouchDetect Transport Layer
//!
//! 字节流传输抽象。协议层只处理字节，具体从哪里读写由这里决定：
//!
//! - [`SerialTransport`]: 串口（CAN 适配器、HDLC 串口设备）
//! - [`TcpTransport`]: TCP（WSG 夹爪）
//! - [`MockTransport`]: 内存中的脚本化传输（feature `mock`，用于测试）

use std::io;
use std::time::Duration;

use thiserror::Error;

pub mod serial;
pub mod tcp;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use serial::{SerialTransport, find_ports};
pub use tcp::TcpTransport;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockTransport;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[source] io::Error),
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("Transport closed")]
    Closed,
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl From<io::Error> for TransportError {
    /// 读超时在不同平台上表现为 `TimedOut` 或 `WouldBlock`，统一映射为 `Timeout`
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(e),
        }
    }
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// 双向字节传输
///
/// 实现需要是 `Send`，以便移动到设备的工作线程中。
pub trait ByteTransport: Send {
    /// 写入全部数据
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// 读取数据
    ///
    /// 在读超时内没有任何数据时返回 [`TransportError::Timeout`]；
    /// 对端关闭时返回 [`TransportError::Closed`]。
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// 丢弃尚未读取的输入
    fn clear_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// 读取，超时返回 `Ok(None)`
    fn try_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        match self.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(TransportError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 关闭传输
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: ByteTransport + ?Sized> ByteTransport for Box<T> {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        (**self).clear_input()
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        (**self).set_read_timeout(timeout)
    }

    fn try_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        (**self).try_read(buf)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}

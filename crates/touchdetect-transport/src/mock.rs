//! Mock 传输
//!
//! 内存中的字节队列，克隆出的句柄共享同一状态：
//! 测试代码保留一个句柄注入数据、检查写出的字节，另一个句柄交给工作线程。

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::{ByteTransport, TransportError};

/// Mock 读超时上限，避免测试中的轮询循环空转太久
const MAX_MOCK_WAIT: Duration = Duration::from_millis(5);

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    writes: usize,
    closed: bool,
    fail_writes: bool,
    read_timeout: Duration,
    responder: Option<Responder>,
}

/// 脚本化的内存传输
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("rx_pending", &state.rx.len())
            .field("tx_len", &state.tx.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注入待读取的数据
    pub fn inject(&self, data: &[u8]) {
        self.state.lock().rx.extend(data.iter().copied());
    }

    /// 取出目前为止写出的所有字节
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().tx)
    }

    /// 写操作次数
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn pending_rx(&self) -> usize {
        self.state.lock().rx.len()
    }

    /// 模拟对端断开：之后的读写都返回 `Closed`
    pub fn close_remote(&self) {
        self.state.lock().closed = true;
    }

    /// 之后的写操作返回 IO 错误
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// 设置应答函数：每次写入后调用，返回值追加到读队列
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }
}

impl ByteTransport for MockTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.fail_writes {
            return Err(TransportError::Io(std::io::Error::other("mock write failure")));
        }

        state.writes += 1;
        state.tx.extend_from_slice(data);
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(data);
            state.rx.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let wait = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            if !state.rx.is_empty() {
                let n = buf.len().min(state.rx.len());
                for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            state.read_timeout.min(MAX_MOCK_WAIT)
        };

        // 锁外等待，让注入方有机会写入
        thread::sleep(wait);
        Err(TransportError::Timeout)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.state.lock().rx.clear();
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.state.lock().read_timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_and_read() {
        let handle = MockTransport::new();
        let mut transport = handle.clone();
        handle.inject(&[1, 2, 3, 4, 5]);

        let mut buf = [0u8; 3];
        assert_eq!(transport.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert!(transport.read(&mut buf).unwrap_err().is_timeout());
    }

    #[test]
    fn test_responder() {
        let handle = MockTransport::new();
        let mut transport = handle.clone();
        handle.set_responder(|req| req.iter().rev().copied().collect());

        transport.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(handle.take_written(), vec![1, 2, 3]);
        assert_eq!(handle.write_count(), 1);

        let mut buf = [0u8; 8];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[3, 2, 1]);
    }

    #[test]
    fn test_clear_and_close() {
        let handle = MockTransport::new();
        let mut transport = handle.clone();
        handle.inject(&[9; 10]);
        transport.clear_input().unwrap();
        assert_eq!(handle.pending_rx(), 0);

        handle.close_remote();
        let mut buf = [0u8; 1];
        assert!(matches!(transport.read(&mut buf), Err(TransportError::Closed)));
        assert!(matches!(transport.write_all(&[0]), Err(TransportError::Closed)));
    }

    #[test]
    fn test_fail_writes() {
        let handle = MockTransport::new();
        let mut transport = handle.clone();
        handle.fail_writes(true);
        assert!(matches!(transport.write_all(&[0]), Err(TransportError::Io(_))));
        handle.fail_writes(false);
        assert!(transport.write_all(&[0]).is_ok());
    }
}

//! WSG 夹爪 TCP 帧编解码
//!
//! 帧格式（请求与响应相同）：
//!
//! ```text
//! transaction_id (2) | protocol_id (2) | length (2, LE) | payload (length) | crc16 (2, LE)
//! ```
//!
//! CRC 覆盖 CRC 字段之前的全部字节，初值 `0xFFFF`，先算帧头再算负载。
//!
//! 注意：解码时**不**校验 CRC。

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::ProtocolError;
use crate::crc::{CRC16_SEED, Crc16};

/// 事务 ID
pub const TRANSACTION_ID: [u8; 2] = [0xAA, 0xAA];
/// 默认协议 ID
pub const DEFAULT_PROTOCOL_ID: [u8; 2] = [0xAA, 0xBB];
/// 帧头长度（TID + PID + length）
pub const HEADER_LEN: usize = 6;
/// CRC 长度
pub const CRC_LEN: usize = 2;
/// 最小响应长度
pub const RESPONSE_MIN_LEN: usize = 9;
/// 夹爪默认 TCP 端口
pub const DEFAULT_TCP_PORT: u16 = 1000;

/// 夹爪手指（传感器命令）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SensorSide {
    Left = 0x01,
    Right = 0x02,
}

/// WSG 帧编解码器
///
/// 协议 ID 可配置，事务 ID 固定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsgCodec {
    protocol_id: [u8; 2],
}

impl Default for WsgCodec {
    fn default() -> Self {
        Self {
            protocol_id: DEFAULT_PROTOCOL_ID,
        }
    }
}

impl WsgCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocol_id(protocol_id: [u8; 2]) -> Self {
        Self { protocol_id }
    }

    pub fn protocol_id(&self) -> [u8; 2] {
        self.protocol_id
    }

    /// 构造一帧
    ///
    /// 负载超过 65535 字节时返回错误（长度字段只有 16 位）。
    ///
    /// # Example
    ///
    /// ```
    /// use touchdetect_protocol::wsg::WsgCodec;
    ///
    /// let frame = WsgCodec::default().make_frame(b"test").unwrap();
    /// assert_eq!(frame, [0xAA, 0xAA, 0xAA, 0xBB, 0x04, 0x00, b't', b'e', b's', b't', 0x2E, 0xDD]);
    /// ```
    pub fn make_frame(&self, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let len = u16::try_from(payload.len()).map_err(|_| ProtocolError::InvalidLength {
            expected: u16::MAX as usize,
            actual: payload.len(),
        })?;

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
        frame.extend_from_slice(&TRANSACTION_ID);
        frame.extend_from_slice(&self.protocol_id);
        frame.extend_from_slice(&len.to_le_bytes());

        let crc = Crc16::with_seed(CRC16_SEED).update(&frame).update(payload).value();

        frame.extend_from_slice(payload);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// 读取某一侧传感器的请求帧
    pub fn read_request(&self, side: SensorSide) -> Vec<u8> {
        let command = [u8::from(side)];
        // 单字节负载不会超过长度上限
        self.make_frame(&command).unwrap_or_default()
    }

    /// 解码一帧，返回负载
    ///
    /// 以下情况返回 `None`：
    /// - 帧短于 [`RESPONSE_MIN_LEN`]
    /// - 事务 ID 或协议 ID 不匹配
    /// - 声明的负载长度超过实际可用字节
    pub fn decode_frame<'a>(&self, frame: &'a [u8]) -> Option<&'a [u8]> {
        if frame.len() < RESPONSE_MIN_LEN {
            return None;
        }
        if frame[..2] != TRANSACTION_ID || frame[2..4] != self.protocol_id {
            return None;
        }

        let len = u16::from_le_bytes([frame[4], frame[5]]) as usize;
        frame.get(HEADER_LEN..HEADER_LEN + len)
    }

    /// 根据帧头计算完整帧长度
    ///
    /// 帧头不足 6 字节或 ID 不匹配时返回 `None`。
    pub fn expected_frame_len(&self, header: &[u8]) -> Option<usize> {
        if header.len() < HEADER_LEN
            || header[..2] != TRANSACTION_ID
            || header[2..4] != self.protocol_id
        {
            return None;
        }
        let len = u16::from_le_bytes([header[4], header[5]]) as usize;
        Some(HEADER_LEN + len + CRC_LEN)
    }
}

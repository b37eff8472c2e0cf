//! HDLC 帧处理（串口 TouchDetect）
//!
//! 帧格式：
//!
//! ```text
//! 0x7E | address | control | payload... | fcs (2, LE) | 0x7E
//! ```
//!
//! - 起始和结束标志相同（`0x7E`）
//! - 两个标志之间的内容做字节填充：`0x7E`/`0x7D` 写成 `0x7D, byte ^ 0x20`
//! - FCS 为 [`crate::crc::checksum`] 对 `address | control | payload`（未转义）的计算结果
//!
//! 本模块分两部分：
//! - [`extract_frames`]: 从原始字节流中切出完整的定界帧（容错，不报错）
//! - [`encode_frame`] / [`decode_frame`]: 单帧的编解码

use bytes::{Buf, Bytes, BytesMut};
use num_enum::TryFromPrimitive;
use tracing::{debug, warn};

use crate::ProtocolError;
use crate::crc::{CRC16_SEED, checksum};

/// 帧起始/结束标志
pub const FRAME_DELIMITER: u8 = 0x7E;
/// 转义字节
pub const ESCAPE_BYTE: u8 = 0x7D;
/// 转义异或值
pub const ESCAPE_XOR: u8 = 0x20;
/// 设备地址
pub const DEVICE_ADDRESS: u8 = 0xFF;
/// 最小可用帧长度（`7E addr ctrl fcs fcs 7E`）
pub const MIN_FRAME_LEN: usize = 6;
/// 读取传感器数据命令
pub const COMMAND_GET_DATA: u8 = 0x01;
/// 数据请求帧序号
pub const REQUEST_SEQ: u8 = 1;
/// ACK 回复帧序号
pub const ACK_REPLY_SEQ: u8 = 5;
/// 提取缓冲区上限，超过后丢弃（噪声链路上只有起始标志没有结束标志的情况）
pub const MAX_BUFFER_LEN: usize = 4096;

// control 字段位定义
const CONTROL_S_OR_U_FRAME_BIT: u8 = 0;
const CONTROL_SEND_SEQ_NO_BIT: u8 = 1;
const CONTROL_S_FRAME_TYPE_BIT: u8 = 2;
const CONTROL_POLL_BIT: u8 = 4;
const CONTROL_RECV_SEQ_NO_BIT: u8 = 5;

/// S 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum SupervisoryType {
    ReceiveReady = 0,
    ReceiveNotReady = 1,
    Reject = 2,
    SelectiveReject = 3,
}

/// 帧类型（带 3 位序号）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// 数据帧（I 帧，poll 位置位）
    Data { seq: u8 },
    /// 确认（RR S 帧）
    Ack { seq: u8 },
    /// 否认（REJ S 帧）
    Nack { seq: u8 },
}

impl FrameKind {
    /// 编码为 control 字节
    pub fn control(self) -> u8 {
        match self {
            FrameKind::Data { seq } => {
                ((seq & 0x07) << CONTROL_SEND_SEQ_NO_BIT) | (1 << CONTROL_POLL_BIT)
            },
            FrameKind::Ack { seq } => {
                ((seq & 0x07) << CONTROL_RECV_SEQ_NO_BIT) | (1 << CONTROL_S_OR_U_FRAME_BIT)
            },
            FrameKind::Nack { seq } => {
                ((seq & 0x07) << CONTROL_RECV_SEQ_NO_BIT)
                    | ((SupervisoryType::Reject as u8) << CONTROL_S_FRAME_TYPE_BIT)
                    | (1 << CONTROL_S_OR_U_FRAME_BIT)
            },
        }
    }

    /// 从 control 字节解码
    pub fn from_control(control: u8) -> Result<Self, ProtocolError> {
        if control & (1 << CONTROL_S_OR_U_FRAME_BIT) == 0 {
            return Ok(FrameKind::Data {
                seq: (control >> CONTROL_SEND_SEQ_NO_BIT) & 0x07,
            });
        }

        let seq = (control >> CONTROL_RECV_SEQ_NO_BIT) & 0x07;
        let s_type = (control >> CONTROL_S_FRAME_TYPE_BIT) & 0x03;
        match SupervisoryType::try_from(s_type) {
            Ok(SupervisoryType::ReceiveReady) => Ok(FrameKind::Ack { seq }),
            Ok(SupervisoryType::Reject) => Ok(FrameKind::Nack { seq }),
            _ => Err(ProtocolError::InvalidValue {
                field: "control",
                value: control,
            }),
        }
    }
}

/// 解码后的 HDLC 帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlcFrame {
    pub address: u8,
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

/// 从字节缓冲区中提取完整的定界帧
///
/// 规则：
/// - 缓冲区短于 [`MIN_FRAME_LEN`]：返回 `None`，不消费任何字节
/// - 找不到起始标志：清空缓冲区（无法恢复的失步），返回 `None`
/// - 起始标志之前的字节被丢弃
/// - 两个连续的标志（上一帧结束 + 下一帧开始）：丢弃第一个
/// - 从索引 1 开始查找结束标志；找不到则保留缓冲区，等待更多数据
/// - 地址字节与 `address` 不符的帧被丢弃，但其字节同样被消费
///
/// 返回的帧包含首尾标志，内容仍为转义状态，可直接交给 [`decode_frame`]。
/// 没有任何合法帧时返回 `None`。
pub fn extract_frames(buffer: &mut BytesMut, address: u8) -> Option<Vec<Bytes>> {
    let mut frames = Vec::new();

    while buffer.len() >= MIN_FRAME_LEN {
        let Some(start) = buffer.iter().position(|&b| b == FRAME_DELIMITER) else {
            debug!("No frame start in {} buffered bytes, dropping", buffer.len());
            buffer.clear();
            break;
        };
        if start > 0 {
            buffer.advance(start);
        }

        if buffer.len() > 1 && buffer[1] == FRAME_DELIMITER {
            buffer.advance(1);
        }

        // 索引 0 是起始标志本身，跳过
        let Some(end) = buffer
            .iter()
            .skip(1)
            .position(|&b| b == FRAME_DELIMITER)
            .map(|i| i + 1)
        else {
            break;
        };

        let frame = buffer.split_to(end + 1).freeze();
        if frame.get(1) == Some(&address) {
            frames.push(frame);
        } else {
            debug!("Discarding frame with address {:02X?}", frame.get(1));
        }
    }

    (!frames.is_empty()).then_some(frames)
}

/// 带内部缓冲区的帧提取器
///
/// 串口每次读到的数据可能只是半帧，剩余字节保留到下一次 `extract()`。
#[derive(Debug)]
pub struct FrameExtractor {
    buffer: BytesMut,
    address: u8,
}

impl FrameExtractor {
    pub fn new(address: u8) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            address,
        }
    }

    /// 追加新读到的数据
    pub fn push(&mut self, data: &[u8]) {
        if self.buffer.len() + data.len() > MAX_BUFFER_LEN {
            warn!(
                "HDLC buffer overflow ({} bytes buffered), dropping",
                self.buffer.len()
            );
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(data);
    }

    /// 提取所有完整帧
    pub fn extract(&mut self) -> Option<Vec<Bytes>> {
        extract_frames(&mut self.buffer, self.address)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new(DEVICE_ADDRESS)
    }
}

fn escape_into(out: &mut Vec<u8>, data: &[u8]) {
    for &byte in data {
        if byte == FRAME_DELIMITER || byte == ESCAPE_BYTE {
            out.push(ESCAPE_BYTE);
            out.push(byte ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
}

fn unescape(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().enumerate();
    while let Some((offset, &byte)) = iter.next() {
        if byte == ESCAPE_BYTE {
            let (_, &next) = iter.next().ok_or(ProtocolError::InvalidEscape { offset })?;
            out.push(next ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}

/// 编码一帧
///
/// # Example
///
/// ```
/// use touchdetect_protocol::hdlc::{DEVICE_ADDRESS, FrameKind, encode_frame};
///
/// let frame = encode_frame(DEVICE_ADDRESS, FrameKind::Data { seq: 1 }, &[0x01]);
/// assert_eq!(frame, [0x7E, 0xFF, 0x12, 0x01, 0xE6, 0xB1, 0x7E]);
/// ```
pub fn encode_frame(address: u8, kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(payload.len() + 4);
    content.push(address);
    content.push(kind.control());
    content.extend_from_slice(payload);
    let fcs = checksum(&content, CRC16_SEED);
    content.extend_from_slice(&fcs.to_le_bytes());

    let mut out = Vec::with_capacity(content.len() * 2 + 2);
    out.push(FRAME_DELIMITER);
    escape_into(&mut out, &content);
    out.push(FRAME_DELIMITER);
    out
}

/// 解码一帧（包含首尾标志）
///
/// 去转义后校验 FCS，并解析 control 字节。
pub fn decode_frame(raw: &[u8]) -> Result<HdlcFrame, ProtocolError> {
    let [FRAME_DELIMITER, inner @ .., FRAME_DELIMITER] = raw else {
        return Err(ProtocolError::MissingDelimiter);
    };

    let content = unescape(inner)?;
    // address + control + fcs
    if content.len() < 4 {
        return Err(ProtocolError::InvalidLength {
            expected: 4,
            actual: content.len(),
        });
    }

    let (body, fcs) = content.split_at(content.len() - 2);
    let received = u16::from_le_bytes([fcs[0], fcs[1]]);
    let computed = checksum(body, CRC16_SEED);
    if received != computed {
        return Err(ProtocolError::ChecksumMismatch {
            expected: computed,
            actual: received,
        });
    }

    Ok(HdlcFrame {
        address: body[0],
        kind: FrameKind::from_control(body[1])?,
        payload: body[2..].to_vec(),
    })
}

/// 数据请求帧（GET_DATA）
pub fn data_request_frame() -> Vec<u8> {
    encode_frame(
        DEVICE_ADDRESS,
        FrameKind::Data { seq: REQUEST_SEQ },
        &[COMMAND_GET_DATA],
    )
}

/// ACK 回复帧
pub fn ack_reply_frame() -> Vec<u8> {
    encode_frame(DEVICE_ADDRESS, FrameKind::Ack { seq: ACK_REPLY_SEQ }, &[])
}

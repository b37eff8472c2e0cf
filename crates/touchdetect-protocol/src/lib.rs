//! # TouchDetect Protocol
//!
//! TouchDetect 触觉传感器的线路协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `crc`: CRC16 校验（支持增量计算）
//! - `hdlc`: HDLC 帧提取与编解码（串口传输）
//! - `wsg`: WSG 夹爪 TCP 帧编解码
//! - `can`: USB-CAN 适配器帧解析与 12 帧数据包重组
//! - `taxel`: 传感器数组（taxel array）
//!
//! ## 设计
//!
//! 本 crate 中的所有解析函数都是纯函数：同步、无阻塞、无副作用，
//! 可以在任意线程中直接调用。调度、超时与重连由上层（driver）负责。
//!
//! ```text
//! transport bytes
//!     ↓ hdlc::extract_frames / can::CanPackageDecoder
//! frames
//!     ↓ hdlc::decode_frame / wsg::WsgCodec::decode_frame
//! payload
//!     ↓ taxel::to_taxel_array
//! TaxelArray
//! ```

pub mod can;
pub mod crc;
pub mod hdlc;
pub mod taxel;
pub mod wsg;

// 重新导出常用类型
pub use can::{CanPackageDecoder, SyncState};
pub use crc::{Crc16, checksum};
pub use hdlc::{FrameExtractor, FrameKind, HdlcFrame};
pub use taxel::{Shape, TaxelArray, to_taxel_array};
pub use wsg::{SensorSide, WsgCodec};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Missing frame delimiter")]
    MissingDelimiter,

    #[error("Invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("Checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Invalid value for field {field}: 0x{value:02X}")]
    InvalidValue { field: &'static str, value: u8 },

    #[error("Array shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    /// 同步失败：在允许的尝试次数内没有找到合法的帧边界
    #[error("CAN adapter synchronization failed after {attempts} attempts")]
    SyncFailed { attempts: usize },
}

//! 驱动层错误类型定义

use std::time::Duration;

use thiserror::Error;
use touchdetect_protocol::{ProtocolError, Shape};
use touchdetect_transport::TransportError;

use crate::config::ConfigError;
use crate::device::DeviceId;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 协议解析错误（包括 CAN 同步失败）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 数组尺寸与设备配置不符
    #[error("Taxel array shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Device already registered: {0}")]
    DuplicateDevice(DeviceId),

    #[error("Device not connected: {0}")]
    NotConnected(DeviceId),

    /// 服务未启动
    #[error("Service not started. Call `start()` first")]
    NotStarted,

    /// 连续多次请求没有响应
    #[error("No response after {attempts} requests")]
    ResponseTimeout { attempts: u32 },

    /// 设备在给定时间内没有任何数据
    #[error("No data received for {elapsed:?}")]
    ConnectionTimeout { elapsed: Duration },

    /// 该设备类型不支持此操作
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// 工作线程错误
    #[error("Worker thread error: {0}")]
    Worker(String),
}

//! # TouchDetect Driver
//!
//! 设备状态、事件分发与轮询线程。
//!
//! ## 模块
//!
//! - `config`: TOML 配置
//! - `device`: 设备描述与运行时状态
//! - `event`: 事件与订阅
//! - `listener`: 转发到 channel 的监听器
//! - `heartbeat`: 数据活性检测
//! - `pipeline`: CAN / 串口 / WSG 轮询循环
//! - `service`: 对外的服务对象

pub mod config;
pub mod device;
mod error;
pub mod event;
pub mod heartbeat;
pub mod listener;
pub mod pipeline;
pub mod service;

pub use config::{CanConfig, ConfigError, DeviceConfig, SdkConfig, SerialConfig, WsgConfig};
pub use device::{
    ConnectionStatus, DeviceId, DeviceKind, DeviceState, DeviceStats, Sample, TransportType,
};
pub use error::DriverError;
pub use event::{DeviceEvent, EventDispatcher, EventListener, SubscriptionId};
pub use heartbeat::ConnectionMonitor;
pub use listener::{ChannelListener, EventRecord};
pub use pipeline::LoopContext;
pub use service::{Connector, SystemConnector, TouchDetectService};

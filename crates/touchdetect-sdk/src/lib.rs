//! TouchDetect SDK - 触觉传感器 Rust SDK
//!
//! 支持四种接入方式：USB-CAN 适配器、HDLC 串口、WSG 夹爪（TCP）和 BLE（由上层推送通知）。
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`protocol`): CRC16、HDLC、WSG、CAN 帧编解码，纯函数
//! - **传输层** (`transport`): 串口 / TCP / mock 字节传输
//! - **驱动层** (`driver`): 设备状态、事件分发、轮询线程和服务对象
//!
//! # 快速开始
//!
//! ```no_run
//! use touchdetect_sdk::prelude::*;
//!
//! touchdetect_sdk::init_logger();
//!
//! let service = TouchDetectService::new(SdkConfig::default());
//! service.start()?;
//! service.add_device("left", DeviceKind::can("/dev/ttyUSB0"), None)?;
//! service.subscribe(|device: &DeviceId, event: &DeviceEvent| {
//!     if let DeviceEvent::NewData(taxels) = event {
//!         println!("{device}: {:?}", taxels.to_nested());
//!     }
//! });
//! service.connect(&"left".into())?;
//! # Ok::<(), DriverError>(())
//! ```

pub mod logging;
pub mod prelude;

pub use touchdetect_driver as driver;
pub use touchdetect_protocol as protocol;
pub use touchdetect_transport as transport;

pub use logging::{init_logger, try_init_logger};

// 常用类型
pub use driver::{
    ChannelListener, ConnectionStatus, DeviceEvent, DeviceId, DeviceKind, DriverError,
    SdkConfig, TouchDetectService,
};
pub use protocol::{ProtocolError, Shape, TaxelArray};
pub use transport::TransportError;

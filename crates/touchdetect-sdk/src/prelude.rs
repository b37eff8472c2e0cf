//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use touchdetect_sdk::prelude::*;
//! ```

pub use crate::driver::{
    ChannelListener, ConnectionStatus, DeviceEvent, DeviceId, DeviceKind, DeviceState,
    EventListener, Sample, SdkConfig, SubscriptionId, TouchDetectService,
};
pub use crate::protocol::{Shape, TaxelArray, to_taxel_array};

// 错误类型
pub use crate::driver::DriverError;
pub use crate::protocol::ProtocolError;
pub use crate::transport::TransportError;

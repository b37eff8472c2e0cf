//! SDK 配置（TOML）
//!
//! 所有字段都有默认值，配置文件只需写出要改的部分：
//!
//! ```toml
//! [serial]
//! update_period_ms = 30
//!
//! [[devices]]
//! name = "left"
//! transport = "can"
//! port = "/dev/ttyUSB0"
//!
//! [[devices]]
//! name = "gripper"
//! transport = "tcp"
//! host = "192.168.1.20"
//! rows = 6
//! cols = 6
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use touchdetect_protocol::Shape;
use touchdetect_protocol::can::{DEFAULT_MAX_INVALID_FRAMES, DEFAULT_MAX_SYNC_ATTEMPTS};
use touchdetect_protocol::taxel::DEFAULT_SHAPE;
use touchdetect_protocol::wsg::{DEFAULT_PROTOCOL_ID, DEFAULT_TCP_PORT};

use crate::device::{DeviceId, DeviceKind};

/// CAN 适配器默认波特率
pub const DEFAULT_CAN_BAUD_RATE: u32 = 1_000_000;
/// 串口设备默认波特率
pub const DEFAULT_SERIAL_BAUD_RATE: u32 = 115_200;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// CAN 轮询配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanConfig {
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// 逐字节对齐的最大尝试次数
    pub max_sync_attempts: usize,
    /// 连续无效帧上限，超过后重新对齐
    pub max_invalid_frames: usize,
    /// 超过该时长没有任何字节即视为失联
    pub silence_timeout_ms: u64,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_CAN_BAUD_RATE,
            read_timeout_ms: 500,
            max_sync_attempts: DEFAULT_MAX_SYNC_ATTEMPTS,
            max_invalid_frames: DEFAULT_MAX_INVALID_FRAMES,
            silence_timeout_ms: 2_000,
        }
    }
}

impl CanConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }
}

/// HDLC 串口轮询配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// 请求周期
    pub update_period_ms: u64,
    /// 请求发出后等待应答的时长
    pub response_timeout_ms: u64,
    /// 连续超时次数上限
    pub max_timeouts: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_SERIAL_BAUD_RATE,
            read_timeout_ms: 50,
            update_period_ms: 40,
            response_timeout_ms: 800,
            max_timeouts: 3,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.update_period_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// WSG 夹爪轮询配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsgConfig {
    pub port: u16,
    pub update_period_ms: u64,
    /// 单次请求等待响应的时长
    pub read_timeout_ms: u64,
    /// 连续失败次数上限
    pub max_timeouts: u32,
    /// 协议 ID（大端写法，`0xAABB` 即线上的 `AA BB`）
    pub protocol_id: u16,
}

impl Default for WsgConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_TCP_PORT,
            update_period_ms: 10,
            read_timeout_ms: 500,
            max_timeouts: 3,
            protocol_id: u16::from_be_bytes(DEFAULT_PROTOCOL_ID),
        }
    }
}

impl WsgConfig {
    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.update_period_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn protocol_id_bytes(&self) -> [u8; 2] {
        self.protocol_id.to_be_bytes()
    }
}

/// 配置文件中的设备条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: DeviceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<usize>,
}

impl DeviceConfig {
    pub fn id(&self) -> DeviceId {
        DeviceId::new(self.name.clone())
    }

    /// 网格尺寸，缺省 6×6
    pub fn shape(&self) -> Shape {
        Shape::new(
            self.rows.unwrap_or(DEFAULT_SHAPE.rows),
            self.cols.unwrap_or(DEFAULT_SHAPE.cols),
        )
    }
}

/// SDK 配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    pub can: CanConfig,
    pub serial: SerialConfig,
    pub wsg: WsgConfig,
    pub devices: Vec<DeviceConfig>,
}

impl SdkConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (i, device) in self.devices.iter().enumerate() {
            if device.shape().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' has an empty shape",
                    device.name
                )));
            }
            if self.devices[..i].iter().any(|d| d.name == device.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }
        }
        if self.serial.max_timeouts == 0 || self.wsg.max_timeouts == 0 {
            return Err(ConfigError::Invalid("max_timeouts must be at least 1".into()));
        }
        Ok(())
    }
}

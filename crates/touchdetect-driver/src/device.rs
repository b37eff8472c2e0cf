//! 设备定义与共享状态
//!
//! - [`DeviceKind`]: 按传输方式区分的设备描述（标签联合）
//! - [`DeviceState`]: 所有传输方式共用的运行时状态
//!
//! 每个已连接设备只有一个写入者（工作线程），读取者可以有任意多个。
//! 传感器数组每次整体替换（`Arc` 交换），从不原地修改。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use touchdetect_protocol::{Shape, TaxelArray};

use crate::DriverError;

/// 设备标识（注册名）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&DeviceId> for DeviceId {
    fn from(id: &DeviceId) -> Self {
        id.clone()
    }
}

/// 传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    Ble,
    Can,
    Serial,
    Tcp,
}

fn default_can_baud_rate() -> u32 {
    crate::config::DEFAULT_CAN_BAUD_RATE
}

fn default_serial_baud_rate() -> u32 {
    crate::config::DEFAULT_SERIAL_BAUD_RATE
}

fn default_tcp_port() -> u16 {
    touchdetect_protocol::wsg::DEFAULT_TCP_PORT
}

/// 设备描述（每种传输方式只携带自己需要的字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum DeviceKind {
    /// BLE 设备：数据由上层通过 `push_ble_notification` 推入
    Ble { device_id: String },
    /// USB-CAN 适配器
    Can {
        port: String,
        #[serde(default = "default_can_baud_rate")]
        baud_rate: u32,
    },
    /// HDLC 串口设备
    Serial {
        port: String,
        #[serde(default = "default_serial_baud_rate")]
        baud_rate: u32,
    },
    /// WSG 夹爪（左右两个传感器）
    Tcp {
        host: String,
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
}

impl DeviceKind {
    pub fn can(port: impl Into<String>) -> Self {
        DeviceKind::Can {
            port: port.into(),
            baud_rate: default_can_baud_rate(),
        }
    }

    pub fn serial(port: impl Into<String>) -> Self {
        DeviceKind::Serial {
            port: port.into(),
            baud_rate: default_serial_baud_rate(),
        }
    }

    pub fn tcp(host: impl Into<String>) -> Self {
        DeviceKind::Tcp {
            host: host.into(),
            port: default_tcp_port(),
        }
    }

    pub fn ble(device_id: impl Into<String>) -> Self {
        DeviceKind::Ble {
            device_id: device_id.into(),
        }
    }

    pub fn transport_type(&self) -> TransportType {
        match self {
            DeviceKind::Ble { .. } => TransportType::Ble,
            DeviceKind::Can { .. } => TransportType::Can,
            DeviceKind::Serial { .. } => TransportType::Serial,
            DeviceKind::Tcp { .. } => TransportType::Tcp,
        }
    }

    /// 人类可读的地址
    pub fn address(&self) -> String {
        match self {
            DeviceKind::Ble { device_id } => device_id.clone(),
            DeviceKind::Can { port, .. } | DeviceKind::Serial { port, .. } => port.clone(),
            DeviceKind::Tcp { host, port } => format!("{host}:{port}"),
        }
    }

    /// 是否有左右两个传感器
    pub fn is_gripper(&self) -> bool {
        matches!(self, DeviceKind::Tcp { .. })
    }
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionStatus {
    #[default]
    Disconnected = 0,
    Connected = 1,
    /// 工作线程因错误退出
    ConnectionLost = 2,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::ConnectionLost,
            _ => Self::Disconnected,
        }
    }
}

/// 连接状态（原子版本）
#[derive(Debug, Default)]
pub struct AtomicConnectionStatus {
    inner: AtomicU8,
}

impl AtomicConnectionStatus {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            inner: AtomicU8::new(status as u8),
        }
    }

    pub fn get(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, status: ConnectionStatus) {
        self.inner.store(status as u8, Ordering::Release);
    }

    /// 比较并交换，成功返回 true
    pub fn transition(&self, from: ConnectionStatus, to: ConnectionStatus) -> bool {
        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// 一次采样
#[derive(Debug, Clone)]
pub struct Sample {
    /// 主传感器（夹爪为左侧）
    pub taxels: Arc<TaxelArray>,
    /// 夹爪右侧传感器
    pub right: Option<Arc<TaxelArray>>,
    /// Unix 毫秒时间戳
    pub timestamp_ms: u64,
    /// 设备内的采样序号（从 1 开始）
    pub sequence: u64,
}

/// 设备统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub samples: u64,
    pub dropped_frames: u64,
    pub timeouts: u64,
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// 当前数组；夹爪的左右两侧在同一把锁下替换
#[derive(Debug)]
struct Grids {
    primary: Arc<TaxelArray>,
    right: Option<Arc<TaxelArray>>,
}

/// 设备运行时状态
#[derive(Debug)]
pub struct DeviceState {
    id: DeviceId,
    kind: DeviceKind,
    shape: Shape,
    grids: Mutex<Grids>,
    status: AtomicConnectionStatus,
    acquiring: AtomicBool,
    /// 容量为 1 的最新采样邮箱
    latest: Mutex<Option<Sample>>,
    samples: AtomicU64,
    dropped_frames: AtomicU64,
    timeouts: AtomicU64,
}

impl DeviceState {
    pub fn new(id: impl Into<DeviceId>, kind: DeviceKind, shape: Shape) -> Self {
        let zeros = Arc::new(TaxelArray::zeros(shape));
        let grids = Grids {
            primary: zeros.clone(),
            right: kind.is_gripper().then_some(zeros),
        };
        Self {
            id: id.into(),
            kind,
            shape,
            grids: Mutex::new(grids),
            status: AtomicConnectionStatus::new(ConnectionStatus::Disconnected),
            acquiring: AtomicBool::new(false),
            latest: Mutex::new(None),
            samples: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn transport_type(&self) -> TransportType {
        self.kind.transport_type()
    }

    /// 网格尺寸（创建后不可变）
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// 当前传感器数组（夹爪为左侧）
    pub fn taxels(&self) -> Arc<TaxelArray> {
        self.grids.lock().primary.clone()
    }

    /// 夹爪右侧传感器数组
    pub fn taxels_right(&self) -> Option<Arc<TaxelArray>> {
        self.grids.lock().right.clone()
    }

    /// 夹爪左右两侧数组，取自同一次更新
    pub fn gripper_taxels(&self) -> Option<(Arc<TaxelArray>, Arc<TaxelArray>)> {
        let grids = self.grids.lock();
        let right = grids.right.clone()?;
        Some((grids.primary.clone(), right))
    }

    fn check_shape(&self, array: &TaxelArray) -> Result<(), DriverError> {
        if array.shape() != self.shape {
            warn!(
                "Device {}: rejecting {} array, configured shape is {}",
                self.id,
                array.shape(),
                self.shape
            );
            return Err(DriverError::ShapeMismatch {
                expected: self.shape,
                actual: array.shape(),
            });
        }
        Ok(())
    }

    /// 替换传感器数组
    ///
    /// 尺寸不符时记录警告并返回错误，原数组保持不变。
    pub fn set_taxels(&self, array: TaxelArray) -> Result<Arc<TaxelArray>, DriverError> {
        self.check_shape(&array)?;
        let array = Arc::new(array);
        self.grids.lock().primary = array.clone();
        self.publish(array.clone(), None);
        Ok(array)
    }

    /// 同时替换夹爪左右两侧数组
    pub fn set_gripper_taxels(
        &self,
        left: TaxelArray,
        right: TaxelArray,
    ) -> Result<(Arc<TaxelArray>, Arc<TaxelArray>), DriverError> {
        if !self.kind.is_gripper() {
            return Err(DriverError::Unsupported("device has a single sensor"));
        }
        self.check_shape(&left)?;
        self.check_shape(&right)?;

        let left = Arc::new(left);
        let right = Arc::new(right);
        {
            let mut grids = self.grids.lock();
            grids.primary = left.clone();
            grids.right = Some(right.clone());
        }
        self.publish(left.clone(), Some(right.clone()));
        Ok((left, right))
    }

    fn publish(&self, taxels: Arc<TaxelArray>, right: Option<Arc<TaxelArray>>) {
        let sequence = self.samples.fetch_add(1, Ordering::Relaxed) + 1;
        *self.latest.lock() = Some(Sample {
            taxels,
            right,
            timestamp_ms: unix_millis(),
            sequence,
        });
    }

    /// 取出最新采样（取出后邮箱为空）
    pub fn take_latest(&self) -> Option<Sample> {
        self.latest.lock().take()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.set(status);
    }

    pub(crate) fn transition_status(&self, from: ConnectionStatus, to: ConnectionStatus) -> bool {
        self.status.transition(from, to)
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// 工作线程是否正在采集
    pub fn is_acquiring(&self) -> bool {
        self.acquiring.load(Ordering::Acquire)
    }

    pub fn set_acquiring(&self, acquiring: bool) {
        self.acquiring.store(acquiring, Ordering::Release);
    }

    pub fn record_dropped_frame(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            samples: self.samples.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

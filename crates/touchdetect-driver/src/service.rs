//! TouchDetect 服务（对外 API）
//!
//! 服务对象持有设备注册表和事件分发器，每个已连接的有线设备对应一个工作线程。
//!
//! ```no_run
//! use touchdetect_driver::{DeviceKind, SdkConfig, TouchDetectService};
//!
//! let service = TouchDetectService::new(SdkConfig::default());
//! service.start()?;
//! service.add_device("left", DeviceKind::can("/dev/ttyUSB0"), None)?;
//! service.connect(&"left".into())?;
//!
//! if let Some(taxels) = service.get_data(&"left".into()) {
//!     println!("{:?}", taxels.to_nested());
//! }
//! service.stop();
//! # Ok::<(), touchdetect_driver::DriverError>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use touchdetect_protocol::taxel::DEFAULT_SHAPE;
use touchdetect_protocol::{ProtocolError, Shape, TaxelArray, to_taxel_array};
use touchdetect_transport::{ByteTransport, SerialTransport, TcpTransport, TransportError};

use crate::DriverError;
use crate::config::SdkConfig;
use crate::device::{ConnectionStatus, DeviceId, DeviceKind, DeviceState};
use crate::event::{DeviceEvent, EventDispatcher, EventListener, SubscriptionId};
use crate::pipeline::{LoopContext, can_loop, serial_loop, wsg_loop};

/// 工作线程退出等待时间
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 传输创建接口
///
/// 服务通过它打开设备的传输，测试中可以替换为 mock。
pub trait Connector: Send + Sync {
    fn open(
        &self,
        kind: &DeviceKind,
        config: &SdkConfig,
    ) -> Result<Box<dyn ByteTransport>, TransportError>;
}

/// 打开真实串口 / TCP 连接
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    fn open(
        &self,
        kind: &DeviceKind,
        config: &SdkConfig,
    ) -> Result<Box<dyn ByteTransport>, TransportError> {
        match kind {
            DeviceKind::Can { port, baud_rate } => Ok(Box::new(SerialTransport::open_can_adapter(
                port,
                *baud_rate,
                config.can.read_timeout(),
            )?)),
            DeviceKind::Serial { port, baud_rate } => Ok(Box::new(SerialTransport::open(
                port,
                *baud_rate,
                config.serial.read_timeout(),
            )?)),
            DeviceKind::Tcp { host, port } => Ok(Box::new(TcpTransport::connect(
                host,
                *port,
                config.wsg.read_timeout(),
            )?)),
            DeviceKind::Ble { .. } => Err(TransportError::Unsupported(
                "BLE data is delivered through push_ble_notification",
            )),
        }
    }
}

struct Worker {
    is_running: Arc<AtomicBool>,
    /// 循环结束（含关闭传输）后收到一条消息；线程 panic 时断开
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

struct DeviceEntry {
    state: Arc<DeviceState>,
    worker: Option<Worker>,
}

/// TouchDetect 服务
pub struct TouchDetectService {
    config: SdkConfig,
    connector: Arc<dyn Connector>,
    devices: RwLock<HashMap<DeviceId, DeviceEntry>>,
    events: Arc<EventDispatcher>,
    started: AtomicBool,
    /// 串行化 connect / disconnect（持锁期间不触发事件）
    lifecycle: Mutex<()>,
}

impl std::fmt::Debug for TouchDetectService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TouchDetectService")
            .field("devices", &self.devices())
            .field("started", &self.is_started())
            .finish()
    }
}

impl TouchDetectService {
    pub fn new(config: SdkConfig) -> Self {
        Self::with_connector(config, SystemConnector)
    }

    /// 使用自定义的传输创建方式
    pub fn with_connector(config: SdkConfig, connector: impl Connector + 'static) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            devices: RwLock::new(HashMap::new()),
            events: Arc::new(EventDispatcher::new()),
            started: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// 启动服务，并注册配置文件中的设备
    ///
    /// 重复调用无副作用。
    pub fn start(&self) -> Result<(), DriverError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("TouchDetect service started");

        for device in &self.config.devices {
            let id = device.id();
            if self.devices.read().contains_key(&id) {
                continue;
            }
            self.add_device(id, device.kind.clone(), Some(device.shape()))?;
        }
        Ok(())
    }

    /// 断开所有设备并停止服务
    ///
    /// 注册表保留，再次 `start()` 后可以重新连接。
    pub fn stop(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        for id in self.devices() {
            if let Err(e) = self.disconnect(&id) {
                warn!("Failed to disconnect {}: {}", id, e);
            }
        }
        self.started.store(false, Ordering::Release);
        info!("TouchDetect service stopped");
    }

    fn ensure_started(&self) -> Result<(), DriverError> {
        if self.is_started() {
            Ok(())
        } else {
            Err(DriverError::NotStarted)
        }
    }

    /// 注册设备（`shape` 缺省 6×6）
    pub fn add_device(
        &self,
        id: impl Into<DeviceId>,
        kind: DeviceKind,
        shape: Option<Shape>,
    ) -> Result<Arc<DeviceState>, DriverError> {
        self.ensure_started()?;
        let id = id.into();
        let shape = shape.unwrap_or(DEFAULT_SHAPE);
        if matches!(kind, DeviceKind::Can { .. }) && shape != DEFAULT_SHAPE {
            warn!(
                "Device {}: CAN packages always carry a {} grid, configured shape is {}",
                id, DEFAULT_SHAPE, shape
            );
        }

        let mut devices = self.devices.write();
        if devices.contains_key(&id) {
            return Err(DriverError::DuplicateDevice(id));
        }

        debug!("Registering device {} ({})", id, kind.address());
        let state = Arc::new(DeviceState::new(id.clone(), kind, shape));
        devices.insert(
            id,
            DeviceEntry {
                state: state.clone(),
                worker: None,
            },
        );
        Ok(state)
    }

    /// 注销设备（已连接的会先断开）
    pub fn remove_device(&self, id: &DeviceId) -> Result<(), DriverError> {
        self.disconnect(id)?;
        if self.devices.write().remove(id).is_none() {
            return Err(DriverError::UnknownDevice(id.clone()));
        }
        debug!("Device {} removed", id);
        Ok(())
    }

    /// 连接设备并启动工作线程
    ///
    /// 已连接时直接返回 `Ok`。打开失败时触发 `ErrorOpeningPort`。
    /// 有线设备的 `Connected` 由工作线程在开始采集前触发。
    pub fn connect(&self, id: &DeviceId) -> Result<(), DriverError> {
        self.ensure_started()?;
        let mut pending = Vec::new();
        let result = {
            let _guard = self.lifecycle.lock();
            self.connect_locked(id, &mut pending)
        };
        self.fire_all(id, pending);
        result
    }

    fn connect_locked(
        &self,
        id: &DeviceId,
        pending: &mut Vec<DeviceEvent>,
    ) -> Result<(), DriverError> {
        let (state, stale_worker) = {
            let mut devices = self.devices.write();
            let entry = devices
                .get_mut(id)
                .ok_or_else(|| DriverError::UnknownDevice(id.clone()))?;
            if entry.state.is_connected() {
                return Ok(());
            }
            (entry.state.clone(), entry.worker.take())
        };

        // 上一次连接丢失后留下的线程
        if let Some(worker) = stale_worker {
            stop_worker(id, worker);
        }

        if let DeviceKind::Ble { device_id } = state.kind() {
            debug!("Device {}: BLE device {} marked connected", id, device_id);
            state.set_status(ConnectionStatus::Connected);
            pending.push(DeviceEvent::Connected);
            return Ok(());
        }

        let transport = match self.connector.open(state.kind(), &self.config) {
            Ok(transport) => transport,
            Err(e) => {
                error!("Device {}: failed to open {}: {}", id, state.kind().address(), e);
                pending.push(DeviceEvent::ErrorOpeningPort(e.to_string()));
                return Err(e.into());
            },
        };

        let ctx = LoopContext::new(state.clone(), self.events.clone());
        let is_running = ctx.is_running.clone();
        let config = self.config.clone();
        let (done_tx, done) = crossbeam_channel::bounded(1);

        state.set_status(ConnectionStatus::Connected);
        state.set_acquiring(true);
        info!("Device {} connected ({})", id, state.kind().address());

        let handle = thread::Builder::new()
            .name(format!("touchdetect-{id}"))
            .spawn(move || {
                run_worker(transport, ctx, config);
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                state.set_status(ConnectionStatus::Disconnected);
                state.set_acquiring(false);
                DriverError::Worker(e.to_string())
            })?;

        if let Some(entry) = self.devices.write().get_mut(id) {
            entry.worker = Some(Worker {
                is_running,
                done,
                handle,
            });
        }
        Ok(())
    }

    /// 停止工作线程并断开设备
    ///
    /// 未连接时直接返回 `Ok`。
    pub fn disconnect(&self, id: &DeviceId) -> Result<(), DriverError> {
        let mut pending = Vec::new();
        let result = {
            let _guard = self.lifecycle.lock();
            self.disconnect_locked(id, &mut pending)
        };
        self.fire_all(id, pending);
        result
    }

    fn disconnect_locked(
        &self,
        id: &DeviceId,
        pending: &mut Vec<DeviceEvent>,
    ) -> Result<(), DriverError> {
        let (state, worker) = {
            let mut devices = self.devices.write();
            let entry = devices
                .get_mut(id)
                .ok_or_else(|| DriverError::UnknownDevice(id.clone()))?;
            (entry.state.clone(), entry.worker.take())
        };

        let was_connected = state.status() != ConnectionStatus::Disconnected;
        if let Some(worker) = worker {
            stop_worker(id, worker);
        }
        state.set_acquiring(false);
        state.set_status(ConnectionStatus::Disconnected);

        if was_connected {
            info!("Device {} disconnected", id);
            pending.push(DeviceEvent::Disconnected);
        }
        Ok(())
    }

    fn fire_all(&self, id: &DeviceId, events: Vec<DeviceEvent>) {
        for event in &events {
            self.events.fire(id, event);
        }
    }

    /// 当前传感器数组
    ///
    /// 设备未注册或未连接时记录警告并返回 `None`。
    pub fn get_data(&self, id: &DeviceId) -> Option<Arc<TaxelArray>> {
        let state = self.connected_device(id)?;
        Some(state.taxels())
    }

    /// 夹爪左右两侧数组
    pub fn get_gripper_data(&self, id: &DeviceId) -> Option<(Arc<TaxelArray>, Arc<TaxelArray>)> {
        self.connected_device(id)?.gripper_taxels()
    }

    fn connected_device(&self, id: &DeviceId) -> Option<Arc<DeviceState>> {
        let Some(state) = self.device(id) else {
            warn!("Unknown device {}", id);
            return None;
        };
        if !state.is_connected() {
            warn!("Device {} is not connected", id);
            return None;
        }
        Some(state)
    }

    pub fn device(&self, id: &DeviceId) -> Option<Arc<DeviceState>> {
        self.devices.read().get(id).map(|entry| entry.state.clone())
    }

    /// 已注册设备（按名称排序）
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.devices.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 写入一条 BLE 通知的负载
    ///
    /// BLE 的连接和订阅由上层完成，这里只负责解码和分发。
    pub fn push_ble_notification(&self, id: &DeviceId, payload: &[u8]) -> Result<(), DriverError> {
        let state = self
            .device(id)
            .ok_or_else(|| DriverError::UnknownDevice(id.clone()))?;
        if !matches!(state.kind(), DeviceKind::Ble { .. }) {
            return Err(DriverError::Unsupported("not a BLE device"));
        }
        if !state.is_connected() {
            return Err(DriverError::NotConnected(id.clone()));
        }

        let shape = state.shape();
        let Some(array) = to_taxel_array(shape, payload) else {
            warn!(
                "Device {}: received payload with wrong size ({} bytes), ignoring",
                id,
                payload.len()
            );
            state.record_dropped_frame();
            return Err(ProtocolError::InvalidLength {
                expected: shape.payload_len(),
                actual: payload.len(),
            }
            .into());
        };

        let array = state.set_taxels(array)?;
        self.events.fire(id, &DeviceEvent::NewData(array));
        Ok(())
    }

    pub fn subscribe<L: EventListener + 'static>(&self, listener: L) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }
}

impl Drop for TouchDetectService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 通知工作线程退出并等待，最多 [`JOIN_TIMEOUT`]
///
/// 在工作线程自身（事件回调里）调用时只清除运行标志：循环在回调返回后退出。
fn stop_worker(id: &DeviceId, worker: Worker) {
    worker.is_running.store(false, Ordering::Release);

    if worker.handle.thread().id() == thread::current().id() {
        debug!("Device {}: stop requested from its own worker thread", id);
        return;
    }

    match worker.done.recv_timeout(JOIN_TIMEOUT) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
            if worker.handle.join().is_err() {
                error!("Device {}: worker thread panicked", id);
            }
        },
        Err(RecvTimeoutError::Timeout) => {
            // 放弃 JoinHandle，线程在循环结束后自行退出
            error!(
                "Device {}: worker thread did not stop within {:?}",
                id, JOIN_TIMEOUT
            );
        },
    }
}

fn run_worker(mut transport: Box<dyn ByteTransport>, ctx: LoopContext, config: SdkConfig) {
    let id = ctx.device.id().clone();
    ctx.events.fire(&id, &DeviceEvent::Connected);

    let result = match ctx.device.kind() {
        DeviceKind::Can { .. } => can_loop(&mut *transport, &ctx, &config.can),
        DeviceKind::Serial { .. } => serial_loop(&mut *transport, &ctx, &config.serial),
        DeviceKind::Tcp { .. } => wsg_loop(&mut *transport, &ctx, &config.wsg),
        DeviceKind::Ble { .. } => Ok(()),
    };
    ctx.device.set_acquiring(false);

    if let Err(e) = result {
        // 主动停止期间的错误不算连接丢失
        if ctx.is_running() {
            error!("Device {}: connection lost: {}", id, e);
            ctx.device.set_status(ConnectionStatus::ConnectionLost);
            ctx.events
                .fire(&id, &DeviceEvent::ConnectionError(e.to_string()));
        } else {
            debug!("Device {}: loop ended during shutdown: {}", id, e);
        }
    }

    if let Err(e) = transport.close() {
        warn!("Device {}: failed to close transport: {}", id, e);
        ctx.events
            .fire(&id, &DeviceEvent::ErrorClosingPort(e.to_string()));
    }
}

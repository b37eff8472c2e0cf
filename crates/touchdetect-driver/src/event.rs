//! 事件分发
//!
//! 每次 `fire` 都按注册顺序同步调用所有当前订阅者。
//! 订阅列表保存在 `ArcSwap` 中，`fire` 读取时不加锁；
//! 订阅/取消订阅是低频操作，复制整个列表后整体替换。
//!
//! # 示例
//!
//! ```rust
//! use touchdetect_driver::event::{DeviceEvent, EventDispatcher};
//! use touchdetect_driver::DeviceId;
//!
//! let events = EventDispatcher::new();
//! let id = events.subscribe(|device: &DeviceId, event: &DeviceEvent| {
//!     println!("{device}: {event:?}");
//! });
//! events.fire(&DeviceId::from("left"), &DeviceEvent::Connected);
//! assert!(events.unsubscribe(id));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use touchdetect_protocol::TaxelArray;

use crate::device::DeviceId;

/// 设备事件
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Connected,
    Disconnected,
    ErrorOpeningPort(String),
    ErrorClosingPort(String),
    /// 工作线程因错误退出
    ConnectionError(String),
    NewData(Arc<TaxelArray>),
    /// WSG 夹爪左右两侧数据
    NewGripperData {
        left: Arc<TaxelArray>,
        right: Arc<TaxelArray>,
    },
}

impl DeviceEvent {
    /// 事件名称（用于日志）
    pub fn name(&self) -> &'static str {
        match self {
            DeviceEvent::Connected => "connected",
            DeviceEvent::Disconnected => "disconnected",
            DeviceEvent::ErrorOpeningPort(_) => "error_opening_port",
            DeviceEvent::ErrorClosingPort(_) => "error_closing_port",
            DeviceEvent::ConnectionError(_) => "connection_error",
            DeviceEvent::NewData(_) => "new_data",
            DeviceEvent::NewGripperData { .. } => "new_gripper_data",
        }
    }
}

/// 事件监听器
///
/// 回调在触发事件的线程（通常是设备工作线程）中同步执行，
/// 耗时操作应转发到 channel 中处理（见 [`crate::ChannelListener`]）。
pub trait EventListener: Send + Sync {
    fn on_event(&self, device: &DeviceId, event: &DeviceEvent);
}

impl<F> EventListener for F
where
    F: Fn(&DeviceId, &DeviceEvent) + Send + Sync,
{
    fn on_event(&self, device: &DeviceId, event: &DeviceEvent) {
        self(device, event)
    }
}

/// 订阅 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SubscriberList = Vec<(SubscriptionId, Arc<dyn EventListener>)>;

/// 事件分发器
pub struct EventDispatcher {
    subscribers: ArcSwap<SubscriberList>,
    /// 串行化写操作（读操作无锁）
    write_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 注册监听器
    pub fn subscribe<L: EventListener + 'static>(&self, listener: L) -> SubscriptionId {
        self.subscribe_arc(Arc::new(listener))
    }

    /// 注册已共享的监听器
    pub fn subscribe_arc(&self, listener: Arc<dyn EventListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let _guard = self.write_lock.lock();
        let mut list = SubscriberList::clone(&self.subscribers.load());
        list.push((id, listener));
        self.subscribers.store(Arc::new(list));
        id
    }

    /// 取消订阅，返回是否找到该订阅
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.subscribers.load();
        if !current.iter().any(|(sid, _)| *sid == id) {
            return false;
        }
        let list: SubscriberList = current
            .iter()
            .filter(|(sid, _)| *sid != id)
            .cloned()
            .collect();
        self.subscribers.store(Arc::new(list));
        true
    }

    /// 按注册顺序同步调用所有订阅者
    pub fn fire(&self, device: &DeviceId, event: &DeviceEvent) {
        let subscribers = self.subscribers.load();
        for (_, listener) in subscribers.iter() {
            listener.on_event(device, event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 移除所有订阅者
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.subscribers.store(Arc::new(Vec::new()));
    }
}

//! Channel 监听器
//!
//! 把事件转发到有界 channel，由消费者线程自行处理：
//!
//! - 有界队列，不会无限增长
//! - 使用 `try_send`，队列满时丢弃事件并计数，不阻塞设备工作线程
//!
//! ```rust
//! use touchdetect_driver::event::EventDispatcher;
//! use touchdetect_driver::listener::ChannelListener;
//!
//! let events = EventDispatcher::new();
//! let (listener, rx) = ChannelListener::new();
//! let dropped = listener.dropped_events().clone();
//! events.subscribe(listener);
//!
//! std::thread::spawn(move || {
//!     while let Ok(record) = rx.recv() {
//!         println!("{}: {:?}", record.device, record.event);
//!     }
//! });
//!
//! println!("dropped {} events", dropped.load(std::sync::atomic::Ordering::Relaxed));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::device::{DeviceId, unix_millis};
use crate::event::{DeviceEvent, EventListener};

/// 默认队列容量
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// 带时间戳的事件
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub device: DeviceId,
    pub event: DeviceEvent,
    /// Unix 毫秒时间戳（事件触发时）
    pub timestamp_ms: u64,
}

/// 转发事件到有界 channel 的监听器
pub struct ChannelListener {
    tx: Sender<EventRecord>,
    dropped_events: Arc<AtomicU64>,
    delivered_events: Arc<AtomicU64>,
}

impl ChannelListener {
    #[must_use]
    pub fn new() -> (Self, Receiver<EventRecord>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<EventRecord>) {
        let (tx, rx) = bounded(capacity);
        let listener = Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
            delivered_events: Arc::new(AtomicU64::new(0)),
        };
        (listener, rx)
    }

    /// 丢弃的事件数（队列满或接收端已关闭）
    pub fn dropped_events(&self) -> &Arc<AtomicU64> {
        &self.dropped_events
    }

    pub fn delivered_events(&self) -> &Arc<AtomicU64> {
        &self.delivered_events
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, device: &DeviceId, event: &DeviceEvent) {
        let record = EventRecord {
            device: device.clone(),
            event: event.clone(),
            timestamp_ms: unix_millis(),
        };
        match self.tx.try_send(record) {
            Ok(()) => {
                self.delivered_events.fetch_add(1, Ordering::Relaxed);
            },
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}

//! 数据活性检测
//!
//! 记录最近一次收到有效数据的时间，用于发现"连接还在但设备不再发数据"的情况
//! （传感器断电、线缆松动）。
//!
//! 时间以进程内单调时钟为基准，存入 `AtomicU64`，不受系统时间调整影响。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static CLOCK_ANCHOR: OnceLock<Instant> = OnceLock::new();

fn monotonic_micros() -> u64 {
    CLOCK_ANCHOR.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// 数据活性监视器
#[derive(Debug)]
pub struct ConnectionMonitor {
    last_data_us: AtomicU64,
    silence_timeout: Duration,
}

impl ConnectionMonitor {
    /// `silence_timeout`：超过该时长没有数据即视为失联
    pub fn new(silence_timeout: Duration) -> Self {
        Self {
            last_data_us: AtomicU64::new(monotonic_micros()),
            silence_timeout,
        }
    }

    /// 记录一次有效数据
    pub fn register_data(&self) {
        self.last_data_us.store(monotonic_micros(), Ordering::Relaxed);
    }

    pub fn time_since_last_data(&self) -> Duration {
        let last = self.last_data_us.load(Ordering::Relaxed);
        Duration::from_micros(monotonic_micros().saturating_sub(last))
    }

    /// 在超时窗口内收到过数据
    pub fn is_alive(&self) -> bool {
        self.time_since_last_data() < self.silence_timeout
    }

    pub fn silence_timeout(&self) -> Duration {
        self.silence_timeout
    }
}

//! 日志初始化
//!
//! 库内部统一使用 `tracing`。这里安装 fmt subscriber，并把 `log` 记录桥接进来，
//! 使依赖 `log` 的第三方 crate（例如 `serialport`）的输出也能被同一个过滤器控制。
//!
//! 过滤规则取自 `RUST_LOG`，未设置时为 `info`。

use std::error::Error;

use tracing_subscriber::EnvFilter;

/// 默认过滤规则
pub const DEFAULT_FILTER: &str = "info";

/// 初始化全局日志（重复调用会被忽略）
pub fn init_logger() {
    let _ = try_init_logger();
}

/// 初始化全局日志
///
/// 已经安装过 subscriber 或 `log` logger 时返回错误。
pub fn try_init_logger() -> Result<(), Box<dyn Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tracing_log::LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init()?;
    Ok(())
}

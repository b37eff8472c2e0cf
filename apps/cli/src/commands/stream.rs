//! 数据流命令
//!
//! 连接一个设备，打印每次采样，可选保存为 JSON Lines。

use anyhow::{Context, Result, bail};
use clap::Args;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use touchdetect_sdk::driver::EventRecord;
use touchdetect_sdk::prelude::*;
use tracing::debug;

use crate::utils::{SampleRecord, format_grid};

/// 设备在 CLI 中的名称
const DEVICE_NAME: &str = "sensor";

/// 数据流参数（各子命令共用）
#[derive(Args, Debug)]
pub struct StreamArgs {
    /// 收到多少次采样后退出（默认一直运行，Ctrl+C 退出）
    #[arg(short = 'n', long)]
    pub count: Option<u64>,

    /// 配置文件（TOML）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 保存采样到 JSON Lines 文件
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 传感器行数
    #[arg(long, default_value_t = 6)]
    pub rows: usize,

    /// 传感器列数
    #[arg(long, default_value_t = 6)]
    pub cols: usize,

    /// 不打印网格（只保存）
    #[arg(short, long)]
    pub quiet: bool,
}

impl StreamArgs {
    pub fn load_config(&self) -> Result<SdkConfig> {
        match &self.config {
            Some(path) => SdkConfig::load(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display())),
            None => Ok(SdkConfig::default()),
        }
    }

    /// 执行数据流
    pub fn execute(&self, config: SdkConfig, kind: DeviceKind) -> Result<()> {
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || {
            r.store(false, Ordering::SeqCst);
            println!("\n收到退出信号，正在关闭...");
        })?;

        let mut writer = match &self.output {
            Some(path) => Some(BufWriter::new(
                File::create(path)
                    .with_context(|| format!("创建输出文件失败: {}", path.display()))?,
            )),
            None => None,
        };

        let service = TouchDetectService::new(config);
        service.start()?;
        let (listener, rx) = ChannelListener::new();
        let dropped = listener.dropped_events().clone();
        service.subscribe(listener);

        let id = DeviceId::from(DEVICE_NAME);
        let address = kind.address();
        service.add_device(id.clone(), kind, Some(Shape::new(self.rows, self.cols)))?;

        println!("⏳ 连接到 {address} ...");
        service.connect(&id)?;
        println!("✅ 已连接，按 Ctrl+C 退出");

        let mut samples = 0u64;
        while running.load(Ordering::SeqCst) {
            if self.count.is_some_and(|count| samples >= count) {
                break;
            }

            let Ok(record) = rx.recv_timeout(Duration::from_millis(100)) else {
                continue;
            };

            match self.handle(&record, writer.as_mut())? {
                Handled::Sample => samples += 1,
                Handled::Other => {},
            }
        }

        service.stop();
        if let Some(writer) = writer.as_mut() {
            writer.flush()?;
        }

        let lost = dropped.load(Ordering::Relaxed);
        if lost > 0 {
            debug!("{} events dropped by the listener", lost);
        }
        println!("共 {samples} 次采样");
        Ok(())
    }

    fn handle(
        &self,
        record: &EventRecord,
        writer: Option<&mut BufWriter<File>>,
    ) -> Result<Handled> {
        let sample = match &record.event {
            DeviceEvent::NewData(taxels) => {
                if !self.quiet {
                    println!(
                        "[{}] {}\n{}",
                        record.timestamp_ms,
                        record.device,
                        format_grid(taxels)
                    );
                }
                SampleRecord::new(record, taxels, None)
            },
            DeviceEvent::NewGripperData { left, right } => {
                if !self.quiet {
                    println!(
                        "[{}] {} 左\n{}\n右\n{}",
                        record.timestamp_ms,
                        record.device,
                        format_grid(left),
                        format_grid(right)
                    );
                }
                SampleRecord::new(record, left, Some(&**right))
            },
            DeviceEvent::ConnectionError(msg) => bail!("连接丢失: {msg}"),
            DeviceEvent::ErrorClosingPort(msg) => {
                eprintln!("⚠️  关闭端口失败: {msg}");
                return Ok(Handled::Other);
            },
            other => {
                debug!("{}: {}", record.device, other.name());
                return Ok(Handled::Other);
            },
        };

        if let Some(writer) = writer {
            serde_json::to_writer(&mut *writer, &sample)?;
            writer.write_all(b"\n")?;
        }
        Ok(Handled::Sample)
    }
}

enum Handled {
    Sample,
    Other,
}

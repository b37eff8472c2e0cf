//! # TouchDetect CLI
//!
//! 触觉传感器命令行工具。
//!
//! ```bash
//! # USB-CAN 适配器，打印 10 帧
//! touchdetect-cli can /dev/ttyUSB0 --count 10
//!
//! # HDLC 串口设备，保存为 JSON Lines
//! touchdetect-cli serial /dev/ttyACM0 --output samples.jsonl
//!
//! # WSG 夹爪（左右两侧）
//! touchdetect-cli wsg 192.168.1.20 --config touchdetect.toml
//!
//! # 列出串口
//! touchdetect-cli ports
//! ```
//!
//! 日志级别由 `RUST_LOG` 控制（默认 `info`）。

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::{ConfigCommand, PortsCommand, StreamArgs};
use touchdetect_sdk::DeviceKind;

/// TouchDetect CLI - 触觉传感器命令行工具
#[derive(Parser, Debug)]
#[command(name = "touchdetect-cli")]
#[command(about = "Command-line interface for TouchDetect tactile sensors", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 读取 USB-CAN 适配器
    Can {
        /// 串口名称（如 /dev/ttyUSB0, COM3）
        port: String,

        /// 波特率（覆盖配置）
        #[arg(short, long)]
        baud_rate: Option<u32>,

        #[command(flatten)]
        args: StreamArgs,
    },

    /// 读取 HDLC 串口设备
    Serial {
        /// 串口名称（如 /dev/ttyACM0, COM4）
        port: String,

        /// 波特率（覆盖配置）
        #[arg(short, long)]
        baud_rate: Option<u32>,

        #[command(flatten)]
        args: StreamArgs,
    },

    /// 读取 WSG 夹爪（TCP）
    Wsg {
        /// 夹爪地址
        host: String,

        /// TCP 端口（覆盖配置）
        #[arg(short, long)]
        port: Option<u16>,

        #[command(flatten)]
        args: StreamArgs,
    },

    /// 列出可用串口
    Ports {
        #[command(flatten)]
        args: PortsCommand,
    },

    /// 配置文件
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    touchdetect_sdk::init_logger();

    let cli = Cli::parse();

    match cli.command {
        Commands::Can {
            port,
            baud_rate,
            args,
        } => {
            let config = args.load_config()?;
            let kind = DeviceKind::Can {
                port,
                baud_rate: baud_rate.unwrap_or(config.can.baud_rate),
            };
            args.execute(config, kind)
        },

        Commands::Serial {
            port,
            baud_rate,
            args,
        } => {
            let config = args.load_config()?;
            let kind = DeviceKind::Serial {
                port,
                baud_rate: baud_rate.unwrap_or(config.serial.baud_rate),
            };
            args.execute(config, kind)
        },

        Commands::Wsg { host, port, args } => {
            let config = args.load_config()?;
            let kind = DeviceKind::Tcp {
                host,
                port: port.unwrap_or(config.wsg.port),
            };
            args.execute(config, kind)
        },

        Commands::Ports { args } => args.execute(),

        Commands::Config(cmd) => cmd.execute(),
    }
}

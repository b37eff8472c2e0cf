//! 串口列表命令

use anyhow::Result;
use clap::Args;
use touchdetect_sdk::transport::find_ports;

/// 常见 USB 转串口芯片厂商
const KNOWN_MANUFACTURERS: &[&str] = &["FTDI", "Silicon Labs", "wch.cn", "STMicroelectronics"];

/// 串口列表参数
#[derive(Args, Debug)]
pub struct PortsCommand {
    /// 列出所有串口（不按厂商过滤）
    #[arg(short, long)]
    pub all: bool,
}

impl PortsCommand {
    pub fn execute(&self) -> Result<()> {
        let filter = if self.all { &[][..] } else { KNOWN_MANUFACTURERS };
        let ports = find_ports(filter)?;

        if ports.is_empty() {
            println!("未找到串口");
            if !self.all {
                println!("提示：使用 --all 列出所有串口");
            }
            return Ok(());
        }

        for port in ports {
            println!("{port}");
        }
        Ok(())
    }
}

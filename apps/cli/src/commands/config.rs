//! 配置管理命令
//!
//! 生成或检查 SDK 配置文件（TOML）

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use std::path::PathBuf;
use touchdetect_sdk::SdkConfig;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 写出默认配置
    Init {
        /// 输出文件路径
        path: PathBuf,

        /// 覆盖已存在的文件
        #[arg(short, long)]
        force: bool,
    },

    /// 显示生效的配置（未指定文件时显示默认值）
    Show {
        /// 配置文件路径
        path: Option<PathBuf>,
    },
}

impl ConfigCommand {
    pub fn execute(&self) -> Result<()> {
        match self {
            ConfigCommand::Init { path, force } => {
                if path.exists() && !force {
                    bail!("{} 已存在（使用 --force 覆盖）", path.display());
                }
                SdkConfig::default()
                    .save(path)
                    .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
                println!("✅ 已写入 {}", path.display());
            },
            ConfigCommand::Show { path } => {
                let config = match path {
                    Some(path) => SdkConfig::load(path)
                        .with_context(|| format!("读取配置文件失败: {}", path.display()))?,
                    None => SdkConfig::default(),
                };
                print!("{}", config.to_toml_string()?);
            },
        }
        Ok(())
    }
}

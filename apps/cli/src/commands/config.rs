//! 配置管理命令
//!
//! 用于管理 CLI 配置（默认总线参数、虚拟通道数）

use crate::utils::parse_int;
use anyhow::{Context, Result, bail};
use canlib_session::{BusConfig, OpenFlags};
use clap::Subcommand;
use std::fs;
use std::path::{Path, PathBuf};

/// 默认配置文件路径
pub fn default_config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;

    path.push("canlib");
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// 虚拟驱动提供的通道数
    pub virtual_channels: usize,

    /// 默认总线会话配置
    pub bus: BusConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            virtual_channels: 2,
            bus: BusConfig::default(),
        }
    }
}

impl CliConfig {
    /// 加载配置（文件不存在时返回默认配置）
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("读取配置文件失败")?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    /// 保存配置
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("创建配置目录失败")?;
        }

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, format!("# canlib CLI Configuration\n\n{}", content))
            .context("写入配置文件失败")?;

        Ok(())
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 默认通道号
        #[arg(long)]
        channel: Option<i32>,

        /// 打开标志（如 0x20）
        #[arg(long, value_parser = parse_int)]
        flags: Option<i64>,

        /// 波特率（bit/s）
        #[arg(long)]
        bitrate: Option<i64>,

        #[arg(long)]
        tseg1: Option<u32>,

        #[arg(long)]
        tseg2: Option<u32>,

        #[arg(long)]
        sjw: Option<u32>,

        #[arg(long)]
        no_samp: Option<u32>,

        /// 虚拟通道数
        #[arg(long)]
        virtual_channels: Option<usize>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称
        #[arg(default_value = "all")]
        key: String,
    },

    /// 显示配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Set {
                channel,
                flags,
                bitrate,
                tseg1,
                tseg2,
                sjw,
                no_samp,
                virtual_channels,
            } => {
                let mut config = CliConfig::load(path)?;

                if let Some(channel) = channel {
                    config.bus.channel = channel;
                }
                if let Some(flags) = flags {
                    let bits = u32::try_from(flags)
                        .with_context(|| format!("flags {} outside u32 range", flags))?;
                    config.bus.flags = OpenFlags(bits);
                }
                if let Some(bitrate) = bitrate {
                    config.bus.params.bitrate = bitrate;
                }
                if let Some(tseg1) = tseg1 {
                    config.bus.params.tseg1 = tseg1;
                }
                if let Some(tseg2) = tseg2 {
                    config.bus.params.tseg2 = tseg2;
                }
                if let Some(sjw) = sjw {
                    config.bus.params.sjw = sjw;
                }
                if let Some(no_samp) = no_samp {
                    config.bus.params.no_samp = no_samp;
                }
                if let Some(count) = virtual_channels {
                    config.virtual_channels = count;
                }

                config.save(path)?;
                tracing::info!("Saved configuration to {}", path.display());
                println!("✅ 配置已保存: {}", path.display());
                Ok(())
            },

            ConfigCommand::Get { key } => {
                let config = CliConfig::load(path)?;
                let params = &config.bus.params;

                match key.as_str() {
                    "channel" => println!("{}", config.bus.channel),
                    "flags" => println!("0x{:04X}", config.bus.flags.bits()),
                    "bitrate" => println!("{}", params.bitrate),
                    "tseg1" => println!("{}", params.tseg1),
                    "tseg2" => println!("{}", params.tseg2),
                    "sjw" => println!("{}", params.sjw),
                    "no_samp" => println!("{}", params.no_samp),
                    "virtual_channels" => println!("{}", config.virtual_channels),
                    "all" => print!("{}", toml::to_string_pretty(&config)?),
                    other => bail!("未知配置项: {}", other),
                }
                Ok(())
            },

            ConfigCommand::Path => {
                println!("{}", path.display());
                Ok(())
            },
        }
    }
}

//! # canlib CLI
//!
//! Command-line interface for canlib CAN sessions.
//!
//! ```bash
//! # 列出通道
//! canlib-cli channels
//!
//! # 解码驱动状态码和帧标志位
//! canlib-cli decode status -- -13
//! canlib-cli decode flags 0x0602
//!
//! # 在虚拟通道上回环收发
//! canlib-cli loopback --id 0x10 --data 01,02,03 --count 3
//!
//! # 配置默认总线参数
//! canlib-cli config set --bitrate 500000
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod utils;

use commands::{ChannelsCommand, CliConfig, ConfigCommand, DecodeCommand, LoopbackCommand};

/// canlib CLI - CAN 会话命令行工具
#[derive(Parser, Debug)]
#[command(name = "canlib-cli")]
#[command(about = "Command-line interface for canlib CAN sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认位于系统配置目录）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 列出驱动通道
    Channels {
        #[command(flatten)]
        args: ChannelsCommand,
    },

    /// 解码状态码 / 位掩码
    #[command(subcommand)]
    Decode(DecodeCommand),

    /// 在两个虚拟通道之间回环收发
    Loopback {
        #[command(flatten)]
        args: LoopbackCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("canlib_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => commands::config::default_config_file()?,
    };

    match cli.command {
        Commands::Config(cmd) => cmd.execute(&config_path),

        Commands::Channels { args } => {
            let config = CliConfig::load(&config_path)?;
            args.execute(&config)
        },

        Commands::Decode(cmd) => cmd.execute(),

        Commands::Loopback { args } => {
            let config = CliConfig::load(&config_path)?;
            args.execute(&config)
        },
    }
}

//! 命令定义和实现

pub mod channels;
pub mod config;
pub mod decode;
pub mod loopback;

pub use channels::ChannelsCommand;
pub use config::{CliConfig, ConfigCommand};
pub use decode::DecodeCommand;
pub use loopback::LoopbackCommand;

use canlib_adapter::VirtualDriver;

/// 按配置构造驱动（目前只有进程内虚拟驱动）
pub fn driver_for(config: &CliConfig) -> VirtualDriver {
    VirtualDriver::builder()
        .virtual_channels(config.virtual_channels)
        .build()
}

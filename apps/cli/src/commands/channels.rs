//! 通道列表命令

use super::{CliConfig, driver_for};
use anyhow::Result;
use canlib_adapter::{CanlibDriver, CanlibError, ChannelInfo};
use clap::Args;

/// 通道列表参数
#[derive(Args, Debug)]
pub struct ChannelsCommand {
    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl ChannelsCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let driver = driver_for(config);
        let count = driver
            .channel_count()
            .map_err(|status| CanlibError::new("canGetNumberOfChannels", status))?;

        let channels = (0..count)
            .map(|channel| {
                driver
                    .channel_info(channel)
                    .map_err(|status| CanlibError::new("canGetChannelData", status))
            })
            .collect::<Result<Vec<ChannelInfo>, CanlibError>>()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&channels)?);
            return Ok(());
        }

        for info in &channels {
            println!("{}\t{:?}\t{}", info.channel, info.card_type, info.name);
        }
        Ok(())
    }
}

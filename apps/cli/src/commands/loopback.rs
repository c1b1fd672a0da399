//! 回环命令
//!
//! 在两个通道上各打开一个会话，发送帧并在对端读回。

use super::{CliConfig, driver_for};
use crate::utils::{parse_bytes, parse_int};
use anyhow::{Context, Result, anyhow};
use canlib_protocol::constants::MSG_STD;
use canlib_protocol::Frame;
use canlib_session::{
    BusBuilder, CanlibDriver, HandleRegistry, Received, RetryPolicy, read_until, write_with_retry,
};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 回环参数
#[derive(Args, Debug)]
pub struct LoopbackCommand {
    /// 发送通道（默认取配置中的通道）
    #[arg(long)]
    pub tx_channel: Option<i32>,

    /// 接收通道（默认取发送通道之外的第一个通道）
    #[arg(long)]
    pub rx_channel: Option<i32>,

    /// 帧 ID（11-bit）
    #[arg(long, default_value = "0x10", value_parser = parse_int)]
    pub id: i64,

    /// 帧数据（十六进制字节，逗号或空格分隔）
    #[arg(long, default_value = "01,02,03")]
    pub data: String,

    /// DLC（默认等于数据长度）
    #[arg(long, value_parser = parse_int)]
    pub dlc: Option<i64>,

    /// 帧标志位
    #[arg(long, default_value_t = i64::from(MSG_STD), value_parser = parse_int)]
    pub flags: i64,

    /// 发送次数
    #[arg(short, long, default_value_t = 1)]
    pub count: u32,

    /// 每帧的接收超时（毫秒）
    #[arg(long, default_value_t = 1000)]
    pub timeout_ms: u64,

    /// 以 JSON Lines 输出
    #[arg(long)]
    pub json: bool,
}

impl LoopbackCommand {
    pub fn execute(&self, config: &CliConfig) -> Result<()> {
        let tx_channel = self.tx_channel.unwrap_or(config.bus.channel);
        let rx_channel = self
            .rx_channel
            .unwrap_or(if tx_channel == 0 { 1 } else { 0 });
        let timeout = Duration::from_millis(self.timeout_ms);

        let data = parse_bytes(&self.data)?;
        let frame = Frame::builder()
            .device_id(self.id)
            .payload(data.iter().copied())
            .dlc(self.dlc.unwrap_or(data.len() as i64))
            .flags(self.flags)
            .build()?;

        let driver: Arc<dyn CanlibDriver> = Arc::new(driver_for(config));
        let registry = Arc::new(HandleRegistry::new(driver));

        let mut tx = BusBuilder::from_config(config.bus.clone())
            .channel(tx_channel)
            .name("tx")
            .open(&registry)
            .with_context(|| format!("打开发送通道 {} 失败", tx_channel))?;
        let mut rx = BusBuilder::from_config(config.bus.clone())
            .channel(rx_channel)
            .name("rx")
            .open(&registry)
            .with_context(|| format!("打开接收通道 {} 失败", rx_channel))?;

        let policy = RetryPolicy::default();
        for _ in 0..self.count {
            write_with_retry(&mut tx, &frame, &policy)?;
            let received = read_until(&mut rx, timeout, |r| matches!(r, Received::Frame(_)))?
                .ok_or_else(|| {
                    anyhow!(
                        "no frame received on channel {} within {} ms",
                        rx_channel,
                        self.timeout_ms
                    )
                })?;

            if self.json {
                println!("{}", serde_json::to_string(&received)?);
            } else {
                println!("{}", received);
            }
        }

        tx.close()?;
        rx.close()?;
        info!(
            "Loopback of {} frame(s) from channel {} to {} complete",
            self.count, tx_channel, rx_channel
        );
        Ok(())
    }
}

//! Builder 模式实现
//!
//! 提供链式构造 [`Bus`] 的便捷方式，以及可从配置文件反序列化的 [`BusConfig`]。

use crate::bus::Bus;
use crate::error::BusError;
use crate::registry::HandleRegistry;
use canlib_adapter::{BusParams, OpenFlags};
use std::sync::Arc;

/// 总线会话配置
///
/// 启用 `serde` feature 后可以直接从 TOML / JSON 读取，总线参数字段与
/// `channel` 位于同一层级：
///
/// ```toml
/// channel = 1
/// flags = 32
/// bitrate = 500000
/// tseg1 = 4
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BusConfig {
    pub channel: i32,
    /// 打开标志（默认 `ACCEPT_VIRTUAL`，便于在虚拟通道上直接使用）
    pub flags: OpenFlags,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub params: BusParams,
    /// 日志中使用的会话名（默认 `can<channel>`）
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            flags: OpenFlags::ACCEPT_VIRTUAL,
            params: BusParams::default(),
            name: None,
        }
    }
}

/// Bus Builder（链式构造）
///
/// # Example
///
/// ```rust
/// use canlib_adapter::{OpenFlags, VirtualDriver};
/// use canlib_session::{Bus, HandleRegistry};
/// use std::sync::Arc;
///
/// let registry = Arc::new(HandleRegistry::new(Arc::new(VirtualDriver::new())));
/// let bus = Bus::builder()
///     .channel(1)
///     .flags(OpenFlags::ACCEPT_VIRTUAL | OpenFlags::ACCEPT_LARGE_DLC)
///     .bitrate(500_000)
///     .name("body")
///     .open(&registry)
///     .unwrap();
/// assert_eq!(bus.name(), "body");
/// ```
#[derive(Debug, Clone, Default)]
pub struct BusBuilder {
    config: BusConfig,
}

impl BusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有配置开始构造
    pub fn from_config(config: BusConfig) -> Self {
        Self { config }
    }

    pub fn channel(mut self, channel: i32) -> Self {
        self.config.channel = channel;
        self
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.config.flags = flags;
        self
    }

    /// 设置波特率（bit/s）
    pub fn bitrate(mut self, bitrate: i64) -> Self {
        self.config.params.bitrate = bitrate;
        self
    }

    pub fn tseg1(mut self, tseg1: u32) -> Self {
        self.config.params.tseg1 = tseg1;
        self
    }

    pub fn tseg2(mut self, tseg2: u32) -> Self {
        self.config.params.tseg2 = tseg2;
        self
    }

    pub fn sjw(mut self, sjw: u32) -> Self {
        self.config.params.sjw = sjw;
        self
    }

    pub fn no_samp(mut self, no_samp: u32) -> Self {
        self.config.params.no_samp = no_samp;
        self
    }

    /// 整体替换总线参数
    pub fn params(mut self, params: BusParams) -> Self {
        self.config.params = params;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn open(self, registry: &Arc<HandleRegistry>) -> Result<Bus, BusError> {
        Bus::open(registry, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BusConfig::default();
        assert_eq!(config.channel, 0);
        assert_eq!(config.flags, OpenFlags::ACCEPT_VIRTUAL);
        assert_eq!(config.params, BusParams::default());
        assert!(config.name.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let builder = BusBuilder::new()
            .channel(3)
            .flags(OpenFlags::EXCLUSIVE)
            .bitrate(250_000)
            .tseg1(5)
            .tseg2(2)
            .sjw(2)
            .no_samp(3)
            .name("powertrain");
        let config = builder.config();
        assert_eq!(config.channel, 3);
        assert_eq!(config.flags, OpenFlags::EXCLUSIVE);
        assert_eq!(
            config.params,
            BusParams {
                bitrate: 250_000,
                tseg1: 5,
                tseg2: 2,
                sjw: 2,
                no_samp: 3,
                sync_mode: 0,
            }
        );
        assert_eq!(config.name.as_deref(), Some("powertrain"));
    }

    #[test]
    fn test_from_config_keeps_fields() {
        let config = BusConfig {
            channel: 1,
            name: Some("x".to_string()),
            ..BusConfig::default()
        };
        let builder = BusBuilder::from_config(config.clone()).bitrate(125_000);
        assert_eq!(builder.config().channel, 1);
        assert_eq!(builder.config().params.bitrate, 125_000);
        assert_eq!(builder.config().name, config.name);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_from_toml() {
        let config: BusConfig = toml::from_str(
            r#"
            channel = 1
            bitrate = 500000
            tseg1 = 6
            name = "chassis"
            "#,
        )
        .unwrap();
        assert_eq!(config.channel, 1);
        assert_eq!(config.flags, OpenFlags::ACCEPT_VIRTUAL);
        assert_eq!(config.params.bitrate, 500_000);
        assert_eq!(config.params.tseg1, 6);
        assert_eq!(config.params.tseg2, BusParams::default().tseg2);
        assert_eq!(config.name.as_deref(), Some("chassis"));
    }
}

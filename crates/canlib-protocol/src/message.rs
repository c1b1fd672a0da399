//! CAN 数据帧与信息消息
//!
//! [`Frame`] 和 [`InfoMessage`] 都是构造即校验的不可变值：
//! 只有全部字段通过校验才会得到实例，之后字段只读。

use crate::status::MessageFlags;
use crate::validation::{Checker, ValidationError};
use std::fmt;

/// CAN 数据帧（标准 11-bit ID）
///
/// # 字段约束
///
/// - `timestamp`：秒，有限且 `>= 0`
/// - `device_id`：`[0, 2047]`
/// - `payload`：0-8 字节
/// - `dlc`：`[0, 8]`，**不要求**等于 `payload.len()`（错误帧上硬件上报的 DLC
///   可能与实际捕获的字节数不一致）
/// - `flags`：16-bit 标志位，含义见 [`MessageFlags`]
///
/// # 示例
///
/// ```rust
/// use canlib_protocol::Frame;
///
/// let frame = Frame::builder()
///     .device_id(0x0040)
///     .timestamp(1.23456)
///     .payload([0xb0, 0x81, 0x50])
///     .dlc(3)
///     .flags(1 << 15)
///     .build()
///     .unwrap();
///
/// assert_eq!(frame.to_string(), "1.234560\t0040\t8000\t3\tb0 81 50");
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Frame {
    timestamp: f64,
    device_id: u16,
    payload: Vec<u8>,
    dlc: u8,
    flags: u16,
}

impl Frame {
    pub fn builder() -> FrameBuilder {
        FrameBuilder::default()
    }

    /// 创建发送帧（时间戳为 0）
    pub fn new(
        device_id: impl Into<i64>,
        payload: &[u8],
        dlc: impl Into<i64>,
        flags: impl Into<i64>,
    ) -> Result<Self, ValidationError> {
        Self::builder()
            .device_id(device_id)
            .payload(payload.iter().copied())
            .dlc(dlc)
            .flags(flags)
            .build()
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// 解码后的标志位
    pub fn message_flags(&self) -> MessageFlags {
        MessageFlags::from_raw(self.flags)
    }

    pub fn is_error_frame(&self) -> bool {
        self.message_flags().error_frame()
    }

    pub fn is_remote(&self) -> bool {
        self.message_flags().rtr()
    }

    /// 除时间戳外的字段是否全部相同（用于回环比对）
    pub fn same_content(&self, other: &Frame) -> bool {
        self.device_id == other.device_id
            && self.payload == other.payload
            && self.dlc == other.dlc
            && self.flags == other.flags
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self
            .payload
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(" ");
        write!(
            f,
            "{:.6}\t{:04x}\t{:04x}\t{}\t{}",
            self.timestamp, self.device_id, self.flags, self.dlc, bytes
        )
    }
}

/// [`Frame`] 构造器
///
/// 整数字段以 `i64` 接收，越界值在 [`FrameBuilder::build`] 中统一校验，
/// 而不是在类型转换时被截断。
#[derive(Debug, Clone, Default)]
pub struct FrameBuilder {
    timestamp: f64,
    device_id: i64,
    payload: Vec<i64>,
    dlc: i64,
    flags: i64,
}

impl FrameBuilder {
    pub fn timestamp(mut self, seconds: f64) -> Self {
        self.timestamp = seconds;
        self
    }

    pub fn device_id(mut self, id: impl Into<i64>) -> Self {
        self.device_id = id.into();
        self
    }

    pub fn payload<I, T>(mut self, bytes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<i64>,
    {
        self.payload = bytes.into_iter().map(Into::into).collect();
        self
    }

    pub fn dlc(mut self, dlc: impl Into<i64>) -> Self {
        self.dlc = dlc.into();
        self
    }

    pub fn flags(mut self, flags: impl Into<i64>) -> Self {
        self.flags = flags.into();
        self
    }

    pub fn build(self) -> Result<Frame, ValidationError> {
        Checker::default()
            .timestamp(self.timestamp)
            .device_id(self.device_id)
            .payload(&self.payload)
            .dlc(self.dlc)
            .flags(self.flags)
            .finish("Frame")?;

        // 以下转换在校验通过后不会截断
        Ok(Frame {
            timestamp: self.timestamp,
            device_id: self.device_id as u16,
            payload: self.payload.iter().map(|&b| b as u8).collect(),
            dlc: self.dlc as u8,
            flags: self.flags as u16,
        })
    }
}

/// 带外信息消息（总线状态变化、无数据帧的收发事件等）
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InfoMessage {
    timestamp: f64,
    info: Option<String>,
}

impl InfoMessage {
    /// 创建不带文本的信息消息
    pub fn new(timestamp: f64) -> Result<Self, ValidationError> {
        Self::build(timestamp, None)
    }

    pub fn with_info(timestamp: f64, info: impl Into<String>) -> Result<Self, ValidationError> {
        Self::build(timestamp, Some(info.into()))
    }

    fn build(timestamp: f64, info: Option<String>) -> Result<Self, ValidationError> {
        Checker::default().timestamp(timestamp).finish("InfoMessage")?;
        Ok(Self { timestamp, info })
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }
}

impl fmt::Display for InfoMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.info {
            Some(info) => write!(f, "{:.6}\t{}", self.timestamp, info),
            None => write!(f, "{:.6}", self.timestamp),
        }
    }
}

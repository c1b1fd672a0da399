//! # canlib Adapter Layer
//!
//! 驱动接口抽象：会话层只通过 [`CanlibDriver`] 访问硬件。
//! 所有驱动方法返回原始 [`StatusCode`]，由上层负责分类和包装。

use canlib_protocol::{Disposition, ErrorKind, EventKind, StatusCode};
use std::fmt;
use std::ops::BitOr;
use thiserror::Error;

#[cfg(feature = "virtual")]
pub mod virtual_driver;

#[cfg(feature = "virtual")]
pub use virtual_driver::{VirtualChannel, VirtualDriver, VirtualDriverBuilder};

/// 驱动函数调用失败
///
/// 消息格式固定为 `function <op> failed - <description> (code <n>)`，
/// 调用方可以分别匹配前缀和数值状态码。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("function {function} failed - {} (code {})", .status.description(), .status.code())]
pub struct CanlibError {
    pub function: &'static str,
    pub status: StatusCode,
}

impl CanlibError {
    pub fn new(function: &'static str, status: impl Into<StatusCode>) -> Self {
        Self {
            function,
            status: status.into(),
        }
    }

    pub fn code(&self) -> i32 {
        self.status.code()
    }

    pub fn kind(&self) -> ErrorKind {
        self.status.error_kind().unwrap_or(ErrorKind::Unknown)
    }

    pub fn disposition(&self) -> Disposition {
        self.kind().disposition()
    }

    /// 瞬态条件（发送缓冲区满、超时等），调用方可以退避后重试
    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }
}

/// 驱动分配的原始句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(pub i32);

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 句柄方向：同一物理通道的读写消费者各自持有独立句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// 打开通道的标志位（canOPEN_*）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const NONE: OpenFlags = OpenFlags(0);
    pub const EXCLUSIVE: OpenFlags = OpenFlags(0x0008);
    pub const REQUIRE_EXTENDED: OpenFlags = OpenFlags(0x0010);
    pub const ACCEPT_VIRTUAL: OpenFlags = OpenFlags(0x0020);
    pub const OVERRIDE_EXCLUSIVE: OpenFlags = OpenFlags(0x0040);
    pub const REQUIRE_INIT_ACCESS: OpenFlags = OpenFlags(0x0080);
    pub const NO_INIT_ACCESS: OpenFlags = OpenFlags(0x0100);
    pub const ACCEPT_LARGE_DLC: OpenFlags = OpenFlags(0x0200);

    /// 驱动定义的全部标志位
    pub const DEFINED_MASK: u32 = 0x03F8;

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// 驱动未定义的位（非零表示标志非法）
    pub const fn undefined_bits(&self) -> u32 {
        self.0 & !Self::DEFINED_MASK
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        OpenFlags(self.0 | rhs.0)
    }
}

/// 总线参数（对会话层不透明，原样转发给驱动）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BusParams {
    /// 波特率（bit/s）
    pub bitrate: i64,
    pub tseg1: u32,
    pub tseg2: u32,
    pub sjw: u32,
    /// 采样点数（1 或 3）
    pub no_samp: u32,
    pub sync_mode: u32,
}

impl Default for BusParams {
    fn default() -> Self {
        Self {
            bitrate: 1_000_000,
            tseg1: 4,
            tseg2: 3,
            sjw: 1,
            no_samp: 1,
            sync_mode: 0,
        }
    }
}

/// 通道卡类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CardType {
    None,
    Virtual,
    Physical,
}

/// 通道信息（canGetChannelData 的子集）
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChannelInfo {
    pub channel: i32,
    pub card_type: CardType,
    pub name: String,
}

/// 驱动读到的数据帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    pub id: u32,
    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],
    /// 实际捕获的字节数 (0-8)
    pub len: u8,
    /// 硬件上报的 DLC，可能与 `len` 不一致
    pub dlc: u32,
    pub flags: u32,
    /// 驱动时钟（微秒）
    pub timestamp_us: u64,
}

impl RawMessage {
    /// 获取数据切片（只包含有效数据）
    ///
    /// `len` 超过 8 时（例如 `ACCEPT_LARGE_DLC` 下的硬件上报）截断到缓冲区长度。
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(self.data.len())]
    }
}

/// 驱动读到的事件（无数据帧）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventKind,
    /// 事件发生时的总线状态位
    pub status: u32,
    pub timestamp_us: u64,
}

/// 一次读取的结果：数据帧与事件互斥
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawRead {
    Message(RawMessage),
    Event(RawEvent),
}

/// 驱动接口
///
/// 语义与 canlib 一致：
/// - 所有方法同步返回，可能因硬件 IO 短暂阻塞
/// - `read()` 非阻塞，队列为空时返回 `ERR_NOMSG`
/// - 已关闭或从未分配的句柄返回 `ERR_INVHANDLE`
///
/// 驱动本身不保证同一句柄的并发访问安全，句柄生命周期由会话层管理。
pub trait CanlibDriver: Send + Sync {
    /// 可用通道数
    fn channel_count(&self) -> Result<i32, StatusCode>;

    /// 通道信息（用于区分虚拟/物理通道）
    fn channel_info(&self, channel: i32) -> Result<ChannelInfo, StatusCode>;

    /// 打开通道，返回新句柄
    fn open(
        &self,
        channel: i32,
        direction: Direction,
        flags: OpenFlags,
    ) -> Result<RawHandle, StatusCode>;

    fn set_bus_params(&self, handle: RawHandle, params: &BusParams) -> Result<(), StatusCode>;

    fn bus_on(&self, handle: RawHandle) -> Result<(), StatusCode>;

    fn bus_off(&self, handle: RawHandle) -> Result<(), StatusCode>;

    fn close(&self, handle: RawHandle) -> Result<(), StatusCode>;

    fn write(
        &self,
        handle: RawHandle,
        id: u32,
        data: &[u8],
        dlc: u32,
        flags: u32,
    ) -> Result<(), StatusCode>;

    /// 非阻塞读取一条消息或事件
    fn read(&self, handle: RawHandle) -> Result<RawRead, StatusCode>;

    /// 驱动单调时钟（微秒）
    fn read_timer(&self, handle: RawHandle) -> Result<u64, StatusCode>;

    /// 总线状态位（canSTAT_*）
    fn read_status(&self, handle: RawHandle) -> Result<u32, StatusCode>;
}

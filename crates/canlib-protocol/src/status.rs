//! 驱动状态码解码
//!
//! - [`StatusCode`]：驱动函数返回的有符号状态码（`>= 0` 为成功）
//! - [`ErrorKind`]：负状态码的枚举分类
//! - [`ChipStatus`]：总线状态位掩码（canReadStatus）
//! - [`MessageFlags`]：帧标志位（消息位 + 帧错误位）
//! - [`EventKind`]：驱动事件码（canEVENT_*）
//!
//! 所有解码都是纯函数，没有失败路径：未知的负状态码归类为 [`ErrorKind::Unknown`]。

use crate::constants::*;
use bilge::prelude::*;
use std::fmt;

// ============================================================================
// 状态码
// ============================================================================

/// 负状态码的分类
///
/// 取值与驱动头文件一致。保留码（-6、-14、-20 等）和未登记的负值
/// 统一映射为 [`ErrorKind::Unknown`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(i32)]
pub enum ErrorKind {
    Param = -1,
    NoMsg = -2,
    NotFound = -3,
    NoMem = -4,
    NoChannels = -5,
    Timeout = -7,
    NotInitialized = -8,
    NoHandles = -9,
    InvalidHandle = -10,
    IniFile = -11,
    Driver = -12,
    TxBufferOverflow = -13,
    Hardware = -15,
    DynaLoad = -16,
    DynaLib = -17,
    DynaInit = -18,
    NotSupported = -19,
    DriverLoad = -23,
    DriverFailed = -24,
    NoConfigMgr = -25,
    NoCard = -26,
    Registry = -28,
    License = -29,
    Internal = -30,
    NoAccess = -31,
    NotImplemented = -32,
    #[num_enum(default)]
    Unknown = i32::MIN,
}

/// 调用方对失败状态应采取的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 瞬态条件：稍后重试（轮询空队列、发送缓冲区满、超时）
    Retry,
    /// 参数或配置问题：上报给调用方，会话本身仍可用
    Report,
    /// 会话或设备已损坏：不应重试
    Fatal,
}

impl ErrorKind {
    /// 驱动对该错误的文字描述（用于错误消息模板）
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Param => "Error in parameter",
            ErrorKind::NoMsg => "No messages available",
            ErrorKind::NotFound => "Specified device not found",
            ErrorKind::NoMem => "Out of memory",
            ErrorKind::NoChannels => "No channels available",
            ErrorKind::Timeout => "Timeout occurred",
            ErrorKind::NotInitialized => "Library not initialized",
            ErrorKind::NoHandles => "Can't get handle",
            ErrorKind::InvalidHandle => "Handle is invalid",
            ErrorKind::IniFile => "Error in the ini-file",
            ErrorKind::Driver => "CAN driver type not supported",
            ErrorKind::TxBufferOverflow => "Transmit buffer overflow",
            ErrorKind::Hardware => "A hardware error was detected",
            ErrorKind::DynaLoad => "Can not find requested DLL",
            ErrorKind::DynaLib => "DLL seems to be wrong version",
            ErrorKind::DynaInit => "Error when initializing DLL",
            ErrorKind::NotSupported => "Operation not supported by hardware or firmware",
            ErrorKind::DriverLoad => "Can't find or load kernel driver",
            ErrorKind::DriverFailed => "DeviceIOControl failed",
            ErrorKind::NoConfigMgr => "Can't find required configuration software",
            ErrorKind::NoCard => "The card was removed or not inserted",
            ErrorKind::Registry => "Error (missing data) in the Registry",
            ErrorKind::License => "The license is not valid",
            ErrorKind::Internal => "Internal error in the driver",
            ErrorKind::NoAccess => "Access denied",
            ErrorKind::NotImplemented => "Not implemented",
            ErrorKind::Unknown => "Unknown error",
        }
    }

    /// 该错误的处理方式
    pub fn disposition(&self) -> Disposition {
        match self {
            ErrorKind::NoMsg | ErrorKind::Timeout | ErrorKind::TxBufferOverflow => {
                Disposition::Retry
            },
            ErrorKind::Param
            | ErrorKind::NotFound
            | ErrorKind::NoChannels
            | ErrorKind::NoHandles
            | ErrorKind::NotInitialized
            | ErrorKind::IniFile
            | ErrorKind::NoConfigMgr
            | ErrorKind::NoCard
            | ErrorKind::Registry
            | ErrorKind::License
            | ErrorKind::NoAccess => Disposition::Report,
            ErrorKind::NoMem
            | ErrorKind::InvalidHandle
            | ErrorKind::Driver
            | ErrorKind::Hardware
            | ErrorKind::DynaLoad
            | ErrorKind::DynaLib
            | ErrorKind::DynaInit
            | ErrorKind::NotSupported
            | ErrorKind::DriverLoad
            | ErrorKind::DriverFailed
            | ErrorKind::Internal
            | ErrorKind::NotImplemented
            | ErrorKind::Unknown => Disposition::Fatal,
        }
    }
}

/// 状态码分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Error(ErrorKind),
}

/// 驱动函数返回的原始状态码
///
/// 约定与驱动一致：只有负值表示失败；0 和正值都是成功，
/// 正值可能携带附加信息（例如队列中的消息数）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatusCode(i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);
    pub const ERR_PARAM: StatusCode = StatusCode(-1);
    pub const ERR_NOMSG: StatusCode = StatusCode(-2);
    pub const ERR_NOTFOUND: StatusCode = StatusCode(-3);
    pub const ERR_TIMEOUT: StatusCode = StatusCode(-7);
    pub const ERR_NOHANDLES: StatusCode = StatusCode(-9);
    pub const ERR_INVHANDLE: StatusCode = StatusCode(-10);
    pub const ERR_TXBUFOFL: StatusCode = StatusCode(-13);
    pub const ERR_HARDWARE: StatusCode = StatusCode(-15);
    pub const ERR_NOT_SUPPORTED: StatusCode = StatusCode(-19);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(&self) -> i32 {
        self.0
    }

    pub const fn is_success(&self) -> bool {
        self.0 >= 0
    }

    /// 分类状态码
    pub fn kind(&self) -> StatusKind {
        if self.is_success() {
            StatusKind::Success
        } else {
            StatusKind::Error(ErrorKind::from(self.0))
        }
    }

    /// 失败时的错误分类，成功时返回 `None`
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.kind() {
            StatusKind::Success => None,
            StatusKind::Error(kind) => Some(kind),
        }
    }

    pub fn description(&self) -> &'static str {
        match self.kind() {
            StatusKind::Success => "OK",
            StatusKind::Error(kind) => kind.description(),
        }
    }

    /// 成功时返回 `Ok(code)`（保留正值中的附加信息），失败时返回自身
    pub fn check(self) -> Result<i32, StatusCode> {
        if self.is_success() { Ok(self.0) } else { Err(self) }
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<ErrorKind> for StatusCode {
    /// `Unknown` 没有对应的固定值，映射为驱动保留的最后一个码
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Unknown => Self(-33),
            other => Self(other as i32),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.description(), self.0)
    }
}

// ============================================================================
// 总线状态位掩码
// ============================================================================

/// 总线状态位（canReadStatus 返回值）
///
/// 各位互不排斥，可以同时置位。
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChipStatus {
    pub error_passive: bool, // Bit 0
    pub bus_off: bool,       // Bit 1
    pub error_warning: bool, // Bit 2
    pub error_active: bool,  // Bit 3
    pub tx_pending: bool,    // Bit 4
    pub rx_pending: bool,    // Bit 5
    reserved_1: bool,        // Bit 6
    pub tx_error: bool,      // Bit 7
    pub rx_error: bool,      // Bit 8
    pub hw_overrun: bool,    // Bit 9
    pub sw_overrun: bool,    // Bit 10
    reserved_2: u21,         // Bit 11-31
}

/// 单个总线状态条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipCondition {
    ErrorPassive,
    BusOff,
    ErrorWarning,
    ErrorActive,
    TxPending,
    RxPending,
    TxError,
    RxError,
    HwOverrun,
    SwOverrun,
}

const CHIP_CONDITIONS: [(u32, ChipCondition); 10] = [
    (STAT_ERROR_PASSIVE, ChipCondition::ErrorPassive),
    (STAT_BUS_OFF, ChipCondition::BusOff),
    (STAT_ERROR_WARNING, ChipCondition::ErrorWarning),
    (STAT_ERROR_ACTIVE, ChipCondition::ErrorActive),
    (STAT_TX_PENDING, ChipCondition::TxPending),
    (STAT_RX_PENDING, ChipCondition::RxPending),
    (STAT_TXERR, ChipCondition::TxError),
    (STAT_RXERR, ChipCondition::RxError),
    (STAT_HW_OVERRUN, ChipCondition::HwOverrun),
    (STAT_SW_OVERRUN, ChipCondition::SwOverrun),
];

impl ChipStatus {
    pub fn from_raw(raw: u32) -> Self {
        Self::from(raw)
    }

    pub fn raw(&self) -> u32 {
        u32::from(*self)
    }

    /// 硬件或软件溢出任一置位
    pub fn is_overrun(&self) -> bool {
        self.raw() & STAT_OVERRUN != 0
    }

    /// 按位序列出所有置位的条件
    pub fn conditions(&self) -> Vec<ChipCondition> {
        let raw = self.raw();
        CHIP_CONDITIONS
            .iter()
            .filter(|(mask, _)| raw & mask != 0)
            .map(|(_, condition)| *condition)
            .collect()
    }
}

impl fmt::Display for ChipCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChipCondition::ErrorPassive => "ERROR_PASSIVE",
            ChipCondition::BusOff => "BUS_OFF",
            ChipCondition::ErrorWarning => "ERROR_WARNING",
            ChipCondition::ErrorActive => "ERROR_ACTIVE",
            ChipCondition::TxPending => "TX_PENDING",
            ChipCondition::RxPending => "RX_PENDING",
            ChipCondition::TxError => "TXERR",
            ChipCondition::RxError => "RXERR",
            ChipCondition::HwOverrun => "HW_OVERRUN",
            ChipCondition::SwOverrun => "SW_OVERRUN",
        };
        f.write_str(name)
    }
}

// ============================================================================
// 帧标志位
// ============================================================================

/// 帧标志位（16-bit）
///
/// 低字节为消息属性（canMSG_*），高字节为帧错误（canMSGERR_*）。
#[bitsize(16)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    pub rtr: bool,         // Bit 0
    pub standard: bool,    // Bit 1
    pub extended: bool,    // Bit 2
    pub wakeup: bool,      // Bit 3
    pub nerr: bool,        // Bit 4
    pub error_frame: bool, // Bit 5
    pub tx_ack: bool,      // Bit 6
    pub tx_request: bool,  // Bit 7
    reserved: bool,        // Bit 8
    pub hw_overrun: bool,  // Bit 9
    pub sw_overrun: bool,  // Bit 10
    pub stuff_error: bool, // Bit 11
    pub form_error: bool,  // Bit 12
    pub crc_error: bool,   // Bit 13
    pub bit0_error: bool,  // Bit 14
    pub bit1_error: bool,  // Bit 15
}

/// 单个帧错误条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameErrorKind {
    HwOverrun,
    SwOverrun,
    Stuff,
    Form,
    Crc,
    Bit0,
    Bit1,
}

const FRAME_ERRORS: [(u16, FrameErrorKind); 7] = [
    (MSGERR_HW_OVERRUN, FrameErrorKind::HwOverrun),
    (MSGERR_SW_OVERRUN, FrameErrorKind::SwOverrun),
    (MSGERR_STUFF, FrameErrorKind::Stuff),
    (MSGERR_FORM, FrameErrorKind::Form),
    (MSGERR_CRC, FrameErrorKind::Crc),
    (MSGERR_BIT0, FrameErrorKind::Bit0),
    (MSGERR_BIT1, FrameErrorKind::Bit1),
];

impl MessageFlags {
    pub fn from_raw(raw: u16) -> Self {
        Self::from(raw)
    }

    pub fn raw(&self) -> u16 {
        u16::from(*self)
    }

    pub fn is_overrun(&self) -> bool {
        self.raw() & MSGERR_OVERRUN != 0
    }

    pub fn is_bit_error(&self) -> bool {
        self.raw() & MSGERR_BIT != 0
    }

    pub fn is_bus_error(&self) -> bool {
        self.raw() & MSGERR_BUSERR != 0
    }

    /// 任一帧错误位置位
    pub fn has_errors(&self) -> bool {
        self.raw() & MSGERR_MASK != 0
    }

    /// 按位序列出所有置位的帧错误
    pub fn frame_errors(&self) -> Vec<FrameErrorKind> {
        let raw = self.raw();
        FRAME_ERRORS
            .iter()
            .filter(|(mask, _)| raw & mask != 0)
            .map(|(_, kind)| *kind)
            .collect()
    }
}

// ============================================================================
// 驱动事件码
// ============================================================================

/// 驱动事件码（canEVENT_*）
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(i32)]
pub enum EventKind {
    Rx = 32000,
    Tx = 32001,
    Error = 32002,
    Status = 32003,
    EnvVar = 32004,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Rx => "rx",
            EventKind::Tx => "tx",
            EventKind::Error => "error",
            EventKind::Status => "status",
            EventKind::EnvVar => "envvar",
        };
        f.write_str(name)
    }
}

//! canlib 协议常量定义
//!
//! 位掩码取值与驱动头文件保持一致，供状态解码和帧校验使用。

// ============================================================================
// 帧字段取值范围
// ============================================================================

/// 标准帧（11-bit）ID 最大值
pub const MAX_STANDARD_ID: i64 = 0x7FF;

/// 单帧最大数据长度（CAN 2.0）
pub const MAX_PAYLOAD_LEN: usize = 8;

/// DLC 最大值
pub const MAX_DLC: i64 = 8;

/// 帧标志位（16-bit）最大值
pub const MAX_FLAGS: i64 = 0xFFFF;

// ============================================================================
// 总线状态位（canSTAT_*）
// ============================================================================

pub const STAT_ERROR_PASSIVE: u32 = 0x0000_0001;
pub const STAT_BUS_OFF: u32 = 0x0000_0002;
pub const STAT_ERROR_WARNING: u32 = 0x0000_0004;
pub const STAT_ERROR_ACTIVE: u32 = 0x0000_0008;
pub const STAT_TX_PENDING: u32 = 0x0000_0010;
pub const STAT_RX_PENDING: u32 = 0x0000_0020;
pub const STAT_TXERR: u32 = 0x0000_0080;
pub const STAT_RXERR: u32 = 0x0000_0100;
pub const STAT_HW_OVERRUN: u32 = 0x0000_0200;
pub const STAT_SW_OVERRUN: u32 = 0x0000_0400;
pub const STAT_OVERRUN: u32 = STAT_HW_OVERRUN | STAT_SW_OVERRUN;

// ============================================================================
// 帧标志位（canMSG_* / canMSGERR_*）
// ============================================================================

pub const MSG_MASK: u16 = 0x00FF;
pub const MSG_RTR: u16 = 0x0001;
pub const MSG_STD: u16 = 0x0002;
pub const MSG_EXT: u16 = 0x0004;
pub const MSG_WAKEUP: u16 = 0x0008;
pub const MSG_NERR: u16 = 0x0010;
pub const MSG_ERROR_FRAME: u16 = 0x0020;
pub const MSG_TXACK: u16 = 0x0040;
pub const MSG_TXRQ: u16 = 0x0080;

pub const MSGERR_MASK: u16 = 0xFF00;
pub const MSGERR_HW_OVERRUN: u16 = 0x0200;
pub const MSGERR_SW_OVERRUN: u16 = 0x0400;
pub const MSGERR_STUFF: u16 = 0x0800;
pub const MSGERR_FORM: u16 = 0x1000;
pub const MSGERR_CRC: u16 = 0x2000;
pub const MSGERR_BIT0: u16 = 0x4000;
pub const MSGERR_BIT1: u16 = 0x8000;

/// 任一溢出（硬件或软件）
pub const MSGERR_OVERRUN: u16 = 0x0600;
/// 任一位错误
pub const MSGERR_BIT: u16 = 0xC000;
/// 任一总线错误（stuff/form/crc/bit）
pub const MSGERR_BUSERR: u16 = 0xF800;

// ============================================================================
// 通知掩码（canNOTIFY_*）
// ============================================================================

pub const NOTIFY_NONE: u32 = 0;
pub const NOTIFY_RX: u32 = 0x0001;
pub const NOTIFY_TX: u32 = 0x0002;
pub const NOTIFY_ERROR: u32 = 0x0004;
pub const NOTIFY_STATUS: u32 = 0x0008;
pub const NOTIFY_ENVVAR: u32 = 0x0010;

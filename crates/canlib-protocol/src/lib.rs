//! # canlib Protocol
//!
//! CAN 会话层的值类型定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `constants`: 状态位、帧标志位、通知掩码常量
//! - `status`: 状态码分类与位掩码解码
//! - `message`: 自校验的 `Frame` / `InfoMessage`
//! - `validation`: 字段校验与校验错误

pub mod constants;
pub mod message;
pub mod status;
pub mod validation;

pub use constants::*;
pub use message::{Frame, FrameBuilder, InfoMessage};
pub use status::{
    ChipCondition, ChipStatus, Disposition, ErrorKind, EventKind, FrameErrorKind, MessageFlags,
    StatusCode, StatusKind,
};
pub use validation::{Field, ValidationError, Violation};

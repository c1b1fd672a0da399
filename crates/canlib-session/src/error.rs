//! 会话层错误类型定义

use canlib_adapter::CanlibError;
use canlib_protocol::{ErrorKind, StatusCode, ValidationError};
use thiserror::Error;

/// 会话层错误类型
#[derive(Error, Debug)]
pub enum BusError {
    /// 通道号越界或打开参数被驱动拒绝（不分配任何驱动资源）
    #[error("Invalid bus parameter: {reason}")]
    InvalidBusParameter {
        reason: String,
        #[source]
        source: Option<CanlibError>,
    },

    /// 驱动调用失败
    #[error(transparent)]
    Canlib(#[from] CanlibError),

    /// 驱动上报的帧无法通过校验（例如扩展 ID 超出标准帧范围）
    #[error("Received frame rejected: {0}")]
    InvalidFrame(#[from] ValidationError),
}

impl BusError {
    pub(crate) fn invalid_parameter(reason: impl Into<String>) -> Self {
        BusError::InvalidBusParameter {
            reason: reason.into(),
            source: None,
        }
    }

    /// 驱动状态码（仅驱动错误有）
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BusError::Canlib(e) => Some(e.status),
            BusError::InvalidBusParameter { source, .. } => source.as_ref().map(|e| e.status),
            BusError::InvalidFrame(_) => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.status().and_then(|s| s.error_kind())
    }

    /// 瞬态驱动条件，可以由调用方退避后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::Canlib(e) if e.is_retryable())
    }

    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, BusError::Canlib(e) if e.kind() == ErrorKind::InvalidHandle)
    }

    pub fn is_invalid_bus_parameter(&self) -> bool {
        matches!(self, BusError::InvalidBusParameter { .. })
    }
}

//! 字段校验与校验错误
//!
//! 每个实体只有一个校验入口，收集全部违反的约束后一次性返回，
//! 调用方可以按字段检查具体是哪个约束失败。

use crate::constants::{MAX_DLC, MAX_FLAGS, MAX_PAYLOAD_LEN, MAX_STANDARD_ID};
use thiserror::Error;

/// 被校验的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Timestamp,
    DeviceId,
    Payload,
    Dlc,
    Flags,
}

/// 单个违反的约束
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Violation {
    #[error("timestamp {value} must be a finite number >= 0")]
    Timestamp { value: f64 },

    #[error("device id {value} outside [0, {max}]", max = MAX_STANDARD_ID)]
    DeviceId { value: i64 },

    #[error("payload length {len} exceeds {max} bytes", max = MAX_PAYLOAD_LEN)]
    PayloadLength { len: usize },

    #[error("payload byte #{index} = {value} outside [0, 255]")]
    PayloadByte { index: usize, value: i64 },

    #[error("dlc {value} outside [0, {max}]", max = MAX_DLC)]
    Dlc { value: i64 },

    #[error("flags {value} outside [0, {max}]", max = MAX_FLAGS)]
    Flags { value: i64 },
}

impl Violation {
    pub fn field(&self) -> Field {
        match self {
            Violation::Timestamp { .. } => Field::Timestamp,
            Violation::DeviceId { .. } => Field::DeviceId,
            Violation::PayloadLength { .. } | Violation::PayloadByte { .. } => Field::Payload,
            Violation::Dlc { .. } => Field::Dlc,
            Violation::Flags { .. } => Field::Flags,
        }
    }
}

/// 构造 `Frame` / `InfoMessage` 失败
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid {entity}: {}", join(.violations))]
pub struct ValidationError {
    pub entity: &'static str,
    pub violations: Vec<Violation>,
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// 指定字段是否校验失败
    pub fn has(&self, field: Field) -> bool {
        self.violations.iter().any(|v| v.field() == field)
    }

    /// 失败字段（按出现顺序去重）
    pub fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        for violation in &self.violations {
            let field = violation.field();
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }
}

/// 违规收集器
#[derive(Debug, Default)]
pub(crate) struct Checker {
    violations: Vec<Violation>,
}

impl Checker {
    pub(crate) fn timestamp(&mut self, value: f64) -> &mut Self {
        if !value.is_finite() || value < 0.0 {
            self.violations.push(Violation::Timestamp { value });
        }
        self
    }

    pub(crate) fn device_id(&mut self, value: i64) -> &mut Self {
        if !(0..=MAX_STANDARD_ID).contains(&value) {
            self.violations.push(Violation::DeviceId { value });
        }
        self
    }

    /// 长度和每个字节都独立检查，任一失败都会拒绝整帧
    pub(crate) fn payload(&mut self, bytes: &[i64]) -> &mut Self {
        if bytes.len() > MAX_PAYLOAD_LEN {
            self.violations.push(Violation::PayloadLength { len: bytes.len() });
        }
        for (index, &value) in bytes.iter().enumerate() {
            if !(0..=0xFF).contains(&value) {
                self.violations.push(Violation::PayloadByte { index, value });
            }
        }
        self
    }

    pub(crate) fn dlc(&mut self, value: i64) -> &mut Self {
        if !(0..=MAX_DLC).contains(&value) {
            self.violations.push(Violation::Dlc { value });
        }
        self
    }

    pub(crate) fn flags(&mut self, value: i64) -> &mut Self {
        if !(0..=MAX_FLAGS).contains(&value) {
            self.violations.push(Violation::Flags { value });
        }
        self
    }

    pub(crate) fn finish(&mut self, entity: &'static str) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                entity,
                violations: std::mem::take(&mut self.violations),
            })
        }
    }
}

//! 解码命令
//!
//! 把驱动返回的状态码、帧标志位和总线状态位翻译成可读文本

use crate::utils::parse_int;
use anyhow::{Context, Result};
use canlib_protocol::{ChipStatus, MessageFlags, StatusCode, StatusKind};
use clap::Subcommand;

/// 解码命令
#[derive(Subcommand, Debug)]
pub enum DecodeCommand {
    /// 驱动状态码（如 -13）
    Status {
        #[arg(allow_hyphen_values = true, value_parser = parse_int)]
        code: i64,
    },

    /// 帧标志位（canMSG_* / canMSGERR_*）
    Flags {
        #[arg(value_parser = parse_int)]
        value: i64,
    },

    /// 总线状态位（canSTAT_*）
    Chip {
        #[arg(value_parser = parse_int)]
        value: i64,
    },
}

impl DecodeCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            DecodeCommand::Status { code } => {
                let code = i32::try_from(code).context("status code outside i32 range")?;
                for line in describe_status(StatusCode::new(code)) {
                    println!("{}", line);
                }
            },

            DecodeCommand::Flags { value } => {
                let raw = u16::try_from(value).context("flags outside [0, 0xFFFF]")?;
                for line in describe_flags(MessageFlags::from_raw(raw)) {
                    println!("{}", line);
                }
            },

            DecodeCommand::Chip { value } => {
                let raw = u32::try_from(value).context("status bits outside u32 range")?;
                let status = ChipStatus::from_raw(raw);
                println!("raw:        0x{:08X}", status.raw());
                let names: Vec<String> = status.conditions().iter().map(|c| c.to_string()).collect();
                println!("conditions: {}", join_or_none(&names));
            },
        }
        Ok(())
    }
}

fn describe_status(status: StatusCode) -> Vec<String> {
    let mut lines = vec![format!("code:        {}", status.code())];
    match status.kind() {
        StatusKind::Success => lines.push("kind:        Success".to_string()),
        StatusKind::Error(kind) => {
            lines.push(format!("kind:        {:?}", kind));
            lines.push(format!("description: {}", kind.description()));
            lines.push(format!("disposition: {:?}", kind.disposition()));
        },
    }
    lines
}

fn describe_flags(flags: MessageFlags) -> Vec<String> {
    let attributes = [
        (flags.rtr(), "RTR"),
        (flags.standard(), "STD"),
        (flags.extended(), "EXT"),
        (flags.wakeup(), "WAKEUP"),
        (flags.nerr(), "NERR"),
        (flags.error_frame(), "ERROR_FRAME"),
        (flags.tx_ack(), "TXACK"),
        (flags.tx_request(), "TXRQ"),
    ];
    let names: Vec<String> = attributes
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| name.to_string())
        .collect();
    let errors: Vec<String> = flags
        .frame_errors()
        .iter()
        .map(|e| format!("{:?}", e))
        .collect();

    vec![
        format!("raw:        0x{:04X}", flags.raw()),
        format!("attributes: {}", join_or_none(&names)),
        format!("errors:     {}", join_or_none(&errors)),
    ]
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(" | ")
    }
}

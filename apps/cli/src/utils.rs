//! 命令行参数解析工具

use anyhow::{Context, Result, bail};

/// 解析整数（支持 `0x` 十六进制、`0b` 二进制和负数）
pub fn parse_int(input: &str) -> Result<i64> {
    let trimmed = input.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = digits.strip_prefix("0b") {
        i64::from_str_radix(bin, 2)
    } else {
        digits.parse::<i64>()
    }
    .with_context(|| format!("invalid integer '{}'", input))?;

    Ok(if negative { -value } else { value })
}

/// 解析帧数据，字节之间用逗号或空白分隔，每个字节按十六进制解析
///
/// 字节范围在这里检查，长度交给 `Frame` 校验。
pub fn parse_bytes(input: &str) -> Result<Vec<u8>> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            let digits = s.strip_prefix("0x").unwrap_or(s);
            let value = i64::from_str_radix(digits, 16)
                .with_context(|| format!("invalid byte '{}'", s))?;
            match u8::try_from(value) {
                Ok(byte) => Ok(byte),
                Err(_) => bail!("byte '{}' outside [00, ff]", s),
            }
        })
        .collect()
}

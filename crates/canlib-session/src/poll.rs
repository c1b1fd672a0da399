//! 调用方轮询与重试
//!
//! [`Bus`] 的读写都是单次、非阻塞的。需要等待或重试的调用方使用这里的辅助函数，
//! 超时以驱动时钟（[`Bus::read_timer`]）计算，与帧时间戳同源。

use crate::bus::{Bus, Received};
use crate::error::BusError;
use canlib_protocol::Frame;
use std::time::Duration;
use tracing::{debug, trace};

/// 接收轮询间隔
pub const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// 写重试策略（指数退避）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次），至少为 1
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 第 `retry` 次重试前的等待时间（从 0 开始），不超过 `max_backoff`
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// 发送一帧，遇到可重试的驱动条件时按策略退避重试
///
/// 返回实际尝试次数。不可重试的错误立即返回；次数用尽时返回最后一次的错误。
pub fn write_with_retry(
    bus: &mut Bus,
    frame: &Frame,
    policy: &RetryPolicy,
) -> Result<u32, BusError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match bus.write(frame) {
            Ok(()) => return Ok(attempt),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let backoff = policy.backoff(attempt - 1);
                debug!(
                    "Write on '{}' attempt {}/{} failed ({}), retrying in {:?}",
                    bus.name(),
                    attempt,
                    max_attempts,
                    e,
                    backoff
                );
                spin_sleep::sleep(backoff);
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

/// 在 `timeout` 内等待任意一条消息
///
/// 超时返回 `Ok(None)`。`timeout` 为零时只读取一次。
pub fn read_timeout(bus: &mut Bus, timeout: Duration) -> Result<Option<Received>, BusError> {
    read_until(bus, timeout, |_| true)
}

/// 在 `timeout` 内等待第一条满足 `predicate` 的消息，不满足的消息被丢弃
pub fn read_until<F>(
    bus: &mut Bus,
    timeout: Duration,
    mut predicate: F,
) -> Result<Option<Received>, BusError>
where
    F: FnMut(&Received) -> bool,
{
    let deadline = bus.read_timer()? + timeout.as_secs_f64();
    loop {
        let Some(received) = bus.read()? else {
            if bus.read_timer()? >= deadline {
                return Ok(None);
            }
            spin_sleep::sleep(POLL_INTERVAL);
            continue;
        };
        if predicate(&received) {
            return Ok(Some(received));
        }
        trace!("'{}' skipped {}", bus.name(), received);

        // 持续不匹配的流量也不能越过超时
        if bus.read_timer()? >= deadline {
            return Ok(None);
        }
    }
}

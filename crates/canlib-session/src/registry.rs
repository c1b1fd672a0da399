//! 句柄注册表
//!
//! 每个 `(channel, direction)` 最多对应一个硬件句柄，由所有会话共享。
//! 第一次获取时打开通道并上线，引用计数归零时下线并关闭。
//!
//! 注册表是普通对象（不是全局单例），通过 `Arc<HandleRegistry>` 注入给会话，
//! 测试可以为每个用例创建独立的注册表和驱动。

use crate::error::BusError;
use canlib_adapter::{BusParams, CanlibDriver, CanlibError, Direction, OpenFlags, RawHandle};
use canlib_protocol::{ErrorKind, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 注册表的键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleKey {
    pub channel: i32,
    pub direction: Direction,
}

/// 共享硬件句柄的一份引用
///
/// 不实现 `Clone`：每份引用只能通过 [`HandleRegistry::release`] 归还一次。
#[derive(Debug, PartialEq, Eq)]
pub struct HandleRef {
    key: HandleKey,
    handle: RawHandle,
}

impl HandleRef {
    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    pub fn channel(&self) -> i32 {
        self.key.channel
    }

    pub fn direction(&self) -> Direction {
        self.key.direction
    }
}

/// 存活句柄快照（用于诊断）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveHandle {
    pub key: HandleKey,
    pub handle: RawHandle,
    pub refs: usize,
    pub flags: OpenFlags,
}

#[derive(Debug)]
struct Entry {
    handle: RawHandle,
    refs: usize,
    flags: OpenFlags,
    params: BusParams,
}

/// 引用计数的句柄注册表
///
/// 所有修改都在同一把锁内完成，锁在驱动调用期间保持持有，
/// 因此并发的 acquire/release 不会重复打开或提前关闭同一通道。
pub struct HandleRegistry {
    driver: Arc<dyn CanlibDriver>,
    entries: Mutex<HashMap<HandleKey, Entry>>,
}

impl std::fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("live", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl HandleRegistry {
    pub fn new(driver: Arc<dyn CanlibDriver>) -> Self {
        Self {
            driver,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn driver(&self) -> &Arc<dyn CanlibDriver> {
        &self.driver
    }

    /// 获取 `(channel, direction)` 的句柄引用
    ///
    /// 已有句柄时只增加引用计数，忽略本次的 `flags` / `params`（不一致时记录警告）。
    ///
    /// # 错误
    ///
    /// - 通道号越界、标志含未定义位、驱动拒绝打开或拒绝总线参数：`InvalidBusParameter`
    /// - 其他驱动错误：`Canlib`
    ///
    /// 失败时注册表不变，中途打开的硬件句柄会被关闭。
    pub fn acquire(
        &self,
        channel: i32,
        direction: Direction,
        flags: OpenFlags,
        params: &BusParams,
    ) -> Result<HandleRef, BusError> {
        if flags.undefined_bits() != 0 {
            return Err(BusError::invalid_parameter(format!(
                "open flags 0x{:X} contain undefined bits 0x{:X}",
                flags.bits(),
                flags.undefined_bits()
            )));
        }

        let key = HandleKey { channel, direction };
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&key) {
            if entry.flags != flags || entry.params != *params {
                warn!(
                    "Channel {} ({}) already open with different settings, reusing handle {}",
                    channel, direction, entry.handle
                );
            }
            entry.refs += 1;
            debug!(
                "Handle {} for channel {} ({}) now has {} references",
                entry.handle, channel, direction, entry.refs
            );
            return Ok(HandleRef {
                key,
                handle: entry.handle,
            });
        }

        let count = self
            .driver
            .channel_count()
            .map_err(|status| CanlibError::new("canGetNumberOfChannels", status))?;
        if !(0..count).contains(&channel) {
            return Err(BusError::invalid_parameter(format!(
                "channel {} outside [0, {})",
                channel, count
            )));
        }

        let handle = self.open_on_bus(key, flags, params)?;
        entries.insert(
            key,
            Entry {
                handle,
                refs: 1,
                flags,
                params: *params,
            },
        );
        debug!("Opened handle {} for channel {} ({})", handle, channel, direction);

        Ok(HandleRef { key, handle })
    }

    /// 归还一份引用；最后一份归还时下线并关闭硬件句柄
    pub fn release(&self, handle_ref: HandleRef) -> Result<(), BusError> {
        let HandleRef { key, handle } = handle_ref;
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(&key).filter(|e| e.handle == handle) else {
            return Err(CanlibError::new("canClose", StatusCode::ERR_INVHANDLE).into());
        };

        entry.refs -= 1;
        if entry.refs > 0 {
            debug!(
                "Released reference to handle {} ({} remaining)",
                handle, entry.refs
            );
            return Ok(());
        }

        entries.remove(&key);
        if let Err(status) = self.driver.bus_off(handle) {
            warn!("canBusOff on handle {} failed: {}", handle, status);
        }
        self.driver
            .close(handle)
            .map_err(|status| CanlibError::new("canClose", status))?;
        debug!(
            "Closed handle {} for channel {} ({})",
            handle, key.channel, key.direction
        );
        Ok(())
    }

    /// 当前引用计数（未打开为 0）
    pub fn ref_count(&self, channel: i32, direction: Direction) -> usize {
        self.entries
            .lock()
            .get(&HandleKey { channel, direction })
            .map_or(0, |e| e.refs)
    }

    /// 句柄是否仍由本注册表持有
    pub fn is_issued(&self, handle: RawHandle) -> bool {
        self.entries.lock().values().any(|e| e.handle == handle)
    }

    pub fn live_handles(&self) -> Vec<LiveHandle> {
        let mut live: Vec<LiveHandle> = self
            .entries
            .lock()
            .iter()
            .map(|(key, e)| LiveHandle {
                key: *key,
                handle: e.handle,
                refs: e.refs,
                flags: e.flags,
            })
            .collect();
        live.sort_by_key(|l| l.handle);
        live
    }

    // ========================================================================
    // 内部
    // ========================================================================

    fn open_on_bus(
        &self,
        key: HandleKey,
        flags: OpenFlags,
        params: &BusParams,
    ) -> Result<RawHandle, BusError> {
        let handle = self
            .driver
            .open(key.channel, key.direction, flags)
            .map_err(|status| {
                let err = CanlibError::new("canOpenChannel", status);
                match err.kind() {
                    ErrorKind::Param | ErrorKind::NotFound => BusError::InvalidBusParameter {
                        reason: format!(
                            "driver rejected channel {} with flags 0x{:X}",
                            key.channel,
                            flags.bits()
                        ),
                        source: Some(err),
                    },
                    _ => BusError::Canlib(err),
                }
            })?;

        let result = self
            .driver
            .set_bus_params(handle, params)
            .map_err(|status| {
                let err = CanlibError::new("canSetBusParams", status);
                if err.kind() == ErrorKind::Param {
                    BusError::InvalidBusParameter {
                        reason: format!("driver rejected bus parameters {:?}", params),
                        source: Some(err),
                    }
                } else {
                    BusError::Canlib(err)
                }
            })
            .and_then(|()| {
                self.driver
                    .bus_on(handle)
                    .map_err(|status| BusError::from(CanlibError::new("canBusOn", status)))
            });

        if let Err(e) = result {
            if let Err(status) = self.driver.close(handle) {
                warn!("Failed to close handle {} after setup error: {}", handle, status);
            }
            return Err(e);
        }
        Ok(handle)
    }
}

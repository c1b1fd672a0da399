//! CAN 总线会话
//!
//! 一个 [`Bus`] 持有同一通道读、写两个方向的句柄引用（引用计数共享）。
//! 状态只有 Open → Closed，关闭后所有操作返回 `ERR_INVHANDLE`。

use crate::builder::{BusBuilder, BusConfig};
use crate::error::BusError;
use crate::registry::{HandleRef, HandleRegistry};
use canlib_adapter::{
    BusParams, CanlibError, Direction, OpenFlags, RawEvent, RawHandle, RawMessage, RawRead,
};
use canlib_protocol::{ChipStatus, ErrorKind, Frame, InfoMessage, StatusCode};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// 驱动时钟单位（微秒）换算为秒
const US_PER_SECOND: f64 = 1_000_000.0;

/// 一次读取得到的消息
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum Received {
    /// 数据帧或错误帧
    Frame(Frame),
    /// 驱动事件（总线状态变化等）
    Info(InfoMessage),
}

impl Received {
    pub fn timestamp(&self) -> f64 {
        match self {
            Received::Frame(frame) => frame.timestamp(),
            Received::Info(info) => info.timestamp(),
        }
    }

    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            Received::Frame(frame) => Some(frame),
            Received::Info(_) => None,
        }
    }

    pub fn into_frame(self) -> Option<Frame> {
        match self {
            Received::Frame(frame) => Some(frame),
            Received::Info(_) => None,
        }
    }
}

impl fmt::Display for Received {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Received::Frame(frame) => fmt::Display::fmt(frame, f),
            Received::Info(info) => fmt::Display::fmt(info, f),
        }
    }
}

#[derive(Debug)]
struct Handles {
    read: HandleRef,
    write: HandleRef,
}

/// CAN 总线会话
///
/// # 示例
///
/// ```rust
/// use canlib_adapter::VirtualDriver;
/// use canlib_protocol::Frame;
/// use canlib_session::{Bus, HandleRegistry};
/// use std::sync::Arc;
///
/// let registry = Arc::new(HandleRegistry::new(Arc::new(VirtualDriver::new())));
/// let mut tx = Bus::builder().channel(0).open(&registry).unwrap();
/// let mut rx = Bus::builder().channel(1).open(&registry).unwrap();
///
/// tx.write(&Frame::new(0x123, &[1, 2, 3], 3, 0).unwrap()).unwrap();
/// let received = rx.read().unwrap().unwrap();
/// assert_eq!(received.as_frame().unwrap().payload(), &[1, 2, 3]);
///
/// tx.close().unwrap();
/// rx.close().unwrap();
/// ```
pub struct Bus {
    name: String,
    channel: i32,
    flags: OpenFlags,
    params: BusParams,
    registry: Arc<HandleRegistry>,
    handles: Option<Handles>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("flags", &self.flags)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Bus {
    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    /// 按配置打开会话：先获取读句柄，再获取写句柄
    ///
    /// 写句柄获取失败时会归还已获取的读句柄，不留下任何引用。
    pub fn open(registry: &Arc<HandleRegistry>, config: BusConfig) -> Result<Self, BusError> {
        let BusConfig {
            channel,
            flags,
            params,
            name,
        } = config;

        let read = registry.acquire(channel, Direction::Read, flags, &params)?;
        let write = match registry.acquire(channel, Direction::Write, flags, &params) {
            Ok(write) => write,
            Err(e) => {
                if let Err(release_err) = registry.release(read) {
                    warn!("Failed to release read handle after open error: {}", release_err);
                }
                return Err(e);
            },
        };

        let name = name.unwrap_or_else(|| format!("can{}", channel));
        debug!(
            "Bus '{}' open on channel {} (read handle {}, write handle {})",
            name,
            channel,
            read.handle(),
            write.handle()
        );

        Ok(Self {
            name,
            channel,
            flags,
            params,
            registry: registry.clone(),
            handles: Some(Handles { read, write }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> i32 {
        self.channel
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn params(&self) -> &BusParams {
        &self.params
    }

    pub fn is_open(&self) -> bool {
        self.handles.is_some()
    }

    /// 发送一帧
    ///
    /// 发送缓冲区满时返回可重试的错误（[`BusError::is_retryable`]），会话本身不重试。
    pub fn write(&mut self, frame: &Frame) -> Result<(), BusError> {
        let handle = self.handle("canWrite", Direction::Write)?;
        self.registry
            .driver()
            .write(
                handle,
                u32::from(frame.device_id()),
                frame.payload(),
                u32::from(frame.dlc()),
                u32::from(frame.flags()),
            )
            .map_err(|status| {
                if status.error_kind() == Some(ErrorKind::TxBufferOverflow) {
                    trace!("Bus '{}': transmit buffer full", self.name);
                }
                CanlibError::new("canWrite", status)
            })?;
        trace!("Bus '{}' TX: {}", self.name, frame);
        Ok(())
    }

    /// 非阻塞读取
    ///
    /// 接收队列为空时返回 `Ok(None)`；驱动事件转换为 [`InfoMessage`]。
    pub fn read(&mut self) -> Result<Option<Received>, BusError> {
        let handle = self.handle("canRead", Direction::Read)?;
        let raw = match self.registry.driver().read(handle) {
            Ok(raw) => raw,
            Err(status) if status.error_kind() == Some(ErrorKind::NoMsg) => return Ok(None),
            Err(status) => return Err(CanlibError::new("canRead", status).into()),
        };

        let received = match raw {
            RawRead::Message(msg) => Received::Frame(self.decode_frame(&msg)?),
            RawRead::Event(event) => Received::Info(self.decode_event(&event)?),
        };
        trace!("Bus '{}' RX: {}", self.name, received);
        Ok(Some(received))
    }

    /// 驱动时钟（秒），与接收帧的时间戳同源
    pub fn read_timer(&self) -> Result<f64, BusError> {
        let handle = self.handle("canReadTimer", Direction::Read)?;
        let micros = self
            .registry
            .driver()
            .read_timer(handle)
            .map_err(|status| CanlibError::new("canReadTimer", status))?;
        Ok(micros as f64 / US_PER_SECOND)
    }

    /// 通道当前的总线状态
    pub fn read_status(&self) -> Result<ChipStatus, BusError> {
        let handle = self.handle("canReadStatus", Direction::Read)?;
        let raw = self
            .registry
            .driver()
            .read_status(handle)
            .map_err(|status| CanlibError::new("canReadStatus", status))?;
        let status = ChipStatus::from_raw(raw);
        if status.bus_off() {
            error!("Bus '{}' (channel {}) is BUS OFF", self.name, self.channel);
        }
        Ok(status)
    }

    /// 关闭会话，归还两个方向的句柄引用
    ///
    /// 再次关闭返回 `function canClose failed - Handle is invalid (code -10)`。
    pub fn close(&mut self) -> Result<(), BusError> {
        let Some(Handles { read, write }) = self.handles.take() else {
            return Err(CanlibError::new("canClose", StatusCode::ERR_INVHANDLE).into());
        };
        debug!("Closing bus '{}'", self.name);

        // 两个方向都要归还，返回第一个错误
        let read_result = self.registry.release(read);
        let write_result = self.registry.release(write);
        read_result.and(write_result)
    }

    // ========================================================================
    // 内部
    // ========================================================================

    fn handle(&self, function: &'static str, direction: Direction) -> Result<RawHandle, BusError> {
        let handles = self
            .handles
            .as_ref()
            .ok_or_else(|| CanlibError::new(function, StatusCode::ERR_INVHANDLE))?;
        Ok(match direction {
            Direction::Read => handles.read.handle(),
            Direction::Write => handles.write.handle(),
        })
    }

    fn decode_frame(&self, msg: &RawMessage) -> Result<Frame, BusError> {
        // 按驱动上报的长度构造载荷，超过 8 字节的部分补 0，由 Frame 校验报告长度错误
        let payload = msg
            .data
            .iter()
            .copied()
            .chain(std::iter::repeat(0))
            .take(usize::from(msg.len));
        let frame = Frame::builder()
            .timestamp(msg.timestamp_us as f64 / US_PER_SECOND)
            .device_id(msg.id)
            .payload(payload)
            .dlc(msg.dlc)
            .flags(msg.flags)
            .build()
            .inspect_err(|e| {
                warn!("Bus '{}' dropped undecodable frame 0x{:X}: {}", self.name, msg.id, e)
            })?;

        let flags = frame.message_flags();
        if flags.is_overrun() {
            warn!(
                "Bus '{}' receive overrun before frame 0x{:03X}, frames were lost",
                self.name,
                frame.device_id()
            );
        }
        if flags.has_errors() {
            debug!(
                "Bus '{}' frame 0x{:03X} carries errors {:?}",
                self.name,
                frame.device_id(),
                flags.frame_errors()
            );
        }
        Ok(frame)
    }

    fn decode_event(&self, event: &RawEvent) -> Result<InfoMessage, BusError> {
        let conditions = ChipStatus::from_raw(event.status).conditions();
        let info = if conditions.is_empty() {
            event.kind.to_string()
        } else {
            let names: Vec<String> = conditions.iter().map(ToString::to_string).collect();
            format!("{}: {}", event.kind, names.join("|"))
        };
        debug!("Bus '{}' event: {}", self.name, info);
        Ok(InfoMessage::with_info(
            event.timestamp_us as f64 / US_PER_SECOND,
            info,
        )?)
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        if self.handles.is_some() {
            debug!("Bus '{}' dropped while open, releasing handles", self.name);
            if let Err(e) = self.close() {
                warn!("Failed to release handles of bus '{}': {}", self.name, e);
            }
        }
    }
}

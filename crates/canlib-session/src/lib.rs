//! # canlib Session
//!
//! CAN 会话层：在 canlib 风格的驱动之上提供共享句柄的总线会话。
//!
//! ## 模块
//!
//! - `registry`: 按 `(channel, direction)` 引用计数的句柄注册表
//! - `bus`: 总线会话（读 / 写 / 驱动时钟 / 关闭）
//! - `builder`: 会话构造器与可反序列化的配置
//! - `poll`: 调用方的超时读取和写重试
//! - `error`: 会话层错误类型
//!
//! ## 使用
//!
//! ```rust
//! use canlib_adapter::VirtualDriver;
//! use canlib_protocol::Frame;
//! use canlib_session::{Bus, HandleRegistry, poll};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let registry = Arc::new(HandleRegistry::new(Arc::new(VirtualDriver::new())));
//! let mut tx = Bus::builder().channel(0).open(&registry).unwrap();
//! let mut rx = Bus::builder().channel(1).open(&registry).unwrap();
//!
//! let frame = Frame::new(0x100, &[0xAA, 0xBB], 2, 0).unwrap();
//! poll::write_with_retry(&mut tx, &frame, &poll::RetryPolicy::default()).unwrap();
//! let received = poll::read_timeout(&mut rx, Duration::from_secs(1)).unwrap();
//! assert!(received.is_some());
//! ```

pub mod builder;
pub mod bus;
pub mod error;
pub mod poll;
pub mod registry;

pub use builder::{BusBuilder, BusConfig};
pub use bus::{Bus, Received};
pub use error::BusError;
pub use poll::{RetryPolicy, read_timeout, read_until, write_with_retry};
pub use registry::{HandleKey, HandleRef, HandleRegistry, LiveHandle};

// 重新导出驱动层与值类型，调用方只需依赖本 crate
pub use canlib_adapter::{BusParams, CanlibDriver, CanlibError, Direction, OpenFlags};
pub use canlib_protocol::{Frame, InfoMessage, StatusCode};

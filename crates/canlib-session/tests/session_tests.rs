//! 会话层集成测试
//!
//! 全部运行在进程内虚拟驱动上，每个用例使用独立的注册表。

use canlib_adapter::{CanlibDriver, RawHandle, VirtualDriver};
use canlib_protocol::constants::{MSG_EXT, MSG_STD, STAT_BUS_OFF};
use canlib_protocol::{ErrorKind, Field, Frame};
use canlib_session::{
    Bus, BusConfig, BusError, CanlibError, Direction, HandleRegistry, OpenFlags, Received,
    RetryPolicy, StatusCode, read_timeout, read_until, write_with_retry,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WINDOW: Duration = Duration::from_secs(5);

fn setup() -> (Arc<VirtualDriver>, Arc<HandleRegistry>) {
    let driver = Arc::new(VirtualDriver::new());
    let registry = Arc::new(HandleRegistry::new(driver.clone()));
    (driver, registry)
}

fn open(registry: &Arc<HandleRegistry>, channel: i32) -> Bus {
    Bus::builder().channel(channel).open(registry).unwrap()
}

// ============================================================================
// 句柄共享
// ============================================================================

#[test]
fn test_sessions_on_same_channel_share_handles() {
    let (driver, registry) = setup();
    let first = open(&registry, 0);
    let second = open(&registry, 0);

    let read = registry
        .acquire(0, Direction::Read, OpenFlags::ACCEPT_VIRTUAL, &Default::default())
        .unwrap();
    let again = registry
        .acquire(0, Direction::Read, OpenFlags::ACCEPT_VIRTUAL, &Default::default())
        .unwrap();
    assert_eq!(read.handle(), again.handle());
    assert_eq!(registry.ref_count(0, Direction::Read), 4);
    assert_eq!(registry.ref_count(0, Direction::Write), 2);
    assert_eq!(driver.open_handle_count(), 2);

    registry.release(read).unwrap();
    registry.release(again).unwrap();
    drop(first);
    drop(second);
    assert_eq!(driver.open_handle_count(), 0);
}

#[test]
fn test_closing_one_session_keeps_other_working() {
    let (driver, registry) = setup();
    let mut first = open(&registry, 0);
    let mut second = open(&registry, 0);
    let mut peer = open(&registry, 1);

    first.close().unwrap();
    assert_eq!(registry.ref_count(0, Direction::Read), 1);
    assert_eq!(registry.ref_count(0, Direction::Write), 1);

    let frame = Frame::new(0x321, &[4, 5], 2, MSG_STD).unwrap();
    second.write(&frame).unwrap();
    let received = read_timeout(&mut peer, WINDOW).unwrap().unwrap();
    assert!(received.as_frame().unwrap().same_content(&frame));

    peer.write(&frame).unwrap();
    let received = read_timeout(&mut second, WINDOW).unwrap().unwrap();
    assert!(received.as_frame().unwrap().same_content(&frame));

    second.close().unwrap();
    peer.close().unwrap();
    assert_eq!(driver.open_handle_count(), 0);
}

#[test]
fn test_independent_registries_do_not_share() {
    let driver = Arc::new(VirtualDriver::new());
    let a = Arc::new(HandleRegistry::new(driver.clone()));
    let b = Arc::new(HandleRegistry::new(driver.clone()));

    let _bus_a = open(&a, 0);
    let _bus_b = open(&b, 0);
    assert_eq!(a.ref_count(0, Direction::Read), 1);
    assert_eq!(b.ref_count(0, Direction::Read), 1);
    assert_eq!(driver.open_handle_count(), 4);
    assert_ne!(a.live_handles()[0].handle, b.live_handles()[0].handle);
}

#[test]
fn test_concurrent_sessions_release_everything() {
    let (driver, registry) = setup();

    let workers: Vec<_> = (0..6)
        .map(|i| {
            let registry = registry.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let mut bus = open(&registry, i % 2);
                    bus.write(&Frame::new(i, &[i as u8], 1, 0).unwrap()).unwrap();
                    while bus.read().unwrap().is_some() {}
                    bus.close().unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(registry.live_handles().is_empty());
    assert_eq!(driver.open_handle_count(), 0);
}

// ============================================================================
// 打开参数
// ============================================================================

#[test]
fn test_virtual_channel_requires_accept_virtual() {
    let (driver, registry) = setup();
    let err = Bus::builder()
        .channel(0)
        .flags(OpenFlags::NONE)
        .open(&registry)
        .unwrap_err();
    assert!(matches!(err, BusError::InvalidBusParameter { .. }));
    assert_eq!(err.error_kind(), Some(ErrorKind::NotFound));
    assert_eq!(driver.open_handle_count(), 0);
}

#[test]
fn test_undefined_flags_rejected_on_every_channel() {
    let driver = Arc::new(
        VirtualDriver::builder()
            .virtual_channels(2)
            .physical_channel("Kvaser Leaf Light v2")
            .build(),
    );
    let registry = Arc::new(HandleRegistry::new(driver.clone()));

    for channel in 0..3 {
        let err = Bus::builder()
            .channel(channel)
            .flags(OpenFlags(0xFFFF))
            .open(&registry)
            .unwrap_err();
        assert!(err.is_invalid_bus_parameter(), "channel {}", channel);
    }
    assert_eq!(driver.open_handle_count(), 0);

    // 物理通道不需要 ACCEPT_VIRTUAL
    let bus = Bus::builder()
        .channel(2)
        .flags(OpenFlags::NONE)
        .open(&registry)
        .unwrap();
    assert!(bus.is_open());
}

#[test]
fn test_channel_numbers_around_range() {
    let (driver, registry) = setup();
    let count = driver.channel_count().unwrap();

    for channel in -3..count + 3 {
        let result = Bus::builder().channel(channel).open(&registry);
        if (0..count).contains(&channel) {
            result.unwrap().close().unwrap();
        } else {
            assert!(result.unwrap_err().is_invalid_bus_parameter(), "channel {}", channel);
        }
    }
    assert!(registry.live_handles().is_empty());
}

#[test]
fn test_exclusive_open_conflicts_across_registries() {
    let driver = Arc::new(VirtualDriver::new());
    let a = Arc::new(HandleRegistry::new(driver.clone()));
    let b = Arc::new(HandleRegistry::new(driver.clone()));

    let owner = a
        .acquire(
            0,
            Direction::Read,
            OpenFlags::ACCEPT_VIRTUAL | OpenFlags::EXCLUSIVE,
            &Default::default(),
        )
        .unwrap();
    let err = Bus::builder().channel(0).open(&b).unwrap_err();
    assert!(!err.is_invalid_bus_parameter());
    assert_eq!(err.status(), Some(StatusCode::new(-5)));
    assert!(b.live_handles().is_empty());

    a.release(owner).unwrap();
    open(&b, 0).close().unwrap();
}

// ============================================================================
// 无效句柄
// ============================================================================

#[test]
fn test_unissued_handles_are_invalid() {
    let (driver, registry) = setup();
    let bus = open(&registry, 0);

    for value in -100..100 {
        let handle = RawHandle(value);
        if registry.is_issued(handle) {
            continue;
        }
        let status = driver.read(handle).unwrap_err();
        let err = BusError::from(CanlibError::new("canRead", status));
        assert!(err.is_invalid_handle(), "handle {}", value);
        assert_eq!(
            err.to_string(),
            "function canRead failed - Handle is invalid (code -10)"
        );

        let status = driver.write(handle, 1, &[], 0, 0).unwrap_err();
        assert_eq!(status, StatusCode::ERR_INVHANDLE);
    }
    drop(bus);
}

#[test]
fn test_released_handle_is_invalid() {
    let (driver, registry) = setup();
    let mut bus = open(&registry, 1);
    let live = registry.live_handles();
    bus.close().unwrap();

    for entry in live {
        assert!(!registry.is_issued(entry.handle));
        assert_eq!(driver.read(entry.handle).unwrap_err(), StatusCode::ERR_INVHANDLE);
    }

    let err = bus.read().unwrap_err();
    assert!(
        err.to_string()
            .starts_with("function canRead failed - Handle is invalid (code -10)")
    );
    let err = bus.close().unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::ERR_INVHANDLE));
}

// ============================================================================
// 端到端
// ============================================================================

#[test]
fn test_end_to_end_same_channel() {
    let (_driver, registry) = setup();
    let mut writer = open(&registry, 0);
    let mut reader = open(&registry, 0);

    let frame = Frame::new(0x0010, &[1, 2, 3], 3, 0x02).unwrap();
    writer.write(&frame).unwrap();

    let received = read_until(&mut reader, WINDOW, |r| matches!(r, Received::Frame(_)))
        .unwrap()
        .unwrap()
        .into_frame()
        .unwrap();
    assert_eq!(received.device_id(), 0x0010);
    assert_eq!(received.payload(), &[1, 2, 3]);
    assert_eq!(received.dlc(), 3);
    assert_eq!(received.flags(), 0x02);
}

#[test]
fn test_end_to_end_both_directions() {
    let (_driver, registry) = setup();
    let mut a = open(&registry, 0);
    let mut b = open(&registry, 1);

    let ping = Frame::new(0x100, &[0x01], 1, MSG_STD).unwrap();
    let pong = Frame::new(0x101, &[0x02, 0x03], 2, MSG_STD).unwrap();

    a.write(&ping).unwrap();
    let got = read_timeout(&mut b, WINDOW).unwrap().unwrap();
    assert!(got.as_frame().unwrap().same_content(&ping));

    b.write(&pong).unwrap();
    let got = read_timeout(&mut a, WINDOW).unwrap().unwrap();
    // a 的读句柄也会收到自己发出的 ping
    let got = if got.as_frame().unwrap().same_content(&ping) {
        read_timeout(&mut a, WINDOW).unwrap().unwrap()
    } else {
        got
    };
    assert!(got.as_frame().unwrap().same_content(&pong));
}

#[test]
fn test_received_timestamps_follow_driver_clock() {
    let (_driver, registry) = setup();
    let mut tx = open(&registry, 0);
    let mut rx = open(&registry, 1);

    let before = rx.read_timer().unwrap();
    tx.write(&Frame::new(0x7, &[], 0, 0).unwrap()).unwrap();
    let received = read_timeout(&mut rx, WINDOW).unwrap().unwrap();
    let after = rx.read_timer().unwrap();
    assert!(before <= received.timestamp());
    assert!(received.timestamp() <= after);
}

#[test]
fn test_extended_id_is_rejected_on_receive() {
    let (_driver, registry) = setup();
    let config = BusConfig {
        channel: 0,
        ..BusConfig::default()
    };
    let mut rx = Bus::open(&registry, config).unwrap();
    let tx = open(&registry, 1);

    // 通过驱动直接发送扩展帧，会话层只接受 11-bit ID
    let handle = registry
        .live_handles()
        .into_iter()
        .find(|h| h.key.channel == 1 && h.key.direction == Direction::Write)
        .unwrap()
        .handle;
    registry
        .driver()
        .write(handle, 0x1234_5678, &[1], 1, u32::from(MSG_EXT))
        .unwrap();

    let err = read_timeout(&mut rx, WINDOW).unwrap_err();
    let BusError::InvalidFrame(validation) = err else {
        panic!("expected validation error, got {:?}", err);
    };
    assert!(validation.has(Field::DeviceId));
    drop(tx);
}

// ============================================================================
// 状态与重试
// ============================================================================

#[test]
fn test_bus_off_status_and_event() {
    let (driver, registry) = setup();
    let mut bus = open(&registry, 0);

    driver.set_chip_status(0, STAT_BUS_OFF);
    assert!(bus.read_status().unwrap().bus_off());

    let received = read_timeout(&mut bus, WINDOW).unwrap().unwrap();
    let Received::Info(info) = received else {
        panic!("expected info message");
    };
    assert!(info.info().unwrap().contains("BUS_OFF"));
}

#[test]
fn test_retry_over_injected_buffer_overflow() {
    let (driver, registry) = setup();
    let mut tx = open(&registry, 0);
    let mut rx = open(&registry, 1);

    driver.fail_next_writes(2, StatusCode::ERR_TXBUFOFL);
    let frame = Frame::new(0x42, &[0x42; 8], 8, 0).unwrap();

    let err = tx.write(&frame).unwrap_err();
    assert!(err.is_retryable());

    let attempts = write_with_retry(&mut tx, &frame, &RetryPolicy::default()).unwrap();
    assert_eq!(attempts, 2);
    let received = read_timeout(&mut rx, WINDOW).unwrap().unwrap();
    assert!(received.as_frame().unwrap().same_content(&frame));
}

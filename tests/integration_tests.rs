//! Integration tests for the OpenDOTT transfer core.
//!
//! End-to-end uploads go through the GATT adapter into a running event loop;
//! the cross-module sections drive the session manager directly with
//! explicit timestamps.

use dott_core::error::{
    FormatError, LinkError, ProtocolError, ResourceError, StorageError, StructuralError,
};
use dott_core::protocol::{Command, DeviceInfo, READY_INDICATION, StatusReport};
use dott_core::{
    AttError, BlobStore, Characteristic, DEFAULT_IMAGE_NAME, Error, Event, FsStore, Generation,
    HeaderRenderer, ImageFormat, MemoryStore, SessionManager, Step, TransferConfig, TransferMode,
    TransferState,
};
use dott_integration_tests::fixtures::{Device, PEER, images};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Inactivity window short enough to keep end-to-end tests fast
const WINDOW: Duration = Duration::from_millis(100);

fn open_ended() -> TransferConfig {
    TransferConfig {
        inactivity_timeout: WINDOW,
        open_ended_capacity: 4096,
        ..TransferConfig::open_ended()
    }
}

/// Connected manager over `store`, driven synchronously
fn manager(config: TransferConfig, store: Box<dyn BlobStore>) -> SessionManager {
    let mut manager = SessionManager::new(config, store, Box::new(HeaderRenderer::new())).unwrap();
    assert_eq!(manager.handle(Event::Connected(PEER), Instant::now()), Step::Linked);
    manager
}

fn start(generation: u64, size: usize) -> Event {
    Event::Start {
        generation: Generation::new(generation),
        size: size as u64,
    }
}

fn trigger(generation: u64) -> Event {
    Event::Trigger {
        generation: Generation::new(generation),
    }
}

fn chunk(generation: u64, data: &[u8]) -> Event {
    Event::Chunk {
        generation: Generation::new(generation),
        data: data.to_vec(),
    }
}

fn timeout(generation: u64) -> Event {
    Event::Timeout {
        generation: Generation::new(generation),
    }
}

fn failure(step: Step) -> Error {
    match step {
        Step::Failed { error, .. } => error,
        other => panic!("expected failure, got {other:?}"),
    }
}

// ============================================================================
// Declared-Length Uploads
// ============================================================================

#[tokio::test]
async fn test_declared_upload_commits() {
    let device = Device::spawn(TransferConfig::declared()).await;
    let image = images::gif(120, 40);

    let generation = device.start(image.len()).await;
    device
        .write_all(Characteristic::ImageData, &image, 7)
        .await;
    let snapshot = device.settle(generation).await;
    assert_eq!(snapshot.received, 0);
    assert!(snapshot.connected);

    assert_eq!(device.wire.results(), vec!["Transfer Complete"]);
    assert!(
        device
            .wire
            .sent()
            .iter()
            .all(|s| s.characteristic == Characteristic::Control)
    );

    let manager = device.shutdown().await;
    assert_eq!(manager.store().load(DEFAULT_IMAGE_NAME).unwrap(), image);
    let stats = manager.stats();
    assert_eq!(stats.sessions_completed, 1);
    assert_eq!(stats.bytes_received, image.len() as u64);
    assert_eq!(stats.sessions_failed, 0);
}

#[tokio::test]
async fn test_declared_overflow_then_next_session_arms() {
    let device = Device::spawn(TransferConfig::declared()).await;

    let first = device.start(16).await;
    device
        .server
        .write(Characteristic::ImageData, &[0u8; 24])
        .await
        .unwrap();
    device.settle(first).await;
    assert_eq!(device.wire.results(), vec!["Transfer Fail"]);

    let image = images::gif(8, 8);
    let second = device.start(image.len()).await;
    assert!(second > first);
    device
        .write_all(Characteristic::ImageData, &image, 20)
        .await;
    device.settle(second).await;

    assert_eq!(
        device.wire.results(),
        vec!["Transfer Fail", "Transfer Complete"]
    );
    let manager = device.shutdown().await;
    assert_eq!(manager.stats().sessions_failed, 1);
    assert_eq!(manager.stats().sessions_completed, 1);
}

#[tokio::test]
async fn test_disconnect_mid_receiving() {
    let device = Device::spawn(TransferConfig::declared()).await;
    let image = images::gif(32, 32);

    let generation = device.start(image.len()).await;
    device
        .server
        .write(Characteristic::ImageData, &image[..10])
        .await
        .unwrap();
    device
        .wait_for(|s| s.state == TransferState::Receiving && s.received == 10)
        .await;

    device.server.disconnect(PEER).await.unwrap();
    let snapshot = device.settle(generation).await;
    assert!(!snapshot.connected);
    assert_eq!(device.wire.results(), vec!["Transfer Fail"]);

    // Nothing is bound; late data goes nowhere
    device
        .server
        .write(Characteristic::ImageData, &image[10..])
        .await
        .unwrap();

    device.server.connect(PEER).await.unwrap();
    let retry = device.start(image.len()).await;
    device
        .write_all(Characteristic::ImageData, &image, 64)
        .await;
    device.settle(retry).await;

    let manager = device.shutdown().await;
    let stats = manager.stats();
    assert_eq!(stats.sessions_failed, 1);
    assert_eq!(stats.sessions_completed, 1);
    assert_eq!(stats.dropped_events, 1);
    assert_eq!(manager.store().load(DEFAULT_IMAGE_NAME).unwrap(), image);
}

#[tokio::test]
async fn test_new_start_supersedes_active_session() {
    let device = Device::spawn(TransferConfig::declared()).await;
    let image = images::gif(10, 10);

    let first = device.start(1000).await;
    device
        .server
        .write(Characteristic::ImageData, &[0x47; 50])
        .await
        .unwrap();

    let second = device.start(image.len()).await;
    assert_eq!(second, first.next());
    device
        .write_all(Characteristic::ImageData, &image, 9)
        .await;
    device.settle(second).await;

    assert_eq!(
        device.wire.results(),
        vec!["Transfer Fail", "Transfer Complete"]
    );
    let manager = device.shutdown().await;
    assert_eq!(manager.stats().sessions_started, 2);
    assert_eq!(manager.store().load(DEFAULT_IMAGE_NAME).unwrap(), image);
}

#[tokio::test]
async fn test_cancel_and_status_commands() {
    let device = Device::spawn(TransferConfig::declared()).await;

    let generation = device.start(100).await;
    device
        .server
        .write(Characteristic::ImageData, &[0u8; 10])
        .await
        .unwrap();
    device.wait_for(|s| s.received == 10).await;

    let report = StatusReport::decode(&device.server.read(Characteristic::Control).unwrap())
        .unwrap();
    assert_eq!(report.state, TransferState::Receiving);
    assert_eq!((report.received, report.expected), (10, 100));

    device
        .server
        .write(Characteristic::Control, &Command::Status.encode())
        .await
        .unwrap();
    device
        .server
        .write(Characteristic::Control, &Command::Cancel.encode())
        .await
        .unwrap();
    device.settle(generation).await;

    let sent = device.wire.sent();
    let status = sent
        .iter()
        .find(|s| s.value.len() == StatusReport::LEN)
        .expect("status report was not sent");
    assert_eq!(StatusReport::decode(&status.value).unwrap(), report);
    assert_eq!(device.wire.results(), vec!["Transfer Fail"]);

    let manager = device.shutdown().await;
    assert!(!manager.store().exists(DEFAULT_IMAGE_NAME));
}

#[tokio::test]
async fn test_invalid_declared_sizes_are_rejected() {
    let config = TransferConfig {
        max_image_size: 1024,
        ..TransferConfig::declared()
    };
    let device = Device::spawn(config).await;

    let zero = device.start(0).await;
    device.settle(zero).await;
    let too_big = device.start(1025).await;
    device.settle(too_big).await;

    assert_eq!(device.wire.results(), vec!["Transfer Fail", "Transfer Fail"]);
    let manager = device.shutdown().await;
    assert_eq!(manager.stats().starts_rejected, 2);
    assert_eq!(manager.stats().sessions_started, 0);
}

// ============================================================================
// Open-Ended Uploads
// ============================================================================

#[tokio::test]
async fn test_open_ended_upload_completes_after_inactivity() {
    let device = Device::spawn(open_ended()).await;
    let image = images::gif(240, 240);

    let generation = device.trigger().await;
    device.wait_for(|s| s.state == TransferState::Armed).await;
    assert_eq!(
        device.server.read(Characteristic::Trigger).unwrap(),
        READY_INDICATION.to_vec()
    );

    device.write_all(Characteristic::Data, &image, 12).await;
    device.settle(generation).await;

    let sent = device.wire.sent();
    assert!(sent[0].indication);
    assert_eq!(sent[0].characteristic, Characteristic::Trigger);
    assert_eq!(sent[0].value, READY_INDICATION.to_vec());
    assert_eq!(device.wire.results(), vec!["Transfer Complete"]);
    assert!(
        sent[1..]
            .iter()
            .all(|s| s.characteristic == Characteristic::Notify)
    );

    let manager = device.shutdown().await;
    assert_eq!(manager.store().load(DEFAULT_IMAGE_NAME).unwrap(), image);
}

#[tokio::test]
async fn test_open_ended_truncated_png_fails() {
    let device = Device::spawn(open_ended()).await;

    let generation = device.trigger().await;
    device
        .server
        .write(Characteristic::Data, &images::broken_png_prefix())
        .await
        .unwrap();
    device.settle(generation).await;

    assert_eq!(device.wire.indications(), 1);
    assert_eq!(device.wire.results(), vec!["Transfer Fail"]);
    let manager = device.shutdown().await;
    assert!(!manager.store().exists(DEFAULT_IMAGE_NAME));
}

#[tokio::test]
async fn test_open_ended_trigger_without_data_fails() {
    let device = Device::spawn(open_ended()).await;

    let generation = device.trigger().await;
    device.settle(generation).await;

    assert_eq!(device.wire.results(), vec!["Transfer Fail"]);
    let manager = device.shutdown().await;
    assert_eq!(manager.stats().sessions_failed, 1);
}

// ============================================================================
// GATT Adapter
// ============================================================================

#[tokio::test]
async fn test_malformed_writes_never_reach_the_session() {
    let device = Device::spawn(TransferConfig::declared()).await;

    let cases: [(Characteristic, &[u8], AttError); 5] = [
        (Characteristic::Control, &[], AttError::InvalidLength),
        (Characteristic::Control, &[0x01, 0x10], AttError::InvalidLength),
        (Characteristic::Control, &[0x7F], AttError::ValueNotAllowed),
        (Characteristic::Trigger, &[0x00, 0x10, 0x40, 0x00], AttError::RequestNotSupported),
        (Characteristic::DeviceInfo, &[0x00], AttError::WriteNotPermitted),
    ];
    for (characteristic, value, expected) in cases {
        assert_eq!(
            device.server.write(characteristic, value).await,
            Err(expected),
            "write to {characteristic:?}"
        );
    }
    assert_eq!(
        device.server.read(Characteristic::ImageData),
        Err(AttError::ReadNotPermitted)
    );
    assert_eq!(device.handle().current_generation(), Generation::ZERO);

    let manager = device.shutdown().await;
    assert_eq!(manager.stats(), Default::default());
}

#[tokio::test]
async fn test_open_ended_trigger_value_checked() {
    let device = Device::spawn(open_ended()).await;

    assert_eq!(
        device
            .server
            .write(Characteristic::Trigger, &[0xDE, 0xAD, 0xBE, 0xEF])
            .await,
        Err(AttError::ValueNotAllowed)
    );
    assert_eq!(
        device.server.write(Characteristic::Trigger, &[0x00]).await,
        Err(AttError::InvalidLength)
    );
    assert_eq!(
        device.server.read(Characteristic::Trigger).unwrap(),
        vec![0; 4]
    );
    assert_eq!(device.server.read(Characteristic::Status).unwrap(), vec![0x01]);
    assert_eq!(device.handle().current_generation(), Generation::ZERO);
}

#[tokio::test]
async fn test_device_info_reports_free_space() {
    let store = MemoryStore::new(4096);
    let device = Device::spawn_with(
        TransferConfig::declared(),
        Box::new(store),
        Box::new(HeaderRenderer::new()),
    )
    .await;
    let image = images::gif(4, 4);

    let generation = device.start(image.len()).await;
    device
        .write_all(Characteristic::ImageData, &image, 32)
        .await;
    let snapshot = device.settle(generation).await;
    assert_eq!(snapshot.free_space, 4096 - image.len() as u64);

    let info = DeviceInfo::decode(&device.server.read(Characteristic::DeviceInfo).unwrap())
        .unwrap();
    assert_eq!(u64::from(info.free_space), snapshot.free_space);
    assert_eq!(info.battery, 100);
}

// ============================================================================
// Session Manager Cross-Module Behavior
// ============================================================================

#[test]
fn test_overflow_error_reports_limit() {
    let now = Instant::now();
    let mut m = manager(TransferConfig::declared(), Box::new(MemoryStore::default()));

    m.handle(start(1, 16), now);
    m.handle(chunk(1, &[0u8; 10]), now);
    let error = failure(m.handle(chunk(1, &[0u8; 10]), now));

    assert_eq!(
        error,
        Error::Overflow {
            received: 10,
            len: 10,
            limit: 16,
        }
    );
    assert_eq!(error.category(), "OverflowError");
    assert!(m.session().is_none());
    assert_eq!(m.handle(start(2, 16), now), Step::Armed(Generation::new(2)));
}

#[test]
fn test_stale_chunks_after_supersede() {
    let now = Instant::now();
    let image = images::gif(16, 16);
    let mut m = manager(TransferConfig::declared(), Box::new(MemoryStore::default()));

    m.handle(start(1, 500), now);
    m.handle(chunk(1, &[0u8; 100]), now);
    let Step::Armed(current) = m.handle(start(2, image.len()), now) else {
        panic!("second start did not arm");
    };
    assert_eq!(current, Generation::new(2));

    // Chunks from the first session that were already queued
    assert_eq!(m.handle(chunk(1, &[0u8; 100]), now), Step::Ignored);
    assert_eq!(m.handle(chunk(1, &[0u8; 100]), now), Step::Ignored);
    assert_eq!(m.stats().stale_chunks, 2);

    assert!(matches!(
        m.handle(chunk(2, &image), now),
        Step::Completed(_)
    ));
    // Late start for the superseded generation
    assert_eq!(m.handle(start(1, 10), now), Step::Ignored);
}

#[test]
fn test_start_in_wrong_mode_is_protocol_error() {
    let now = Instant::now();
    let mut declared = manager(TransferConfig::declared(), Box::new(MemoryStore::default()));
    assert_eq!(
        failure(declared.handle(trigger(1), now)),
        Error::Protocol(ProtocolError::WrongMode("declared"))
    );

    let mut open = manager(open_ended(), Box::new(MemoryStore::default()));
    assert_eq!(
        failure(open.handle(start(1, 10), now)),
        Error::Protocol(ProtocolError::WrongMode("open-ended"))
    );
    assert_eq!(open.stats().starts_rejected, 1);
}

#[test]
fn test_open_ended_short_png_is_structural() {
    let now = Instant::now();
    let mut m = manager(open_ended(), Box::new(MemoryStore::default()));

    m.handle(trigger(1), now);
    let step = m.handle(chunk(1, &images::broken_png_prefix()), now);
    assert_eq!(
        step,
        Step::Accepted {
            generation: Generation::new(1),
            received: 10,
        }
    );

    // Timer scheduled before the chunk pushed the deadline back
    assert_eq!(m.handle(timeout(1), now + WINDOW / 2), Step::Ignored);

    let error = failure(m.handle(timeout(1), now + WINDOW * 2));
    assert!(matches!(
        error,
        Error::Structural(StructuralError::TooSmall {
            format: ImageFormat::Png,
            size: 10,
            minimum: 33,
        })
    ));
    assert_eq!(m.snapshot().state, TransferState::Idle);
}

#[test]
fn test_open_ended_timeout_without_data() {
    let now = Instant::now();
    let mut m = manager(open_ended(), Box::new(MemoryStore::default()));

    m.handle(trigger(1), now);
    let (generation, deadline) = m.deadline().unwrap();
    assert_eq!(generation, Generation::new(1));
    assert_eq!(deadline, now + WINDOW);

    assert_eq!(
        failure(m.handle(timeout(1), deadline)),
        Error::Format(FormatError::NoData)
    );
    assert!(m.deadline().is_none());
}

#[test]
fn test_open_ended_unrecognized_first_chunk() {
    let now = Instant::now();
    let mut m = manager(open_ended(), Box::new(MemoryStore::default()));

    m.handle(trigger(1), now);
    let error = failure(m.handle(chunk(1, b"not an image at all"), now));
    assert!(matches!(error, Error::Format(FormatError::Unrecognized(_))));
}

#[test]
fn test_open_ended_capacity_overflow() {
    let now = Instant::now();
    let config = TransferConfig {
        open_ended_capacity: 32,
        ..open_ended()
    };
    let mut m = manager(config, Box::new(MemoryStore::default()));

    m.handle(trigger(1), now);
    m.handle(chunk(1, &images::gif(1, 1)), now);
    assert!(matches!(
        failure(m.handle(chunk(1, &[0u8; 16]), now)),
        Error::Overflow { limit: 32, .. }
    ));
}

#[test]
fn test_trailer_heuristic_is_advisory() {
    let now = Instant::now();
    let cases = [
        (images::gif(8, 8), Some(true)),
        (images::gif_without_trailer(8, 8), Some(false)),
        (images::jpeg(true), Some(true)),
        (images::jpeg(false), Some(false)),
        (images::png(8, 8), None),
    ];

    for (index, (image, trailer)) in cases.into_iter().enumerate() {
        let mut m = manager(TransferConfig::declared(), Box::new(MemoryStore::default()));
        let generation = index as u64 + 1;
        m.handle(start(generation, image.len()), now);
        let Step::Completed(report) = m.handle(chunk(generation, &image), now) else {
            panic!("case {index} did not complete");
        };
        assert_eq!(report.trailer_present, trailer, "case {index}");
        assert_eq!(report.mode, TransferMode::Declared);
    }
}

#[test]
fn test_commit_failure_keeps_previous_image() {
    let now = Instant::now();
    let small = images::gif(2, 2);
    let mut m = manager(
        TransferConfig::declared(),
        Box::new(MemoryStore::new(small.len() as u64 + 8)),
    );

    m.handle(start(1, small.len()), now);
    assert!(matches!(m.handle(chunk(1, &small), now), Step::Completed(_)));

    let large = images::bmp(64, 64);
    m.handle(start(2, large.len()), now);
    let error = failure(m.handle(chunk(2, &large), now));
    assert!(matches!(
        error,
        Error::Resource(ResourceError::Commit(StorageError::NoSpace { .. }))
    ));
    assert_eq!(error.category(), "ResourceError");
    assert_eq!(m.store().load(DEFAULT_IMAGE_NAME).unwrap(), small);
}

#[test]
fn test_render_failure_does_not_reverse_commit() {
    let now = Instant::now();
    let image = images::png(320, 240);
    let mut m = manager(TransferConfig::declared(), Box::new(MemoryStore::default()));

    m.handle(start(1, image.len()), now);
    let Step::Completed(report) = m.handle(chunk(1, &image), now) else {
        panic!("expected completion");
    };
    assert!(!report.rendered);
    assert_eq!((report.width, report.height), (320, 240));
    assert_eq!(m.store().load(DEFAULT_IMAGE_NAME).unwrap(), image);
    assert_eq!(m.stats().sessions_completed, 1);
}

#[test]
fn test_link_loss_variants() {
    let now = Instant::now();
    let mut m = manager(TransferConfig::declared(), Box::new(MemoryStore::default()));

    m.handle(start(1, 100), now);
    assert_eq!(
        failure(m.handle(Event::Connected(PEER), now)),
        Error::Link(LinkError::Disconnected)
    );

    m.handle(start(2, 100), now);
    assert_eq!(
        failure(m.handle(Event::Cancel, now)),
        Error::Link(LinkError::Cancelled)
    );

    m.handle(start(3, 100), now);
    assert_eq!(
        failure(m.handle(Event::Disconnected(PEER), now)),
        Error::Link(LinkError::Disconnected)
    );
    assert!(m.peer().is_none());
    assert_eq!(m.handle(start(4, 100), now), Step::Ignored);
    assert_eq!(m.stats().dropped_events, 1);
}

// ============================================================================
// Persistent Storage
// ============================================================================

#[test]
fn test_fs_store_restores_last_image() {
    let dir = TempDir::new().unwrap();
    let now = Instant::now();
    let image = images::gif(96, 48);

    {
        let store = FsStore::open(dir.path(), 1 << 20).unwrap();
        let mut m = manager(TransferConfig::declared(), Box::new(store));
        m.handle(start(1, image.len()), now);
        for piece in images::chunks(&image, 5) {
            m.handle(chunk(1, &piece), now);
        }
        assert_eq!(m.stats().sessions_completed, 1);
    }

    let store = FsStore::open(dir.path(), 1 << 20).unwrap();
    let mut rebooted =
        SessionManager::new(TransferConfig::declared(), Box::new(store), Box::new(HeaderRenderer::new()))
            .unwrap();
    let frame = rebooted.restore_last_image().unwrap();
    assert_eq!(frame.format, ImageFormat::Gif);
    assert_eq!((frame.width, frame.height), (96, 48));
    assert_eq!(rebooted.device_info().free_space, (1 << 20) - image.len() as u32);
}

#[test]
fn test_restore_ignores_missing_or_corrupt_image() {
    let dir = TempDir::new().unwrap();
    let mut store = FsStore::open(dir.path(), 1 << 20).unwrap();

    let mut m = SessionManager::new(
        TransferConfig::declared(),
        Box::new(store.clone()),
        Box::new(HeaderRenderer::new()),
    )
    .unwrap();
    assert!(m.restore_last_image().is_none());

    store.save(DEFAULT_IMAGE_NAME, b"GIF89a\0\0\0\0garbage").unwrap();
    assert!(m.restore_last_image().is_none());
}

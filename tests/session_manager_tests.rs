//! End-to-end scenarios for the TSB session manager, covering the literal
//! scenarios from the subsystem's testable-properties section.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aamp_tsb::tsb::events::test_support::FakeMediaContext;
use aamp_tsb::tsb::{IncomingFragment, TrackType, TsbSessionManager, TuneType};

fn temp_dir(label: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "aamp-tsb-{}-{}-{}",
        label,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos()
    ));
    std::fs::create_dir_all(&path).unwrap();
    path
}

fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            panic!("condition not met within timeout");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn init_fragment(url: &str, position: f64, identity: &str) -> IncomingFragment {
    IncomingFragment {
        track: TrackType::Video,
        url: url.to_string(),
        bytes: Arc::new(b"I".to_vec()),
        abs_position_secs: position,
        duration_secs: 0.0,
        period_id: "p0".to_string(),
        is_init: true,
        init_identity: identity.to_string(),
        discontinuity: false,
        pts_offset_secs: 0.0,
    }
}

fn media_fragment(url: &str, position: f64, duration: f64, identity: &str, bytes: &[u8]) -> IncomingFragment {
    IncomingFragment {
        track: TrackType::Video,
        url: url.to_string(),
        bytes: Arc::new(bytes.to_vec()),
        abs_position_secs: position,
        duration_secs: duration,
        period_id: "p0".to_string(),
        is_init: false,
        init_identity: identity.to_string(),
        discontinuity: false,
        pts_offset_secs: 0.0,
    }
}

#[test]
fn write_index_read_scenario() {
    let manager = TsbSessionManager::init(
        temp_dir("write-index-read"),
        1800.0,
        0,
        1024 * 1024,
        64,
        None,
    )
    .unwrap();

    manager.enqueue_write(init_fragment("http://s/init.mp4", 0.0, "id-1"));
    manager.enqueue_write(media_fragment("http://s/v.mp4", 0.0, 2.0, "id-1", b"A"));
    manager.enqueue_write(media_fragment("http://s/v.mp4", 2.0, 2.0, "id-1", b"B"));

    wait_for(
        || manager.get_total_store_duration(TrackType::Video) == 4.0,
        Duration::from_secs(2),
    );

    manager
        .invoke_tsb_readers(0.0, 1.0, TuneType::New)
        .unwrap();

    let media_context = FakeMediaContext::new();
    assert!(manager
        .push_next_tsb_fragment(TrackType::Video, 1, &media_context)
        .unwrap());
    assert!(!manager
        .push_next_tsb_fragment(TrackType::Video, 1, &media_context)
        .unwrap());

    let delivered = media_context.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].position, 0.0);
    assert_eq!(&*delivered[0].bytes, b"A");
    assert_eq!(delivered[1].position, 2.0);
    assert_eq!(&*delivered[1].bytes, b"B");

    manager.flush();
}

#[test]
fn retention_evicts_oldest_on_no_space() {
    // Each fragment body is exactly one byte and the store's quota only
    // fits three of them at once (init + A + B), forcing a cull on the
    // fourth write (C).
    let manager = TsbSessionManager::init(temp_dir("retention"), 0.0, 0, 3, 64, None).unwrap();

    manager.enqueue_write(init_fragment("http://s/init.mp4", 0.0, "id-1"));
    manager.enqueue_write(media_fragment("http://s/v.mp4", 0.0, 3.0, "id-1", b"A"));
    manager.enqueue_write(media_fragment("http://s/v.mp4", 3.0, 3.0, "id-1", b"B"));

    wait_for(
        || manager.get_total_store_duration(TrackType::Video) == 6.0,
        Duration::from_secs(2),
    );

    // Third write forces NoSpace -> retention culls the oldest fragment
    // (A@0) before C can be written, since the quota only fits two bytes.
    manager.enqueue_write(media_fragment("http://s/v.mp4", 6.0, 3.0, "id-1", b"C"));

    wait_for(
        || manager.get_total_store_duration(TrackType::Video) == 6.0,
        Duration::from_secs(2),
    );

    manager
        .invoke_tsb_readers(3.0, 1.0, TuneType::New)
        .unwrap();
    manager.flush();
}

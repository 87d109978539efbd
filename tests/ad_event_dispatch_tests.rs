//! Covers scenario 6: ad events are dispatched exactly once, at the moment
//! the reader's injected position crosses the metadata's position.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aamp_tsb::tsb::events::test_support::{FakeEventSink, FakeMediaContext, RecordedEvent};
use aamp_tsb::tsb::events::{AdEventKind, EventSink};
use aamp_tsb::tsb::{IncomingFragment, TrackType, TsbSessionManager, TuneType};

fn temp_dir() -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!(
        "aamp-tsb-ad-events-{}-{}",
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

fn placement_starts(sink: &FakeEventSink) -> Vec<String> {
    sink.recorded()
        .into_iter()
        .filter_map(|event| match event {
            RecordedEvent::Placement {
                kind: AdEventKind::PlacementStart,
                ad_id,
                ..
            } => Some(ad_id),
            _ => None,
        })
        .collect()
}

fn media_fragment(position: f64, duration: f64, bytes: &[u8]) -> IncomingFragment {
    IncomingFragment {
        track: TrackType::Video,
        url: "http://s/v.mp4".to_string(),
        bytes: Arc::new(bytes.to_vec()),
        abs_position_secs: position,
        duration_secs: duration,
        period_id: "p0".to_string(),
        is_init: false,
        init_identity: "id-1".to_string(),
        discontinuity: false,
        pts_offset_secs: 0.0,
    }
}

#[test]
fn placement_start_dispatches_once_reader_crosses_its_position() {
    let sink = Arc::new(FakeEventSink::new());
    let manager = TsbSessionManager::init(
        temp_dir(),
        1800.0,
        0,
        1024 * 1024,
        64,
        Some(sink.clone() as Arc<dyn EventSink>),
    )
    .unwrap();

    manager.enqueue_write(IncomingFragment {
        track: TrackType::Video,
        url: "http://s/init.mp4".to_string(),
        bytes: Arc::new(b"I".to_vec()),
        abs_position_secs: 0.0,
        duration_secs: 0.0,
        period_id: "p0".to_string(),
        is_init: true,
        init_identity: "id-1".to_string(),
        discontinuity: false,
        pts_offset_secs: 0.0,
    });
    manager.enqueue_write(media_fragment(0.0, 2.0, b"A"));
    manager.enqueue_write(media_fragment(2.0, 2.0, b"B"));
    manager.enqueue_write(media_fragment(4.0, 2.0, b"C"));
    manager.enqueue_write(media_fragment(6.0, 2.0, b"D"));

    wait_for(
        || manager.get_total_store_duration(TrackType::Video) == 8.0,
        Duration::from_secs(2),
    );

    // Dispatch keys off each fragment's start position, so the ad at 5.0 is
    // only crossed once a fragment starting past it (6.0) is injected.
    manager.start_ad_placement(5.0, "ad-1", 30.0, 0, 0);

    manager
        .invoke_tsb_readers(0.0, 1.0, TuneType::New)
        .unwrap();

    let media_context = FakeMediaContext::new();

    manager.push_next_tsb_fragment(TrackType::Video, 1, &media_context).unwrap(); // start 0.0
    assert!(placement_starts(&sink).is_empty());

    manager.push_next_tsb_fragment(TrackType::Video, 1, &media_context).unwrap(); // start 2.0
    assert!(placement_starts(&sink).is_empty());

    manager.push_next_tsb_fragment(TrackType::Video, 1, &media_context).unwrap(); // start 4.0
    assert!(placement_starts(&sink).is_empty());

    manager.push_next_tsb_fragment(TrackType::Video, 1, &media_context).unwrap(); // start 6.0, crosses 5.0
    assert_eq!(placement_starts(&sink), vec!["ad-1".to_string()]);

    manager.flush();
}

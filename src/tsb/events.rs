//! Glue mapping stored ad metadata to the outer application's event
//! manager contract.
//!
//! The outer event manager is an external collaborator out of scope for
//! this subsystem, so it's modeled here as a trait boundary (`EventSink`)
//! that a real player integration implements; tests substitute a
//! hand-written fake rather than a mocking framework.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdEventKind {
    ReservationStart,
    ReservationEnd,
    PlacementStart,
    PlacementEnd,
    PlacementError,
}

/// The outer event manager's ad-event contract.
pub trait EventSink: Send + Sync {
    fn send_ad_reservation_event(
        &self,
        kind: AdEventKind,
        break_id: &str,
        period_position: u64,
        abs_position_secs: f64,
    );

    fn send_ad_placement_event(
        &self,
        kind: AdEventKind,
        ad_id: &str,
        relative_position: u32,
        abs_position_secs: f64,
        offset: u32,
        duration: f64,
    );
}

/// A fragment injected into the outer player's media pipeline, handed to
/// `MediaContext::cache_tsb_fragment` in place of the original's `CMediaFragment`.
#[derive(Debug, Clone)]
pub struct CachedFragment {
    pub bytes: std::sync::Arc<Vec<u8>>,
    pub position: f64,
    pub duration: f64,
    pub pts_offset_secs: f64,
    pub discontinuity: bool,
}

/// The outer player's media pipeline, the collaborator that
/// `push_next_tsb_fragment` hands decoded fragment bytes to. A real player
/// integration feeds these into its decoder queue; init segments are
/// distinguished by the caller, not this trait, since the contract here is
/// "cache this fragment," not "cache this init segment."
pub trait MediaContext: Send + Sync {
    fn cache_tsb_fragment(&self, fragment: CachedFragment);
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedEvent {
        Reservation {
            kind: AdEventKind,
            break_id: String,
            period_position: u64,
            abs_position_secs: f64,
        },
        Placement {
            kind: AdEventKind,
            ad_id: String,
            relative_position: u32,
            abs_position_secs: f64,
            offset: u32,
            duration: f64,
        },
    }

    /// A hand-written fake sink that records every dispatched event,
    /// standing in for a real outer event manager in tests.
    #[derive(Default)]
    pub struct FakeEventSink {
        events: Mutex<Vec<RecordedEvent>>,
    }

    impl FakeEventSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn recorded(&self) -> Vec<RecordedEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for FakeEventSink {
        fn send_ad_reservation_event(
            &self,
            kind: AdEventKind,
            break_id: &str,
            period_position: u64,
            abs_position_secs: f64,
        ) {
            self.events.lock().unwrap().push(RecordedEvent::Reservation {
                kind,
                break_id: break_id.to_string(),
                period_position,
                abs_position_secs,
            });
        }

        fn send_ad_placement_event(
            &self,
            kind: AdEventKind,
            ad_id: &str,
            relative_position: u32,
            abs_position_secs: f64,
            offset: u32,
            duration: f64,
        ) {
            self.events.lock().unwrap().push(RecordedEvent::Placement {
                kind,
                ad_id: ad_id.to_string(),
                relative_position,
                abs_position_secs,
                offset,
                duration,
            });
        }
    }

    /// A hand-written fake media context that records every delivered
    /// fragment's bytes, standing in for the real outer decoder pipeline.
    #[derive(Default)]
    pub struct FakeMediaContext {
        fragments: Mutex<Vec<CachedFragment>>,
    }

    impl FakeMediaContext {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn delivered(&self) -> Vec<CachedFragment> {
            self.fragments.lock().unwrap().clone()
        }
    }

    impl MediaContext for FakeMediaContext {
        fn cache_tsb_fragment(&self, fragment: CachedFragment) {
            self.fragments.lock().unwrap().push(fragment);
        }
    }
}

//! Per-track playback cursor over a `TsbDataManager`.

use crate::errors::ReaderError;
use crate::tsb::data_manager::{FragmentRecord, TsbDataManager};
use crate::tsb::{Direction, TrackType, TuneType};
use std::sync::Arc;

/// Result of pulling the next fragment from a reader.
#[derive(Debug, Clone)]
pub struct PullResult {
    pub fragment: FragmentRecord,
    pub want_init: bool,
    pub discontinuity: bool,
    /// Forward playback stepped past the last stored fragment.
    pub eos: bool,
    /// Reverse playback stepped past the first stored fragment.
    pub bos: bool,
}

/// A cursor over one track's stored fragments. Not thread-safe: each reader
/// is pinned to the single injection thread that consumes it.
pub struct TsbReader {
    track: TrackType,
    data_manager: Arc<TsbDataManager>,
    current: Option<FragmentRecord>,
    direction: Direction,
    rate: f64,
    injected_init_identity: Option<String>,
    last_period_id: Option<String>,
    pending_init: bool,
    enabled: bool,
    eos: bool,
    bos: bool,
}

impl TsbReader {
    pub fn new(track: TrackType, data_manager: Arc<TsbDataManager>) -> Self {
        Self {
            track,
            data_manager,
            current: None,
            direction: Direction::Forward,
            rate: 1.0,
            injected_init_identity: None,
            last_period_id: None,
            pending_init: true,
            enabled: true,
            eos: false,
            bos: false,
        }
    }

    pub fn track(&self) -> TrackType {
        self.track
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Position the cursor at `position` for playback at `rate`. Direction
    /// is inferred from the rate's sign. `tune_type` is currently only used
    /// for diagnostics; all tune types use the same positioning rule.
    pub fn init(
        &mut self,
        position: f64,
        rate: f64,
        tune_type: TuneType,
    ) -> Result<(), ReaderError> {
        tracing::debug!(track = ?self.track, position, rate, ?tune_type, "positioning reader");
        self.direction = Direction::from_rate(rate);
        self.rate = rate;
        self.eos = false;
        self.bos = false;
        self.pending_init = true;
        self.injected_init_identity = None;
        self.last_period_id = None;

        let fragment = self
            .data_manager
            .fragment_at(position, self.direction)
            .ok_or(ReaderError::OutOfRange { position })?;
        self.current = Some(fragment);
        Ok(())
    }

    /// Re-anchor the cursor, identical positioning rule to `init` but
    /// without resetting `pending_init` unconditionally: a seek to a
    /// fragment whose init identity matches the one already injected does
    /// not need to re-inject it.
    pub fn seek_to(&mut self, position: f64) -> Result<(), ReaderError> {
        let fragment = self
            .data_manager
            .fragment_at(position, self.direction)
            .ok_or(ReaderError::OutOfRange { position })?;
        let identity = self.data_manager.init_identity(&fragment);
        self.pending_init = identity != self.injected_init_identity;
        self.current = Some(fragment);
        self.eos = false;
        self.bos = false;
        self.last_period_id = None;
        Ok(())
    }

    /// Advance the cursor and report what the caller must do before
    /// presenting the returned fragment.
    pub fn pull_next(&mut self) -> Result<PullResult, ReaderError> {
        if self.eos {
            return Err(ReaderError::Eos);
        }
        if self.bos {
            return Err(ReaderError::Bos);
        }
        let current = self.current.clone().ok_or(ReaderError::OutOfRange {
            position: 0.0,
        })?;

        let identity = self.data_manager.init_identity(&current);
        let want_init = self.pending_init || identity != self.injected_init_identity;
        self.pending_init = false;
        self.injected_init_identity = identity;

        let period_changed = self
            .last_period_id
            .as_deref()
            .is_some_and(|last| last != current.period_id);
        let discontinuity = current.discontinuity || period_changed;
        self.last_period_id = Some(current.period_id.clone());

        let next = self.data_manager.next(&current, self.direction);
        let mut eos = false;
        let mut bos = false;
        match (next.is_none(), self.direction) {
            (false, _) => self.current = next,
            (true, Direction::Forward) => {
                self.eos = true;
                eos = true;
            }
            (true, Direction::Reverse) => {
                self.bos = true;
                bos = true;
            }
        }

        Ok(PullResult {
            fragment: current,
            want_init,
            discontinuity,
            eos,
            bos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsb::data_manager::InitRecord;

    fn setup() -> Arc<TsbDataManager> {
        let dm = Arc::new(TsbDataManager::new());
        let init = dm.add_init(InitRecord {
            storage_key: "init".to_string(),
            identity: "id-1".to_string(),
        });
        dm.add_fragment(
            FragmentRecord {
                position: 0.0,
                duration: 2.0,
                storage_key: "a".to_string(),
                period_id: "p0".to_string(),
                pts_offset_secs: 0.0,
                discontinuity: false,
                init_index: None,
            },
            Some(init),
        )
        .unwrap();
        dm.add_fragment(
            FragmentRecord {
                position: 2.0,
                duration: 2.0,
                storage_key: "b".to_string(),
                period_id: "p0".to_string(),
                pts_offset_secs: 0.0,
                discontinuity: false,
                init_index: None,
            },
            Some(init),
        )
        .unwrap();
        dm
    }

    #[test]
    fn first_pull_wants_init() {
        let dm = setup();
        let mut reader = TsbReader::new(TrackType::Video, dm);
        reader.init(0.0, 1.0, TuneType::New).unwrap();
        let result = reader.pull_next().unwrap();
        assert!(result.want_init);
        assert_eq!(result.fragment.storage_key, "a");
        assert!(!result.eos);
    }

    #[test]
    fn second_pull_same_init_does_not_want_init_again() {
        let dm = setup();
        let mut reader = TsbReader::new(TrackType::Video, dm);
        reader.init(0.0, 1.0, TuneType::New).unwrap();
        reader.pull_next().unwrap();
        let result = reader.pull_next().unwrap();
        assert!(!result.want_init);
        assert_eq!(result.fragment.storage_key, "b");
        assert!(result.eos);
    }

    #[test]
    fn pull_past_eos_errors() {
        let dm = setup();
        let mut reader = TsbReader::new(TrackType::Video, dm);
        reader.init(0.0, 1.0, TuneType::New).unwrap();
        reader.pull_next().unwrap();
        reader.pull_next().unwrap();
        assert!(matches!(reader.pull_next(), Err(ReaderError::Eos)));
    }

    #[test]
    fn init_on_empty_track_errors() {
        let empty_dm = Arc::new(TsbDataManager::new());
        let mut reader = TsbReader::new(TrackType::Video, empty_dm);
        assert!(matches!(
            reader.init(0.0, 1.0, TuneType::New),
            Err(ReaderError::OutOfRange { .. })
        ));
    }

    #[test]
    fn period_id_change_marks_discontinuity_even_without_flag() {
        let dm = Arc::new(TsbDataManager::new());
        dm.add_fragment(
            FragmentRecord {
                position: 0.0,
                duration: 2.0,
                storage_key: "a".to_string(),
                period_id: "p0".to_string(),
                pts_offset_secs: 0.0,
                discontinuity: false,
                init_index: None,
            },
            None,
        )
        .unwrap();
        dm.add_fragment(
            FragmentRecord {
                position: 2.0,
                duration: 2.0,
                storage_key: "b".to_string(),
                period_id: "p1".to_string(),
                pts_offset_secs: 0.0,
                discontinuity: false,
                init_index: None,
            },
            None,
        )
        .unwrap();
        let mut reader = TsbReader::new(TrackType::Video, dm);
        reader.init(0.0, 1.0, TuneType::New).unwrap();
        let first = reader.pull_next().unwrap();
        assert!(!first.discontinuity, "first pull has no prior period to compare against");
        let second = reader.pull_next().unwrap();
        assert!(second.discontinuity, "period id changed from p0 to p1");
    }

    #[test]
    fn reverse_playback_past_first_fragment_reports_bos_not_eos() {
        let dm = setup();
        let mut reader = TsbReader::new(TrackType::Video, dm);
        reader.init(2.0, -1.0, TuneType::New).unwrap();
        let first = reader.pull_next().unwrap();
        assert_eq!(first.fragment.storage_key, "b");
        assert!(!first.bos);
        let second = reader.pull_next().unwrap();
        assert_eq!(second.fragment.storage_key, "a");
        assert!(second.bos);
        assert!(!second.eos);
        assert!(matches!(reader.pull_next(), Err(ReaderError::Bos)));
    }
}

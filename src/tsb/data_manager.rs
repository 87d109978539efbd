//! Per-track ordered index of stored fragments and init segments.
//!
//! Each data manager owns a vector of init records and a vector of
//! fragment records; fragments refer to their init by index into that
//! vector rather than by pointer or shared handle.

use crate::tsb::mutex::TracedMutex;
use crate::tsb::Direction;

/// An initialisation-segment record: a small header blob that must precede
/// any media fragment sharing its `identity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRecord {
    pub storage_key: String,
    pub identity: String,
}

/// One stored media fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentRecord {
    pub position: f64,
    pub duration: f64,
    pub storage_key: String,
    pub period_id: String,
    pub pts_offset_secs: f64,
    pub discontinuity: bool,
    /// Index into the owning `TsbDataManager`'s init vector, or `None` if
    /// this fragment has no associated (or yet-culled) init record.
    pub(crate) init_index: Option<usize>,
}

struct Inner {
    inits: Vec<Option<InitRecord>>,
    fragments: Vec<FragmentRecord>,
}

/// Ordered, position-indexed store for a single track's fragments and init
/// segments. One instance per track, each with its own mutex.
pub struct TsbDataManager {
    inner: TracedMutex<Inner>,
}

impl Default for TsbDataManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TsbDataManager {
    pub fn new() -> Self {
        Self::with_slow_lock_warn_ms(50)
    }

    pub fn with_slow_lock_warn_ms(slow_lock_warn_ms: u64) -> Self {
        Self {
            inner: TracedMutex::new(
                "tsb_data_manager",
                slow_lock_warn_ms,
                Inner {
                    inits: Vec::new(),
                    fragments: Vec::new(),
                },
            ),
        }
    }

    /// Add an init record, returning its index for use by `add_fragment`.
    pub fn add_init(&self, record: InitRecord) -> usize {
        let mut inner = self.inner.lock();
        inner.inits.push(Some(record));
        inner.inits.len() - 1
    }

    /// Find the init index matching `identity`, if any init record with that
    /// identity is currently retained.
    pub fn find_init_index(&self, identity: &str) -> Option<usize> {
        let inner = self.inner.lock();
        inner
            .inits
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.identity == identity))
    }

    /// Insert `record` in position order. Rejects zero-duration fragments
    /// and fragments whose position duplicates one already stored.
    pub fn add_fragment(
        &self,
        mut record: FragmentRecord,
        init_index: Option<usize>,
    ) -> Result<(), &'static str> {
        if record.duration <= 0.0 {
            return Err("fragment duration must be positive");
        }
        record.init_index = init_index;

        let mut inner = self.inner.lock();
        let idx = inner
            .fragments
            .partition_point(|f| f.position < record.position);
        if inner
            .fragments
            .get(idx)
            .is_some_and(|f| f.position == record.position)
        {
            return Err("duplicate fragment position");
        }
        inner.fragments.insert(idx, record);
        Ok(())
    }

    fn init_identity_of(inner: &Inner, record: &FragmentRecord) -> Option<String> {
        record
            .init_index
            .and_then(|i| inner.inits.get(i))
            .and_then(|slot| slot.as_ref())
            .map(|r| r.identity.clone())
    }

    pub fn init_identity(&self, record: &FragmentRecord) -> Option<String> {
        let inner = self.inner.lock();
        Self::init_identity_of(&inner, record)
    }

    /// Return the fragment containing `position`, or the nearest one in
    /// `direction` if none contains it exactly.
    pub fn fragment_at(&self, position: f64, direction: Direction) -> Option<FragmentRecord> {
        let inner = self.inner.lock();
        if let Some(exact) = inner
            .fragments
            .iter()
            .find(|f| position >= f.position && position < f.position + f.duration)
        {
            return Some(exact.clone());
        }
        match direction {
            Direction::Forward => inner
                .fragments
                .iter()
                .find(|f| f.position >= position)
                .cloned(),
            Direction::Reverse => inner
                .fragments
                .iter()
                .rev()
                .find(|f| f.position <= position)
                .cloned(),
        }
    }

    /// Step one fragment in `direction` from `current`.
    pub fn next(&self, current: &FragmentRecord, direction: Direction) -> Option<FragmentRecord> {
        let inner = self.inner.lock();
        let idx = inner
            .fragments
            .iter()
            .position(|f| f.position == current.position)?;
        match direction {
            Direction::Forward => inner.fragments.get(idx + 1).cloned(),
            Direction::Reverse => idx.checked_sub(1).and_then(|i| inner.fragments.get(i)).cloned(),
        }
    }

    /// Remove all fragments with `position + duration <= horizon`; drop init
    /// records no surviving fragment references. Returns the storage keys
    /// the caller must now delete from the `TsbStore`.
    pub fn cull_before(&self, horizon: f64) -> CullResult {
        let mut inner = self.inner.lock();
        let split = inner
            .fragments
            .partition_point(|f| f.position + f.duration <= horizon);
        let removed: Vec<FragmentRecord> = inner.fragments.drain(0..split).collect();
        let removed_keys: Vec<String> = removed.iter().map(|f| f.storage_key.clone()).collect();

        let mut still_referenced = vec![false; inner.inits.len()];
        for f in &inner.fragments {
            if let Some(i) = f.init_index {
                still_referenced[i] = true;
            }
        }
        let mut removed_init_keys = Vec::new();
        for (i, referenced) in still_referenced.iter().enumerate() {
            if !referenced {
                if let Some(record) = inner.inits[i].take() {
                    removed_init_keys.push(record.storage_key);
                }
            }
        }

        CullResult {
            removed_fragment_keys: removed_keys,
            removed_init_keys,
        }
    }

    pub fn total_duration(&self) -> f64 {
        let inner = self.inner.lock();
        inner.fragments.iter().map(|f| f.duration).sum()
    }

    pub fn first_position(&self) -> Option<f64> {
        let inner = self.inner.lock();
        inner.fragments.first().map(|f| f.position)
    }

    pub fn last_position(&self) -> Option<f64> {
        let inner = self.inner.lock();
        inner.fragments.last().map(|f| f.position)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct CullResult {
    pub removed_fragment_keys: Vec<String>,
    pub removed_init_keys: Vec<String>,
}

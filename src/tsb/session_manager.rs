//! Orchestrator: owns the store, per-track data managers, metadata manager,
//! and readers; drains a write queue on a dedicated thread; enforces
//! retention; dispatches ad events; exposes the read/inject API.
//!
//! The write path runs on a dedicated `std::thread` rather than a `tokio`
//! task, since reader calls must execute synchronously on the caller's
//! thread and must never block behind the writer. See DESIGN.md for the
//! full rationale.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::errors::{ReaderError, SessionError, StoreError, TsbError};
use crate::tsb::data_manager::{FragmentRecord, InitRecord, TsbDataManager};
use crate::tsb::events::{CachedFragment, EventSink, MediaContext};
use crate::tsb::metadata::{self, AdPlacementEvent, AdReservationEvent, MetaDataKind, MetaDataRef};
use crate::tsb::reader::{PullResult, TsbReader};
use crate::tsb::store::TsbStore;
use crate::tsb::{TrackType, TuneType};

/// A fragment handed to `enqueue_write` by the fragment collector.
#[derive(Debug, Clone)]
pub struct IncomingFragment {
    pub track: TrackType,
    pub url: String,
    pub bytes: Arc<Vec<u8>>,
    pub abs_position_secs: f64,
    pub duration_secs: f64,
    pub period_id: String,
    pub is_init: bool,
    pub init_identity: String,
    pub discontinuity: bool,
    pub pts_offset_secs: f64,
}

struct WriteTask {
    fragment: IncomingFragment,
}

/// Bounded FIFO write queue with drop-oldest backpressure, guarded by a
/// mutex/condvar pair rather than a channel so the writer thread can be
/// woken for both "new task" and "stop" without an extra poll loop.
struct WriteQueue {
    tasks: Mutex<VecDeque<WriteTask>>,
    condvar: Condvar,
    capacity: usize,
    stopped: Mutex<bool>,
}

impl WriteQueue {
    fn new(capacity: usize) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            capacity,
            stopped: Mutex::new(false),
        }
    }

    fn push(&self, task: WriteTask) {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.len() >= self.capacity {
            if let Some(dropped) = tasks.pop_front() {
                tracing::warn!(
                    url = dropped.fragment.url,
                    "write queue full, dropping oldest task"
                );
            }
        }
        tasks.push_back(task);
        self.condvar.notify_one();
    }

    /// Block until a task is available or the queue is stopped.
    fn pop_blocking(&self) -> Option<WriteTask> {
        let mut tasks = self.tasks.lock().unwrap();
        loop {
            if let Some(task) = tasks.pop_front() {
                return Some(task);
            }
            if *self.stopped.lock().unwrap() {
                return None;
            }
            tasks = self.condvar.wait(tasks).unwrap();
        }
    }

    fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    fn drain(&self) {
        self.tasks.lock().unwrap().clear();
    }
}

struct TrackState {
    data_manager: Arc<TsbDataManager>,
    reader: Mutex<TsbReader>,
}

/// Orchestrates the whole TSB subsystem for one playback session.
pub struct TsbSessionManager {
    session_id: uuid::Uuid,
    created_at: chrono::DateTime<chrono::Utc>,
    tsb_length_secs: f64,
    store: Arc<TsbStore>,
    tracks: HashMap<TrackType, TrackState>,
    metadata: Arc<metadata::TsbMetaDataManager>,
    queue: Arc<WriteQueue>,
    writer_thread: Mutex<Option<JoinHandle<()>>>,
    event_sink: Option<Arc<dyn EventSink>>,
    active: Mutex<bool>,
    last_injected_position: Mutex<HashMap<TrackType, f64>>,
}

impl TsbSessionManager {
    /// Create and start an active session: opens the store, creates a data
    /// manager and reader per track, registers the ad metadata type as
    /// transient, and starts the dedicated writer thread.
    pub fn init(
        tsb_location: std::path::PathBuf,
        tsb_length_secs: f64,
        tsb_min_free_percentage: u8,
        tsb_max_disk_storage_bytes: u64,
        queue_capacity: usize,
        event_sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Arc<Self>, TsbError> {
        Self::init_with_slow_lock_warn_ms(
            tsb_location,
            tsb_length_secs,
            tsb_min_free_percentage,
            tsb_max_disk_storage_bytes,
            queue_capacity,
            event_sink,
            50,
        )
    }

    /// Same as `init`, but lets the caller override the `TracedMutex`
    /// warning threshold (`writer.slow_lock_warn_ms` in the configuration).
    pub fn init_with_slow_lock_warn_ms(
        tsb_location: std::path::PathBuf,
        tsb_length_secs: f64,
        tsb_min_free_percentage: u8,
        tsb_max_disk_storage_bytes: u64,
        queue_capacity: usize,
        event_sink: Option<Arc<dyn EventSink>>,
        slow_lock_warn_ms: u64,
    ) -> Result<Arc<Self>, TsbError> {
        let store = Arc::new(
            TsbStore::open(
                tsb_location,
                tsb_max_disk_storage_bytes,
                tsb_min_free_percentage,
            )
            .map_err(|e| TsbError::Session(SessionError::store_init_failed(e.to_string())))?,
        );

        let metadata_manager = Arc::new(metadata::TsbMetaDataManager::with_slow_lock_warn_ms(
            slow_lock_warn_ms,
        ));
        metadata_manager
            .register_type(MetaDataKind::Ad, true)
            .map_err(|e| TsbError::Session(SessionError::store_init_failed(e.to_string())))?;

        let mut tracks = HashMap::new();
        for &track in TrackType::ALL.iter() {
            let dm = Arc::new(TsbDataManager::with_slow_lock_warn_ms(slow_lock_warn_ms));
            let reader = TsbReader::new(track, dm.clone());
            tracks.insert(
                track,
                TrackState {
                    data_manager: dm,
                    reader: Mutex::new(reader),
                },
            );
        }

        let queue = Arc::new(WriteQueue::new(queue_capacity));
        let session_id = uuid::Uuid::new_v4();
        let created_at = chrono::Utc::now();

        let manager = Arc::new(Self {
            session_id,
            created_at,
            tsb_length_secs,
            store,
            tracks,
            metadata: metadata_manager,
            queue: queue.clone(),
            writer_thread: Mutex::new(None),
            event_sink,
            active: Mutex::new(true),
            last_injected_position: Mutex::new(HashMap::new()),
        });

        let worker_manager = manager.clone();
        let handle = std::thread::spawn(move || worker_manager.writer_loop());
        *manager.writer_thread.lock().unwrap() = Some(handle);

        tracing::info!(session_id = %session_id, created_at = %created_at, "tsb session manager initialized");
        Ok(manager)
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    pub fn is_active(&self) -> bool {
        *self.active.lock().unwrap()
    }

    /// Stop the writer thread, discard all content, and reset indexes.
    /// Leaves the instance unusable; callers re-create via `init`.
    pub fn flush(&self) {
        *self.active.lock().unwrap() = false;
        self.queue.stop();
        self.queue.drain();
        if let Some(handle) = self.writer_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.store.flush();
        tracing::info!("tsb session manager flushed");
    }

    fn writer_loop(&self) {
        while let Some(task) = self.queue.pop_blocking() {
            self.handle_write_task(task.fragment);
        }
        tracing::debug!("writer thread exiting");
    }

    fn storage_key(url: &str, abs_position_secs: f64) -> String {
        format!("{}.{}", url, abs_position_secs.floor() as i64)
    }

    fn handle_write_task(&self, fragment: IncomingFragment) {
        let key = Self::storage_key(&fragment.url, fragment.abs_position_secs);

        let write_result = self.store.write(&key, &fragment.bytes);
        let write_result = match write_result {
            Err(StoreError::NoSpace { .. }) => {
                tracing::warn!(track = ?fragment.track, "store reported no space, running retention");
                if let Some(horizon) = self.cull_horizon() {
                    self.run_retention(horizon);
                }
                self.store.write(&key, &fragment.bytes)
            }
            other => other,
        };

        match write_result {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                // Treated as success, but skip index insertion.
                return;
            }
            Err(StoreError::NoSpace { .. }) => {
                tracing::warn!(track = ?fragment.track, url = fragment.url, "dropping fragment: persistent no-space");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, url = fragment.url, "store write failed");
                return;
            }
        }

        let Some(state) = self.tracks.get(&fragment.track) else {
            tracing::error!(track = ?fragment.track, "write for unknown track");
            return;
        };

        if fragment.is_init {
            state.data_manager.add_init(InitRecord {
                storage_key: key,
                identity: fragment.init_identity,
            });
            return;
        }

        let init_index = state.data_manager.find_init_index(&fragment.init_identity);
        let record = FragmentRecord {
            position: fragment.abs_position_secs,
            duration: fragment.duration_secs,
            storage_key: key,
            period_id: fragment.period_id,
            pts_offset_secs: fragment.pts_offset_secs,
            discontinuity: fragment.discontinuity,
            init_index: None,
        };
        if let Err(reason) = state.data_manager.add_fragment(record, init_index) {
            tracing::warn!(reason, "rejected fragment record");
        }
    }

    /// Non-blocking enqueue; the writer thread performs the actual store
    /// write and indexing.
    pub fn enqueue_write(&self, fragment: IncomingFragment) {
        self.queue.push(WriteTask { fragment });
    }

    /// Position all enabled readers for playback at `position` and `rate`.
    pub fn invoke_tsb_readers(
        &self,
        position: f64,
        rate: f64,
        tune_type: TuneType,
    ) -> Result<(), TsbError> {
        for state in self.tracks.values() {
            let mut reader = state.reader.lock().unwrap();
            if !reader.enabled() {
                continue;
            }
            reader.init(position, rate, tune_type)?;
        }
        Ok(())
    }

    /// Whether `track`'s reader is currently enabled. Stands in for
    /// `GetTsbReader(track)` in callers that only need the track-enable
    /// state, without exposing the reader itself.
    pub fn track_enabled(&self, track: TrackType) -> Result<bool, TsbError> {
        let state = self
            .tracks
            .get(&track)
            .ok_or(ReaderError::NoSuchTrack { track })?;
        Ok(state.reader.lock().unwrap().enabled())
    }

    pub fn set_track_enabled(&self, track: TrackType, enabled: bool) -> Result<(), TsbError> {
        let state = self
            .tracks
            .get(&track)
            .ok_or(ReaderError::NoSuchTrack { track })?;
        state.reader.lock().unwrap().set_enabled(enabled);
        Ok(())
    }

    pub fn get_total_store_duration(&self, track: TrackType) -> f64 {
        self.tracks
            .get(&track)
            .map(|s| s.data_manager.total_duration())
            .unwrap_or(0.0)
    }

    /// Pull up to `max_fragments` for `track`, fetching each fragment's
    /// stored bytes and handing them to `media_context`, dispatching any ad
    /// metadata events crossed between the previous and current injected
    /// position. Returns `Ok(true)` while more fragments may follow,
    /// `Ok(false)` on eos/bos.
    pub fn push_next_tsb_fragment(
        &self,
        track: TrackType,
        max_fragments: usize,
        media_context: &dyn MediaContext,
    ) -> Result<bool, TsbError> {
        let state = self
            .tracks
            .get(&track)
            .ok_or(ReaderError::NoSuchTrack { track })?;

        let mut more = true;
        for _ in 0..max_fragments {
            let pull: PullResult = {
                let mut reader = state.reader.lock().unwrap();
                match reader.pull_next() {
                    Ok(pull) => pull,
                    Err(ReaderError::Eos) | Err(ReaderError::Bos) => {
                        more = false;
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            self.dispatch_ad_events_up_to(track, pull.fragment.position);

            tracing::trace!(
                ?track,
                position = pull.fragment.position,
                want_init = pull.want_init,
                discontinuity = pull.discontinuity,
                "injecting fragment"
            );

            let bytes = self.store.read(&pull.fragment.storage_key)?;
            media_context.cache_tsb_fragment(CachedFragment {
                bytes: Arc::new(bytes),
                position: pull.fragment.position,
                duration: pull.fragment.duration,
                pts_offset_secs: pull.fragment.pts_offset_secs,
                discontinuity: pull.discontinuity,
            });

            if pull.eos || pull.bos {
                more = false;
                break;
            }
        }
        Ok(more)
    }

    fn dispatch_ad_events_up_to(&self, track: TrackType, position: f64) {
        let mut last = self.last_injected_position.lock().unwrap();
        let start = last.get(&track).copied().unwrap_or(f64::NEG_INFINITY);
        if position > start {
            // Events whose position is <= the fragment's absolute position
            // and > the previously injected position.
            let items = self
                .metadata
                .get_by_type(MetaDataKind::Ad, Some(|m: &metadata::TsbMetaData| {
                    m.position() > start && m.position() <= position
                }));
            for item in items {
                let sink = self.event_sink.as_deref();
                item.lock().unwrap().send_event(sink);
            }
        }
        last.insert(track, position);
    }

    /// The oldest absolute position to retain: `liveEdge - tsbLength`. `None`
    /// while no track has any stored fragment yet.
    fn cull_horizon(&self) -> Option<f64> {
        let live_edge = self
            .tracks
            .values()
            .filter_map(|s| s.data_manager.last_position())
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))))?;
        Some(live_edge - self.tsb_length_secs)
    }

    /// Called by the outer player on every progress tick. Computes the cull
    /// horizon and evicts fragments and metadata past it.
    pub fn update_progress(&self, _playback_duration_secs: f64, live_edge_offset_secs: f64) {
        if let Some(horizon) = self.cull_horizon() {
            self.run_retention(horizon - live_edge_offset_secs);
        }
    }

    fn run_retention(&self, horizon: f64) {
        for state in self.tracks.values() {
            let result = state.data_manager.cull_before(horizon);
            for key in result
                .removed_fragment_keys
                .iter()
                .chain(result.removed_init_keys.iter())
            {
                self.store.delete(key);
            }
        }
        let removed = self.metadata.remove_metadata_before(horizon);
        if removed > 0 {
            tracing::debug!(removed, horizon, "culled metadata past horizon");
        }
    }

    fn add_metadata(&self, md: MetaDataRef) {
        if let Err(e) = self.metadata.add_metadata(md) {
            tracing::warn!(error = %e, "ad metadata rejected");
        }
    }

    pub fn start_ad_reservation(&self, position: f64, break_id: impl Into<String>, period_position: u64) {
        let md = metadata::new_ad_reservation(position, break_id, period_position, AdReservationEvent::Start);
        self.add_metadata(md);
    }

    pub fn end_ad_reservation(&self, position: f64, break_id: impl Into<String>, period_position: u64) {
        let md = metadata::new_ad_reservation(position, break_id, period_position, AdReservationEvent::End);
        self.add_metadata(md);
    }

    pub fn start_ad_placement(
        &self,
        position: f64,
        ad_id: impl Into<String>,
        duration: f64,
        relative_position: u32,
        offset: u32,
    ) {
        let md = metadata::new_ad_placement(
            position,
            ad_id,
            duration,
            relative_position,
            offset,
            AdPlacementEvent::Start,
        );
        self.add_metadata(md);
    }

    pub fn end_ad_placement(
        &self,
        position: f64,
        ad_id: impl Into<String>,
        duration: f64,
        relative_position: u32,
        offset: u32,
    ) {
        let md = metadata::new_ad_placement(
            position,
            ad_id,
            duration,
            relative_position,
            offset,
            AdPlacementEvent::End,
        );
        self.add_metadata(md);
    }

    pub fn end_ad_placement_with_error(
        &self,
        position: f64,
        ad_id: impl Into<String>,
        duration: f64,
        relative_position: u32,
        offset: u32,
    ) {
        let md = metadata::new_ad_placement(
            position,
            ad_id,
            duration,
            relative_position,
            offset,
            AdPlacementEvent::Error,
        );
        self.add_metadata(md);
    }

    /// Re-position every ad metadata item strictly after `reference_position`
    /// by `shift_secs`, as a single atomic batch.
    pub fn shift_future_ad_events(&self, reference_position: f64, shift_secs: f64) -> bool {
        let items: Vec<MetaDataRef> = self
            .metadata
            .get_by_type(
                MetaDataKind::Ad,
                Some(move |m: &metadata::TsbMetaData| m.position() > reference_position),
            );
        let updates: Vec<(MetaDataRef, f64)> = items
            .into_iter()
            .map(|item| {
                let new_position = item.lock().unwrap().position() + shift_secs;
                (item, new_position)
            })
            .collect();
        self.metadata.change_metadata_position(&updates)
    }
}

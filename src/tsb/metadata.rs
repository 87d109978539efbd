//! Polymorphic ad metadata and the ordered, type-registered manager that
//! holds it.
//!
//! `TsbMetaData` is a tagged enum covering the two ad metadata kinds
//! rather than a small class hierarchy. Items are held behind
//! `Arc<Mutex<_>>` handles and compared with `Arc::ptr_eq`, so duplicate
//! and removal checks are identity-based: adding the same handle twice is
//! rejected, while two value-identical-but-distinct items are not.

use crate::errors::MetadataError;
use crate::tsb::events::{AdEventKind, EventSink};
use crate::tsb::mutex::TracedMutex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Distinguishes the two ad metadata kinds. Ad reservation and ad
/// placement share a single registration under `MetaDataKind::Ad`, while
/// `TsbMetaData` itself still distinguishes reservation from placement
/// per-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaDataKind {
    Ad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdReservationEvent {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdPlacementEvent {
    Start,
    End,
    Error,
}

/// One positioned, ordered metadata item.
#[derive(Debug, Clone, PartialEq)]
pub enum TsbMetaData {
    AdReservation {
        position: f64,
        order_added: u32,
        break_id: String,
        period_position: u64,
        event: AdReservationEvent,
    },
    AdPlacement {
        position: f64,
        order_added: u32,
        ad_id: String,
        duration: f64,
        relative_position: u32,
        offset: u32,
        event: AdPlacementEvent,
    },
}

/// Shared handle to a metadata item. The manager stores these rather than
/// owned values so that identity (not value) equality governs duplicate
/// detection and removal.
pub type MetaDataRef = Arc<Mutex<TsbMetaData>>;

pub fn new_ad_reservation(
    position: f64,
    break_id: impl Into<String>,
    period_position: u64,
    event: AdReservationEvent,
) -> MetaDataRef {
    Arc::new(Mutex::new(TsbMetaData::AdReservation {
        position,
        order_added: 0,
        break_id: break_id.into(),
        period_position,
        event,
    }))
}

pub fn new_ad_placement(
    position: f64,
    ad_id: impl Into<String>,
    duration: f64,
    relative_position: u32,
    offset: u32,
    event: AdPlacementEvent,
) -> MetaDataRef {
    Arc::new(Mutex::new(TsbMetaData::AdPlacement {
        position,
        order_added: 0,
        ad_id: ad_id.into(),
        duration,
        relative_position,
        offset,
        event,
    }))
}

impl TsbMetaData {
    pub fn kind(&self) -> MetaDataKind {
        MetaDataKind::Ad
    }

    pub fn position(&self) -> f64 {
        match self {
            TsbMetaData::AdReservation { position, .. } => *position,
            TsbMetaData::AdPlacement { position, .. } => *position,
        }
    }

    pub fn set_position(&mut self, new_position: f64) {
        match self {
            TsbMetaData::AdReservation { position, .. } => *position = new_position,
            TsbMetaData::AdPlacement { position, .. } => *position = new_position,
        }
    }

    pub fn order_added(&self) -> u32 {
        match self {
            TsbMetaData::AdReservation { order_added, .. } => *order_added,
            TsbMetaData::AdPlacement { order_added, .. } => *order_added,
        }
    }

    fn set_order_added(&mut self, value: u32) {
        match self {
            TsbMetaData::AdReservation { order_added, .. } => *order_added = value,
            TsbMetaData::AdPlacement { order_added, .. } => *order_added = value,
        }
    }

    fn sort_key(&self) -> (f64, u32) {
        (self.position(), self.order_added())
    }

    pub fn dump(&self, prefix: &str) {
        match self {
            TsbMetaData::AdReservation {
                position,
                order_added,
                break_id,
                period_position,
                event,
            } => tracing::debug!(
                %prefix, position, order_added, break_id, period_position, ?event,
                "ad reservation metadata"
            ),
            TsbMetaData::AdPlacement {
                position,
                order_added,
                ad_id,
                duration,
                relative_position,
                offset,
                event,
            } => tracing::debug!(
                %prefix, position, order_added, ad_id, duration, relative_position, offset, ?event,
                "ad placement metadata"
            ),
        }
    }

    /// Dispatch this item's event through the outer event manager. Tolerates
    /// a missing sink by logging and returning.
    pub fn send_event(&self, sink: Option<&dyn EventSink>) {
        let Some(sink) = sink else {
            tracing::error!("no event sink available, dropping ad event");
            return;
        };
        match self {
            TsbMetaData::AdReservation {
                break_id,
                period_position,
                position,
                event,
                ..
            } => {
                let kind = match event {
                    AdReservationEvent::Start => AdEventKind::ReservationStart,
                    AdReservationEvent::End => AdEventKind::ReservationEnd,
                };
                sink.send_ad_reservation_event(kind, break_id, *period_position, *position);
            }
            TsbMetaData::AdPlacement {
                ad_id,
                relative_position,
                offset,
                duration,
                position,
                event,
                ..
            } => {
                let kind = match event {
                    AdPlacementEvent::Start => AdEventKind::PlacementStart,
                    AdPlacementEvent::End => AdEventKind::PlacementEnd,
                    AdPlacementEvent::Error => AdEventKind::PlacementError,
                };
                sink.send_ad_placement_event(
                    kind,
                    ad_id,
                    *relative_position,
                    *position,
                    *offset,
                    *duration,
                );
            }
        }
    }
}

fn sort_key_of(item: &MetaDataRef) -> (f64, u32) {
    item.lock().unwrap().sort_key()
}

fn position_of(item: &MetaDataRef) -> f64 {
    item.lock().unwrap().position()
}

struct TypeEntry {
    transient: bool,
    items: Vec<MetaDataRef>,
}

struct Inner {
    types: HashMap<MetaDataKind, TypeEntry>,
    next_order_added: u32,
}

/// Ordered, type-registered container of metadata. A single mutex
/// serialises all mutations and queries across every registered type.
pub struct TsbMetaDataManager {
    inner: TracedMutex<Inner>,
}

impl Default for TsbMetaDataManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TsbMetaDataManager {
    pub fn new() -> Self {
        Self::with_slow_lock_warn_ms(50)
    }

    pub fn with_slow_lock_warn_ms(slow_lock_warn_ms: u64) -> Self {
        Self {
            inner: TracedMutex::new(
                "tsb_metadata_manager",
                slow_lock_warn_ms,
                Inner {
                    types: HashMap::new(),
                    next_order_added: 1,
                },
            ),
        }
    }

    /// Register `kind` with the given transience. Re-registering an
    /// already-registered type fails.
    pub fn register_type(&self, kind: MetaDataKind, transient: bool) -> Result<(), MetadataError> {
        let mut inner = self.inner.lock();
        if inner.types.contains_key(&kind) {
            return Err(MetadataError::AlreadyRegistered);
        }
        inner.types.insert(
            kind,
            TypeEntry {
                transient,
                items: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, kind: MetaDataKind) -> bool {
        self.inner.lock().types.contains_key(&kind)
    }

    /// Assign an order-added and insert `md` in sorted `(position,
    /// order_added)` order. Rejects items of an unregistered type and the
    /// same handle added twice (identity, not value, duplicate check).
    pub fn add_metadata(&self, md: MetaDataRef) -> Result<(), MetadataError> {
        let mut inner = self.inner.lock();
        let kind = md.lock().unwrap().kind();
        if !inner.types.contains_key(&kind) {
            tracing::error!(?kind, "attempted to add metadata of unregistered type");
            return Err(MetadataError::NotRegistered);
        }

        let entry = inner.types.get(&kind).unwrap();
        if entry.items.iter().any(|existing| Arc::ptr_eq(existing, &md)) {
            tracing::warn!("duplicate metadata handle rejected");
            return Err(MetadataError::Duplicate);
        }

        let order_added = inner.next_order_added;
        inner.next_order_added = match inner.next_order_added.checked_add(1) {
            Some(n) => n,
            None => {
                tracing::warn!("metadata order-added counter wrapped");
                1
            }
        };
        md.lock().unwrap().set_order_added(order_added);

        let entry = inner.types.get_mut(&kind).unwrap();
        let key = sort_key_of(&md);
        let idx = entry
            .items
            .partition_point(|m| sort_key_of(m) < key);
        entry.items.insert(idx, md);
        Ok(())
    }

    /// Remove `md` by handle identity.
    pub fn remove_metadata(&self, md: &MetaDataRef) -> bool {
        let mut inner = self.inner.lock();
        let kind = md.lock().unwrap().kind();
        let Some(entry) = inner.types.get_mut(&kind) else {
            return false;
        };
        if let Some(idx) = entry.items.iter().position(|m| Arc::ptr_eq(m, md)) {
            entry.items.remove(idx);
            true
        } else {
            false
        }
    }

    /// Remove metadata at or before `position`. Per type:
    /// - transient: remove everything `<= position`;
    /// - non-transient: remove everything strictly before the most recent
    ///   item `<= position`, keeping that item as "still active."
    ///
    /// Returns the total number removed across all registered types.
    pub fn remove_metadata_before(&self, position: f64) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for entry in inner.types.values_mut() {
            let latest_le = entry
                .items
                .iter()
                .rposition(|m| position_of(m) <= position);
            let Some(latest_le) = latest_le else {
                continue;
            };
            let split_at = if entry.transient {
                latest_le + 1
            } else {
                latest_le
            };
            removed += entry.items.drain(0..split_at).count();
        }
        removed
    }

    /// Remove every item across all types for which `predicate` returns
    /// true. Returns the total removed count.
    pub fn remove_metadata_if(&self, predicate: impl Fn(&TsbMetaData) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for entry in inner.types.values_mut() {
            let before = entry.items.len();
            entry.items.retain(|m| !predicate(&m.lock().unwrap()));
            removed += before - entry.items.len();
        }
        removed
    }

    /// Range query `[range_start, range_end)`. For a non-transient type,
    /// additionally includes the item strictly before `range_start` that is
    /// "still active" there, unless an item falls exactly at `range_start`.
    pub fn get_by_type_range(
        &self,
        kind: MetaDataKind,
        range_start: f64,
        range_end: f64,
    ) -> Vec<MetaDataRef> {
        if range_end <= range_start {
            return Vec::new();
        }
        let inner = self.inner.lock();
        let Some(entry) = inner.types.get(&kind) else {
            return Vec::new();
        };

        let mut result: Vec<MetaDataRef> = entry
            .items
            .iter()
            .filter(|m| {
                let p = position_of(m);
                p >= range_start && p < range_end
            })
            .cloned()
            .collect();

        if !entry.transient {
            let has_exact_start = entry.items.iter().any(|m| position_of(m) == range_start);
            if !has_exact_start {
                if let Some(active) = entry.items.iter().rev().find(|m| position_of(m) < range_start) {
                    result.insert(0, active.clone());
                }
            }
        }

        result
    }

    /// Full-type scan with an optional filter predicate.
    pub fn get_by_type(
        &self,
        kind: MetaDataKind,
        predicate: Option<impl Fn(&TsbMetaData) -> bool>,
    ) -> Vec<MetaDataRef> {
        let inner = self.inner.lock();
        let Some(entry) = inner.types.get(&kind) else {
            return Vec::new();
        };
        match predicate {
            Some(p) => entry
                .items
                .iter()
                .filter(|m| p(&m.lock().unwrap()))
                .cloned()
                .collect(),
            None => entry.items.clone(),
        }
    }

    pub fn size(&self, kind: MetaDataKind) -> usize {
        self.inner
            .lock()
            .types
            .get(&kind)
            .map(|e| e.items.len())
            .unwrap_or(0)
    }

    /// Re-position a batch of items, preserving the `(position,
    /// order_added)` sort. If an item in `updates` is not found in the
    /// manager (by handle identity), it is skipped and the overall result
    /// is `false`, but the remaining items in the batch are still applied.
    pub fn change_metadata_position(&self, updates: &[(MetaDataRef, f64)]) -> bool {
        let mut inner = self.inner.lock();
        let mut all_updated = true;
        for (target, new_position) in updates {
            let kind = target.lock().unwrap().kind();
            let Some(entry) = inner.types.get_mut(&kind) else {
                all_updated = false;
                continue;
            };
            let Some(idx) = entry.items.iter().position(|m| Arc::ptr_eq(m, target)) else {
                all_updated = false;
                continue;
            };
            let item = entry.items.remove(idx);
            item.lock().unwrap().set_position(*new_position);
            let key = sort_key_of(&item);
            let new_idx = entry.items.partition_point(|m| sort_key_of(m) < key);
            entry.items.insert(new_idx, item);
        }
        all_updated
    }
}

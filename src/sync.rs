//! Syncers and syncer sets
//!
//! A syncer moves one contiguous blackboard region to or from a subsystem
//! back-end. Concrete syncers are built by subsystem object creators during
//! mapping and live in the [`SyncerRegistry`] arena; everything else refers
//! to them by [`SyncerId`]. A syncer set is an insertion-ordered,
//! deduplicating collection of ids, which is what gives the apply cycle its
//! at-most-once-per-syncer guarantee.
//!
//! `SyncerSet::sync` keeps going after a member fails: the point of a batch
//! sync is to complete as much of it as possible, so failures are collected
//! and reported together at the end.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::blackboard::Blackboard;

/// Stable index of a syncer in the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncerId(pub usize);

impl SyncerId {
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// One failed synchronization, with the subsystem-supplied detail.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unable to synchronize {path}: {detail}")]
pub struct SyncError {
    pub path: String,
    pub detail: String,
}

/// Aggregate of every failure of one batch sync. The batch still ran to the
/// end; in-memory state is whatever the successful members left.
#[derive(Debug, thiserror::Error)]
#[error("{} synchronization failure(s): {}", .failures.len(),
        .failures.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
pub struct SyncFailures {
    pub failures: Vec<SyncError>,
}

/// A subsystem back-end coupling for one blackboard region.
///
/// `back = false` pushes the region to the subsystem; `back = true` pulls the
/// subsystem state into the blackboard (back-synchronization).
pub trait Syncer: Send {
    /// First byte of the covered region.
    fn offset(&self) -> usize;
    /// Size of the covered region.
    fn size(&self) -> usize;
    fn sync(&mut self, blackboard: &mut Blackboard, back: bool) -> Result<(), SyncError>;
}

/// Owns every concrete syncer; everything else holds `SyncerId`s.
#[derive(Default)]
pub struct SyncerRegistry {
    syncers: Vec<Box<dyn Syncer>>,
}

impl SyncerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, syncer: Box<dyn Syncer>) -> SyncerId {
        self.syncers.push(syncer);
        SyncerId(self.syncers.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.syncers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syncers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = SyncerId> {
        (0..self.syncers.len()).map(SyncerId)
    }

    pub fn get_mut(&mut self, id: SyncerId) -> &mut dyn Syncer {
        self.syncers[id.0].as_mut()
    }

    /// Drive every registered syncer in registration order (used by the
    /// initial back-synchronization and the manual sync command).
    pub fn sync_all(
        &mut self,
        blackboard: &mut Blackboard,
        back: bool,
    ) -> Result<(), SyncFailures> {
        let mut failures = Vec::new();
        for syncer in &mut self.syncers {
            if let Err(e) = syncer.sync(blackboard, back) {
                warn!(error = %e, back, "synchronization failure");
                failures.push(e);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncFailures { failures })
        }
    }
}

/// Insertion-ordered, deduplicating set of syncer references.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncerSet {
    members: Vec<SyncerId>,
}

impl SyncerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member; already-present ids keep their original position.
    pub fn add(&mut self, id: SyncerId) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    pub fn add_all(&mut self, other: &SyncerSet) {
        for &id in &other.members {
            self.add(id);
        }
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = SyncerId> + '_ {
        self.members.iter().copied()
    }

    /// Invoke every member in insertion order; aggregate failures and keep
    /// going so a partial sync completes as much as possible.
    pub fn sync(
        &self,
        registry: &mut SyncerRegistry,
        blackboard: &mut Blackboard,
        back: bool,
    ) -> Result<(), SyncFailures> {
        let mut failures = Vec::new();
        for &id in &self.members {
            if let Err(e) = registry.get_mut(id).sync(blackboard, back) {
                warn!(error = %e, back, "synchronization failure");
                failures.push(e);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncFailures { failures })
        }
    }
}

// ---------------------------------------------------------------------------
// Loopback back-end (simulation / virtual subsystems)
// ---------------------------------------------------------------------------

/// In-memory subsystem back-end: forward sync copies the covered region into
/// a shared byte store, back sync copies the store into the blackboard.
/// Embedders keep the store handle to observe or seed "hardware" state.
pub struct LoopbackSyncer {
    path: String,
    offset: usize,
    store: Arc<Mutex<Vec<u8>>>,
}

impl LoopbackSyncer {
    /// `store`'s length fixes the covered size.
    pub fn new(path: impl Into<String>, offset: usize, store: Arc<Mutex<Vec<u8>>>) -> Self {
        Self {
            path: path.into(),
            offset,
            store,
        }
    }
}

impl Syncer for LoopbackSyncer {
    fn offset(&self) -> usize {
        self.offset
    }

    fn size(&self) -> usize {
        self.store.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn sync(&mut self, blackboard: &mut Blackboard, back: bool) -> Result<(), SyncError> {
        let mut store = self.store.lock().map_err(|_| SyncError {
            path: self.path.clone(),
            detail: "backing store poisoned".into(),
        })?;
        let result = if back {
            blackboard.raw_write(&store, self.offset)
        } else {
            blackboard.raw_read(&mut store, self.offset)
        };
        result.map_err(|e| SyncError {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSyncer;

    impl Syncer for FailingSyncer {
        fn offset(&self) -> usize {
            0
        }
        fn size(&self) -> usize {
            0
        }
        fn sync(&mut self, _bb: &mut Blackboard, _back: bool) -> Result<(), SyncError> {
            Err(SyncError {
                path: "/Dead/End".into(),
                detail: "bus timeout".into(),
            })
        }
    }

    #[test]
    fn set_deduplicates_and_keeps_insertion_order() {
        let mut set = SyncerSet::new();
        set.add(SyncerId(2));
        set.add(SyncerId(0));
        set.add(SyncerId(2));
        set.add(SyncerId(1));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![
            SyncerId(2),
            SyncerId(0),
            SyncerId(1)
        ]);

        let mut other = SyncerSet::new();
        other.add(SyncerId(1));
        other.add(SyncerId(3));
        set.add_all(&other);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn loopback_moves_bytes_both_ways() {
        let mut bb = Blackboard::new(8);
        bb.raw_write(&[9, 8, 7], 2).unwrap();

        let store = Arc::new(Mutex::new(vec![0u8; 3]));
        let mut registry = SyncerRegistry::new();
        let id = registry.register(Box::new(LoopbackSyncer::new("/S/P", 2, store.clone())));

        let mut set = SyncerSet::new();
        set.add(id);
        set.sync(&mut registry, &mut bb, false).unwrap();
        assert_eq!(&*store.lock().unwrap(), &[9, 8, 7]);

        // Seed "hardware" and back-sync it into the board.
        store.lock().unwrap().copy_from_slice(&[1, 2, 3]);
        set.sync(&mut registry, &mut bb, true).unwrap();
        assert_eq!(&bb.bytes()[2..5], &[1, 2, 3]);
    }

    #[test]
    fn partial_failure_aggregates_and_continues() {
        let mut bb = Blackboard::new(4);
        bb.raw_write(&[5, 5], 0).unwrap();

        let store = Arc::new(Mutex::new(vec![0u8; 2]));
        let mut registry = SyncerRegistry::new();
        let bad = registry.register(Box::new(FailingSyncer));
        let good = registry.register(Box::new(LoopbackSyncer::new("/S/Q", 0, store.clone())));

        let mut set = SyncerSet::new();
        set.add(bad);
        set.add(good);
        let err = set.sync(&mut registry, &mut bb, false).unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert!(err.failures[0].to_string().contains("/Dead/End"));
        // The member after the failure still ran.
        assert_eq!(&*store.lock().unwrap(), &[5, 5]);
    }
}

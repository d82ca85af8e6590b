//! In-flight and cached object fetches, keyed by [`RootId`].
//!
//! Owned by the session actor. A fetch is started once per id; later callers
//! join its waiter list instead of issuing another wire request. Each fetch
//! gets a generation so a timer armed for an earlier fetch cannot reject a
//! later one.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::oneshot;

use crate::{
    error::{DebugError, DebugResult},
    handles::RootId,
    variables::GodotObject,
};

pub type FetchWaiter = oneshot::Sender<DebugResult<Arc<GodotObject>>>;

#[derive(Debug)]
enum FetchState {
    Pending {
        generation: u64,
        waiters: Vec<FetchWaiter>,
    },
    Resolved(Arc<GodotObject>),
}

/// What the table knows about an id.
#[derive(Debug)]
pub enum Lookup {
    Resolved(Arc<GodotObject>),
    Pending,
    Missing,
}

#[derive(Debug, Default)]
pub struct FetchTable {
    entries: HashMap<RootId, FetchState>,
    next_generation: u64,
}

impl FetchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: RootId) -> Lookup {
        match self.entries.get(&id) {
            Some(FetchState::Resolved(object)) => Lookup::Resolved(object.clone()),
            Some(FetchState::Pending { .. }) => Lookup::Pending,
            None => Lookup::Missing,
        }
    }

    pub fn is_pending(&self, id: RootId) -> bool {
        matches!(self.entries.get(&id), Some(FetchState::Pending { .. }))
    }

    pub fn cached(&self, id: RootId) -> Option<&Arc<GodotObject>> {
        match self.entries.get(&id) {
            Some(FetchState::Resolved(object)) => Some(object),
            _ => None,
        }
    }

    /// Marks `id` as in flight and returns the generation its timer must
    /// carry. An already pending fetch keeps its waiters and generation.
    pub fn start(&mut self, id: RootId) -> u64 {
        if let Some(FetchState::Pending { generation, .. }) = self.entries.get(&id) {
            return *generation;
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.entries.insert(
            id,
            FetchState::Pending {
                generation,
                waiters: Vec::new(),
            },
        );
        generation
    }

    /// Queues `waiter` behind the pending fetch for `id`. Hands the waiter
    /// back when nothing is pending.
    pub fn wait(&mut self, id: RootId, waiter: FetchWaiter) -> Result<(), FetchWaiter> {
        match self.entries.get_mut(&id) {
            Some(FetchState::Pending { waiters, .. }) => {
                waiters.push(waiter);
                Ok(())
            }
            _ => Err(waiter),
        }
    }

    /// Settles the fetch for `id` and caches the result. Returns `false` when
    /// nobody asked for it, e.g. a late reply after a timeout; the object is
    /// then dropped.
    pub fn resolve(&mut self, id: RootId, object: GodotObject) -> bool {
        let object = Arc::new(object);
        match self.entries.remove(&id) {
            Some(FetchState::Pending { waiters, .. }) => {
                for waiter in waiters {
                    let _ = waiter.send(Ok(object.clone()));
                }
                self.entries.insert(id, FetchState::Resolved(object));
                true
            }
            Some(FetchState::Resolved(_)) => {
                self.entries.insert(id, FetchState::Resolved(object));
                true
            }
            None => false,
        }
    }

    /// Fires the timeout armed for `generation`. A no-op if that fetch already
    /// settled or was replaced.
    pub fn expire(&mut self, id: RootId, generation: u64) -> bool {
        let current = matches!(
            self.entries.get(&id),
            Some(FetchState::Pending { generation: g, .. }) if *g == generation
        );
        if !current {
            return false;
        }
        if let Some(FetchState::Pending { waiters, .. }) = self.entries.remove(&id) {
            for waiter in waiters {
                let _ = waiter.send(Err(DebugError::ResolutionTimeout(id)));
            }
        }
        true
    }

    /// Drops a cached result so the next request goes back to the engine.
    /// In-flight fetches are left alone.
    pub fn invalidate(&mut self, id: RootId) -> bool {
        if matches!(self.entries.get(&id), Some(FetchState::Resolved(_))) {
            self.entries.remove(&id);
            return true;
        }
        false
    }

    /// Forgets every cached result. Used when the game resumes.
    pub fn clear_resolved(&mut self) {
        self.entries
            .retain(|_, state| matches!(state, FetchState::Pending { .. }));
    }

    /// Fails the in-flight fetch for `id`, if any.
    pub fn reject(&mut self, id: RootId, error: impl Fn() -> DebugError) -> bool {
        if !self.is_pending(id) {
            return false;
        }
        if let Some(FetchState::Pending { waiters, .. }) = self.entries.remove(&id) {
            for waiter in waiters {
                let _ = waiter.send(Err(error()));
            }
        }
        true
    }

    pub fn pending_ids(&self) -> Vec<RootId> {
        self.entries
            .iter()
            .filter(|(_, state)| matches!(state, FetchState::Pending { .. }))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Fails every in-flight fetch and forgets the cache.
    pub fn reject_all(&mut self, mut error: impl FnMut(RootId) -> DebugError) {
        for (id, state) in self.entries.drain() {
            if let FetchState::Pending { waiters, .. } = state {
                for waiter in waiters {
                    let _ = waiter.send(Err(error(id)));
                }
            }
        }
    }

    /// Ids of cached objects whose properties satisfy `pred`.
    pub fn resolved_ids_where(
        &self,
        mut pred: impl FnMut(RootId, &GodotObject) -> bool,
    ) -> Vec<RootId> {
        self.entries
            .iter()
            .filter_map(|(id, state)| match state {
                FetchState::Resolved(object) if pred(*id, object) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use godot_wire::{ScopeKind, Variant};

    fn id(raw: u64) -> RootId {
        RootId::Object(raw)
    }

    fn object(raw: u64) -> GodotObject {
        GodotObject::new(id(raw), "Node", vec![("name".into(), Variant::from("Player"))])
    }

    #[test]
    fn resolve_settles_every_waiter_once() {
        let mut table = FetchTable::new();
        table.start(id(5));
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.wait(id(5), tx1).unwrap();
        table.wait(id(5), tx2).unwrap();

        assert!(table.resolve(id(5), object(5)));
        assert_eq!(rx1.try_recv().unwrap().unwrap().class_name, "Node");
        assert_eq!(rx2.try_recv().unwrap().unwrap().id, id(5));
        assert!(matches!(table.lookup(id(5)), Lookup::Resolved(_)));
    }

    #[test]
    fn start_keeps_the_in_flight_generation() {
        let mut table = FetchTable::new();
        let first = table.start(id(1));
        assert_eq!(table.start(id(1)), first);
        assert_ne!(table.start(id(2)), first);
    }

    #[test]
    fn late_reply_after_timeout_is_dropped() {
        let mut table = FetchTable::new();
        let generation = table.start(id(9));
        let (tx, mut rx) = oneshot::channel();
        table.wait(id(9), tx).unwrap();

        assert!(table.expire(id(9), generation));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(DebugError::ResolutionTimeout(RootId::Object(9)))
        ));
        assert!(!table.resolve(id(9), object(9)));
        assert!(matches!(table.lookup(id(9)), Lookup::Missing));
    }

    #[test]
    fn stale_timer_does_not_reject_a_newer_fetch() {
        let mut table = FetchTable::new();
        let old = table.start(id(3));
        assert!(table.resolve(id(3), object(3)));
        assert!(table.invalidate(id(3)));
        let new = table.start(id(3));
        assert_ne!(old, new);

        assert!(!table.expire(id(3), old));
        assert!(table.is_pending(id(3)));
        assert!(table.expire(id(3), new));
    }

    #[test]
    fn invalidate_leaves_pending_fetches() {
        let mut table = FetchTable::new();
        table.start(id(4));
        assert!(!table.invalidate(id(4)));
        assert!(table.is_pending(id(4)));
    }

    #[test]
    fn wait_without_a_fetch_returns_the_waiter() {
        let mut table = FetchTable::new();
        let (tx, _rx) = oneshot::channel();
        assert!(table.wait(id(11), tx).is_err());
    }

    #[test]
    fn reject_all_fails_pending_and_clears_cache() {
        let mut table = FetchTable::new();
        table.start(id(1));
        let (tx, mut rx) = oneshot::channel();
        table.wait(id(1), tx).unwrap();
        table.start(id(2));
        table.resolve(id(2), object(2));

        table.reject_all(|_| DebugError::SessionClosed);
        assert!(matches!(rx.try_recv().unwrap(), Err(DebugError::SessionClosed)));
        assert!(matches!(table.lookup(id(2)), Lookup::Missing));
    }

    #[test]
    fn reject_only_touches_pending_fetches() {
        let locals = RootId::scope(0, ScopeKind::Locals);
        let mut table = FetchTable::new();
        table.start(locals);
        let (tx, mut rx) = oneshot::channel();
        table.wait(locals, tx).unwrap();
        table.start(id(8));
        table.resolve(id(8), object(8));

        assert_eq!(table.pending_ids(), vec![locals]);
        assert!(table.reject(locals, || DebugError::FetchRejected {
            id: locals,
            reason: "resumed".into(),
        }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(DebugError::FetchRejected { id, .. }) if id == locals
        ));
        assert!(!table.reject(id(8), || DebugError::SessionClosed));
        assert!(table.cached(id(8)).is_some());
    }

    #[test]
    fn refcounted_ids_keep_their_top_bit() {
        let refcounted = (1u64 << 63) | 42;
        let mut table = FetchTable::new();
        table.start(id(refcounted));
        assert!(!table.is_pending(id(42)));
        assert!(table.resolve(id(refcounted), object(refcounted)));
        assert_eq!(table.cached(id(refcounted)).unwrap().id, id(refcounted));
    }

    #[test]
    fn clear_resolved_keeps_in_flight_fetches() {
        let mut table = FetchTable::new();
        table.start(id(1));
        table.start(id(2));
        table.resolve(id(2), object(2));
        table.clear_resolved();
        assert!(table.is_pending(id(1)));
        assert!(table.cached(id(2)).is_none());
    }
}

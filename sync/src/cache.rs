//! Keyed view cache and the per-key snapshot chain.
//!
//! Every cached view carries the mutations still in flight against it, in
//! sequence order. Each in-flight mutation remembers the view it was applied
//! on top of (its snapshot), so:
//! - a failure restores exactly that snapshot and invalidates every later
//!   mutation, whose speculation was built on what was just undone
//! - a success of the oldest mutation hands the fresh server view to the next
//!   live mutation as its new snapshot, or replaces the view outright
//! - a key marked dirty is re-fetched once nothing is in flight on it
//!
//! The lock is never held across a call to the api. Each key carries a
//! generation bumped on every write to its view or snapshots; a fetch only
//! lands if the generation it started under is still current, otherwise the
//! key is marked dirty and re-fetched.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use roster_core::{RosterApi, RosterError};
use tokio::sync::Mutex;

use crate::errors::SyncError;
use crate::view::SyncedView;

struct Pending<V> {
    snapshot: V,
    invalidated: bool,
}

struct Tracked<V> {
    view: V,
    pending: BTreeMap<u64, Pending<V>>,
    dirty: bool,
    generation: u64,
}

impl<V> Tracked<V> {
    fn new(view: V) -> Self {
        Self {
            view,
            pending: BTreeMap::new(),
            dirty: false,
            generation: 0,
        }
    }

    /// Install an authoritative view fetched under `seen`. Returns false,
    /// leaving the key dirty, when something wrote the key in the meantime.
    fn accept(&mut self, seen: Option<u64>, fresh: V) -> bool {
        if !self.pending.is_empty() || seen != Some(self.generation) {
            self.dirty = true;
            return false;
        }
        self.view = fresh;
        self.dirty = false;
        self.generation += 1;
        true
    }
}

struct CacheState<V: SyncedView> {
    views: BTreeMap<V::Key, Tracked<V>>,
    next_seq: u64,
}

/// How a dispatched request ended.
pub(crate) enum Outcome<T> {
    Responded(roster_core::Result<T>),
    Panicked(String),
}

/// Errors after which the server may hold a state the snapshot does not.
fn server_may_have_applied(err: &RosterError) -> bool {
    matches!(
        err,
        RosterError::PartialFailure { .. } | RosterError::Transport { .. }
    )
}

pub(crate) struct ViewCache<V: SyncedView> {
    state: Mutex<CacheState<V>>,
}

impl<V: SyncedView> ViewCache<V> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                views: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub(crate) async fn get(&self, key: &V::Key) -> Option<V> {
        let state = self.state.lock().await;
        state.views.get(key).map(|tracked| tracked.view.clone())
    }

    pub(crate) async fn in_flight(&self, key: &V::Key) -> usize {
        let state = self.state.lock().await;
        state.views.get(key).map_or(0, |tracked| tracked.pending.len())
    }

    async fn generation(&self, key: &V::Key) -> Option<u64> {
        let state = self.state.lock().await;
        state.views.get(key).map(|tracked| tracked.generation)
    }

    /// Fetch the authoritative view. It replaces the cached one unless
    /// mutations are in flight, in which case the key is re-fetched once they
    /// settle and the current (speculative) view is returned.
    pub(crate) async fn load(&self, api: &dyn RosterApi, key: &V::Key) -> roster_core::Result<V> {
        let seen = self.generation(key).await;
        let fresh = V::fetch(api, key).await?;
        {
            let mut state = self.state.lock().await;
            match state.views.entry(key.clone()) {
                Entry::Vacant(slot) => return Ok(slot.insert(Tracked::new(fresh)).view.clone()),
                Entry::Occupied(mut slot) => {
                    let tracked = slot.get_mut();
                    if tracked.accept(seen, fresh) {
                        return Ok(tracked.view.clone());
                    }
                }
            }
        }

        // Superseded while fetching: settle the key before answering.
        self.refetch_if_settled(api, key).await;
        self.get(key).await.ok_or_else(|| {
            RosterError::integrity(format!("{} view {key:?} vanished from the cache", V::FAMILY))
        })
    }

    /// Snapshot the current view, apply the speculation and register the
    /// mutation. A key not cached yet is loaded first.
    ///
    /// Nothing awaits between the speculation and the caller spawning the
    /// dispatch, so a dropped caller cannot leave an orphaned speculation.
    pub(crate) async fn begin<S>(
        &self,
        api: &dyn RosterApi,
        key: &V::Key,
        speculate: S,
    ) -> roster_core::Result<u64>
    where
        S: FnOnce(&mut V),
    {
        let cached = self.state.lock().await.views.contains_key(key);
        let fresh = if cached {
            None
        } else {
            Some(V::fetch(api, key).await?)
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let tracked = match (state.views.entry(key.clone()), fresh) {
            (Entry::Occupied(slot), _) => slot.into_mut(),
            (Entry::Vacant(slot), Some(view)) => slot.insert(Tracked::new(view)),
            (Entry::Vacant(_), None) => {
                return Err(RosterError::integrity(format!(
                    "{} view {key:?} vanished from the cache",
                    V::FAMILY
                )));
            }
        };

        let seq = state.next_seq;
        state.next_seq += 1;
        let snapshot = tracked.view.clone();
        speculate(&mut tracked.view);
        tracked.generation += 1;
        tracked.pending.insert(
            seq,
            Pending {
                snapshot,
                invalidated: false,
            },
        );
        tracing::trace!(family = V::FAMILY, key = ?key, seq, "Speculative apply");
        Ok(seq)
    }

    /// Settle mutation `seq` with the server's outcome.
    pub(crate) async fn complete<T>(
        &self,
        api: &dyn RosterApi,
        key: &V::Key,
        seq: u64,
        outcome: Outcome<T>,
    ) -> Result<T, SyncError> {
        let mut guard = self.state.lock().await;
        let Some(tracked) = guard.views.get_mut(key) else {
            return Err(SyncError::TaskFailed(format!(
                "{} view {key:?} vanished from the cache",
                V::FAMILY
            )));
        };
        let Some(pending) = tracked.pending.remove(&seq) else {
            return Err(SyncError::TaskFailed(format!(
                "mutation {seq} on {} view {key:?} completed twice",
                V::FAMILY
            )));
        };

        let mut reconcile = false;
        let result = match outcome {
            Outcome::Responded(Ok(_)) if pending.invalidated => {
                tracked.dirty = true;
                Err(SyncError::Invalidated {
                    server_applied: true,
                })
            }
            Outcome::Responded(Ok(value)) => {
                if tracked.pending.range(..seq).next().is_some() {
                    // An older mutation may still roll back; re-fetch after it settles.
                    tracked.dirty = true;
                } else {
                    reconcile = true;
                }
                Ok(value)
            }
            Outcome::Responded(Err(err)) => {
                let uncertain = server_may_have_applied(&err);
                if uncertain {
                    tracked.dirty = true;
                }
                if pending.invalidated {
                    Err(SyncError::Invalidated {
                        server_applied: matches!(err, RosterError::PartialFailure { .. }),
                    })
                } else {
                    rollback(tracked, key, seq, pending.snapshot, err.category().as_str());
                    Err(SyncError::Rejected(err))
                }
            }
            Outcome::Panicked(message) => {
                tracked.dirty = true;
                if pending.invalidated {
                    Err(SyncError::Invalidated {
                        server_applied: false,
                    })
                } else {
                    rollback(tracked, key, seq, pending.snapshot, "TASK_FAILED");
                    Err(SyncError::TaskFailed(message))
                }
            }
        };
        let seen = tracked.generation;
        drop(guard);

        if reconcile {
            self.reconcile(api, key, seq, seen).await;
        }
        self.refetch_if_settled(api, key).await;
        result
    }

    /// Oldest mutation succeeded: bring in the server's view.
    async fn reconcile(&self, api: &dyn RosterApi, key: &V::Key, seq: u64, seen: u64) {
        let fetched = V::fetch(api, key).await;
        let mut state = self.state.lock().await;
        let Some(tracked) = state.views.get_mut(key) else {
            return;
        };
        match fetched {
            Ok(_) if tracked.generation != seen => {
                tracked.dirty = true;
                tracing::debug!(
                    family = V::FAMILY,
                    key = ?key,
                    seq,
                    "Reconcile fetch superseded; view marked dirty"
                );
            }
            Ok(fresh) => {
                tracked.generation += 1;
                let next_live = tracked
                    .pending
                    .range_mut(seq..)
                    .map(|(_, pending)| pending)
                    .find(|pending| !pending.invalidated);
                match next_live {
                    Some(next) => next.snapshot = fresh,
                    None => tracked.view = fresh,
                }
                tracing::debug!(family = V::FAMILY, key = ?key, seq, "Reconciled with server view");
            }
            Err(err) => {
                tracked.dirty = true;
                tracing::warn!(
                    family = V::FAMILY,
                    key = ?key,
                    seq,
                    error = %err,
                    "Reconcile fetch failed; view marked dirty"
                );
            }
        }
    }

    /// Re-fetch a dirty key once nothing is in flight on it. A fetch that
    /// loses a race with another write is retried; a key that gains a
    /// mutation meanwhile is left to that mutation's completion.
    async fn refetch_if_settled(&self, api: &dyn RosterApi, key: &V::Key) {
        loop {
            let seen = {
                let state = self.state.lock().await;
                match state.views.get(key) {
                    Some(tracked) if tracked.dirty && tracked.pending.is_empty() => {
                        tracked.generation
                    }
                    _ => return,
                }
            };

            match V::fetch(api, key).await {
                Ok(fresh) => {
                    let mut state = self.state.lock().await;
                    let Some(tracked) = state.views.get_mut(key) else {
                        return;
                    };
                    if tracked.accept(Some(seen), fresh) {
                        tracing::debug!(family = V::FAMILY, key = ?key, "Re-fetched dirty view");
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        family = V::FAMILY,
                        key = ?key,
                        error = %err,
                        "Re-fetch of dirty view failed"
                    );
                    return;
                }
            }
        }
    }
}

fn rollback<V: SyncedView>(
    tracked: &mut Tracked<V>,
    key: &V::Key,
    seq: u64,
    snapshot: V,
    cause: &str,
) {
    tracked.view = snapshot;
    tracked.generation += 1;
    let mut invalidated = 0usize;
    for (_, later) in tracked.pending.range_mut(seq..) {
        later.invalidated = true;
        invalidated += 1;
    }
    tracing::warn!(
        family = V::FAMILY,
        key = ?key,
        seq,
        cause,
        invalidated,
        "Rolled back speculative view"
    );
}

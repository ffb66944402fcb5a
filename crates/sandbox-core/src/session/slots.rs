//! Capacity slots held by active sessions.
//!
//! A slot owns one semaphore permit, so the number of live slots can never
//! exceed the configured concurrency cap. It also carries the session's
//! execution lock and cancellation flag.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

pub(crate) struct ActiveSlot {
    _permit: OwnedSemaphorePermit,
    pub(crate) exec_lock: Arc<tokio::sync::Mutex<()>>,
    pub(crate) cancel: watch::Sender<bool>,
}

impl ActiveSlot {
    /// Signal cancellation to an in-flight execution, if any.
    pub(crate) fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

/// What an execution needs from its session's slot.
pub(crate) struct ExecAccess {
    pub(crate) exec_lock: Arc<tokio::sync::Mutex<()>>,
    pub(crate) cancel: watch::Receiver<bool>,
}

pub(crate) struct SlotTable {
    semaphore: Arc<Semaphore>,
    limit: usize,
    slots: Mutex<HashMap<String, ActiveSlot>>,
}

impl SlotTable {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, ActiveSlot>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Reserve capacity without blocking.
    pub(crate) fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    /// Attach a reserved permit to a session.
    pub(crate) fn insert(
        &self,
        session_id: &str,
        permit: OwnedSemaphorePermit,
    ) {
        self.adopt(session_id, permit);
    }

    /// Access for `session_id`, attaching `permit` first if it holds no slot.
    /// A permit that turns out to be surplus is dropped.
    pub(crate) fn adopt(
        &self,
        session_id: &str,
        permit: OwnedSemaphorePermit,
    ) -> ExecAccess {
        let mut table = self.table();
        let slot = table.entry(session_id.to_string()).or_insert_with(|| {
            let (cancel, _) = watch::channel(false);
            ActiveSlot {
                _permit: permit,
                exec_lock: Arc::new(tokio::sync::Mutex::new(())),
                cancel,
            }
        });
        ExecAccess {
            exec_lock: Arc::clone(&slot.exec_lock),
            cancel: slot.cancel.subscribe(),
        }
    }

    /// Detach a session's slot. Dropping the returned slot frees capacity.
    pub(crate) fn release(&self, session_id: &str) -> Option<ActiveSlot> {
        self.table().remove(session_id)
    }

    pub(crate) fn access(&self, session_id: &str) -> Option<ExecAccess> {
        self.table().get(session_id).map(|slot| ExecAccess {
            exec_lock: Arc::clone(&slot.exec_lock),
            cancel: slot.cancel.subscribe(),
        })
    }

    pub(crate) fn contains(&self, session_id: &str) -> bool {
        self.table().contains_key(session_id)
    }

    /// Sessions currently holding a slot.
    pub(crate) fn session_ids(&self) -> Vec<String> {
        self.table().keys().cloned().collect()
    }

    /// `1` while an execution holds the session's lock, else `0`.
    pub(crate) fn in_flight(&self, session_id: &str) -> usize {
        self.table()
            .get(session_id)
            .map(|slot| usize::from(slot.exec_lock.try_lock().is_err()))
            .unwrap_or(0)
    }

    pub(crate) fn occupied(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permits_bound_slots() {
        let table = SlotTable::new(2);

        let a = table.try_reserve().unwrap();
        let b = table.try_reserve().unwrap();
        assert!(table.try_reserve().is_none());

        table.insert("a", a);
        table.insert("b", b);
        assert_eq!(table.occupied(), 2);
        let mut held = table.session_ids();
        held.sort();
        assert_eq!(held, ["a", "b"]);

        drop(table.release("b"));
        assert_eq!(table.occupied(), 1);
        assert!(table.try_reserve().is_some());
    }

    #[tokio::test]
    async fn test_in_flight_tracks_exec_lock() {
        let table = SlotTable::new(1);
        let permit = table.try_reserve().unwrap();
        table.insert("s", permit);

        assert_eq!(table.in_flight("s"), 0);
        let access = table.access("s").unwrap();
        let guard = access.exec_lock.lock().await;
        assert_eq!(table.in_flight("s"), 1);
        drop(guard);
        assert_eq!(table.in_flight("s"), 0);
        assert_eq!(table.in_flight("missing"), 0);
    }

    #[test]
    fn test_cancel_reaches_subscribers() {
        let table = SlotTable::new(1);
        let permit = table.try_reserve().unwrap();
        table.insert("s", permit);

        let access = table.access("s").unwrap();
        let slot = table.release("s").unwrap();
        slot.cancel();
        drop(slot);
        assert!(*access.cancel.borrow());
    }
}

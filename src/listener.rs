//! Observer registry
//!
//! [`Listeners`] keeps a list of callbacks that can be added and removed at
//! any time. `emit` calls a snapshot of the list, so a callback may remove
//! itself (or register another one) while it is being invoked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Handle returned by [`Listeners::add`], used to unregister the callback
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A set of callbacks receiving `&A`
pub struct Listeners<A: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<A>)>>,
}

impl<A: ?Sized> Default for Listeners<A> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<A: ?Sized> std::fmt::Debug for Listeners<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

impl<A: ?Sized> Listeners<A> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<(ListenerId, Callback<A>)>> {
        // a panicking callback never runs under the lock, so poisoning is harmless
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a callback
    pub fn add(&self, f: impl Fn(&A) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries().push((id, Arc::new(f)));
        id
    }

    /// Unregister a callback. Returns false if it was already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Call every registered callback with `arg`
    pub fn emit(&self, arg: &A) {
        let snapshot: Vec<Callback<A>> = self.entries().iter().map(|(_, f)| f.clone()).collect();
        for f in snapshot {
            f(arg);
        }
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True when no callback is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Copy-on-write observer registry.
//!
//! Writers replace the whole list under a short write lock; readers clone
//! the current `Arc` and iterate it without holding any lock. A fan-out
//! therefore works on a stable snapshot even while observers are added or
//! removed from other threads.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Identifier returned by `add`, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// One registered observer.
pub struct Registered<T: ?Sized> {
    pub id: ObserverId,
    pub observer: Arc<T>,
}

impl<T: ?Sized> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            observer: Arc::clone(&self.observer),
        }
    }
}

/// Immutable view of the registry at one point in time.
pub type Snapshot<T> = Arc<Vec<Registered<T>>>;

pub struct ObserverRegistry<T: ?Sized> {
    entries: RwLock<Snapshot<T>>,
    next_id: AtomicU64,
}

impl<T: ?Sized> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append an observer. Iteration follows insertion order.
    pub fn add(&self, observer: Arc<T>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.update(|entries| entries.push(Registered { id, observer }));
        id
    }

    /// Remove by id. Returns false if the id is not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        self.update(|entries| remove_first(entries, |entry| entry.id == id))
    }

    /// Remove the first registration of this exact observer instance.
    pub fn remove_instance(&self, observer: &Arc<T>) -> bool {
        let target = Arc::as_ptr(observer).cast::<()>();
        self.update(|entries| {
            remove_first(entries, |entry| Arc::as_ptr(&entry.observer).cast::<()>() == target)
        })
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.update(|entries| entries.clear());
    }

    // Observer code never runs under this lock, so a poisoned lock still
    // guards a consistent list.
    fn update<R>(&self, mutate: impl FnOnce(&mut Vec<Registered<T>>) -> R) -> R {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<Registered<T>> = guard.iter().cloned().collect();
        let result = mutate(&mut next);
        *guard = Arc::new(next);
        result
    }
}

impl<T: ?Sized> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_first<T: ?Sized>(
    entries: &mut Vec<Registered<T>>,
    matches: impl Fn(&Registered<T>) -> bool,
) -> bool {
    match entries.iter().position(|entry| matches(entry)) {
        Some(index) => {
            entries.remove(index);
            true
        }
        None => false,
    }
}

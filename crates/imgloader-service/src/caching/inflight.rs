use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::types::ResourceKey;
use crate::utils::futures::CallOnDrop;

/// A load that any number of callers can await.
pub type SharedLoad<T> = Shared<BoxFuture<'static, T>>;

struct InFlightEntry<T> {
    id: u64,
    load: SharedLoad<T>,
}

type InFlightMap<T> = HashMap<ResourceKey, InFlightEntry<T>>;

/// The outcome of [`InFlightTracker::join_or_register`].
pub enum Acquired<T> {
    /// Another caller already started loading the key.
    Joined(SharedLoad<T>),
    /// The caller's load was registered and must be driven by the caller.
    Registered(SharedLoad<T>),
}

/// Tracks the loads currently running per key.
///
/// At most one load is registered per key at any time. The entry is removed when the
/// load settles, through a guard handed to the load future.
pub struct InFlightTracker<T> {
    loads: Arc<Mutex<InFlightMap<T>>>,
    next_id: AtomicU64,
}

impl<T> std::fmt::Debug for InFlightTracker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loads = self.loads.try_lock().map(|l| l.len()).unwrap_or_default();
        f.debug_struct("InFlightTracker")
            .field("running loads", &loads)
            .finish()
    }
}

impl<T> Default for InFlightTracker<T> {
    fn default() -> Self {
        Self {
            loads: Default::default(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> InFlightTracker<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_in_flight(&self, key: &ResourceKey) -> bool {
        self.loads.lock().unwrap().contains_key(key)
    }

    /// Returns the load currently running for `key`.
    pub fn get(&self, key: &ResourceKey) -> Option<SharedLoad<T>> {
        self.loads
            .lock()
            .unwrap()
            .get(key)
            .map(|entry| entry.load.clone())
    }

    /// Number of keys with a running load.
    pub fn len(&self) -> usize {
        self.loads.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `load` for `key`, replacing any previous entry.
    ///
    /// The entry stays registered until [`clear`](Self::clear) is called.
    pub fn register(&self, key: ResourceKey, load: BoxFuture<'static, T>) -> SharedLoad<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let load = load.shared();
        let entry = InFlightEntry {
            id,
            load: load.clone(),
        };
        self.loads.lock().unwrap().insert(key, entry);
        load
    }

    pub fn clear(&self, key: &ResourceKey) {
        self.loads.lock().unwrap().remove(key);
    }

    /// Joins the load running for `key`, or registers a new one.
    ///
    /// `start` receives a guard that removes the registration when dropped. It must move
    /// the guard into the returned future and must not poll anything, as it runs while
    /// the registry is locked.
    pub fn join_or_register<F>(&self, key: &ResourceKey, start: F) -> Acquired<T>
    where
        F: FnOnce(CallOnDrop) -> BoxFuture<'static, T>,
    {
        let mut loads = self.loads.lock().unwrap();
        if let Some(entry) = loads.get(key) {
            return Acquired::Joined(entry.load.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let done_token = {
            let key = key.clone();
            let loads = Arc::clone(&self.loads);
            CallOnDrop::new(move || {
                let mut loads = loads.lock().unwrap();
                // a later load may have taken over the key after an explicit `clear`
                if loads.get(&key).is_some_and(|entry| entry.id == id) {
                    loads.remove(&key);
                }
            })
        };

        let load = start(done_token).shared();
        loads.insert(
            key.clone(),
            InFlightEntry {
                id,
                load: load.clone(),
            },
        );
        Acquired::Registered(load)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_join_or_register_dedups() {
        let tracker = InFlightTracker::<u32>::new();
        let key = ResourceKey::from("img://a");

        let first = tracker.join_or_register(&key, |guard| {
            async move {
                let _guard = guard;
                tokio::time::sleep(Duration::from_millis(100)).await;
                7
            }
            .boxed()
        });
        let Acquired::Registered(first) = first else {
            panic!("first caller must register");
        };
        assert!(tracker.has_in_flight(&key));

        let second = tracker.join_or_register(&key, |_| async { 0 }.boxed());
        let Acquired::Joined(second) = second else {
            panic!("second caller must join");
        };

        let (a, b) = futures::join!(first, second);
        assert_eq!((a, b), (7, 7));
        assert!(!tracker.has_in_flight(&key));
    }

    #[tokio::test]
    async fn test_register_and_clear() {
        let tracker = InFlightTracker::<u32>::new();
        let key = ResourceKey::from("img://a");

        let load = tracker.register(key.clone(), async { 3 }.boxed());
        assert!(tracker.has_in_flight(&key));
        assert!(tracker.get(&key).is_some());

        tracker.clear(&key);
        assert!(tracker.is_empty());
        assert_eq!(load.await, 3);
    }

    #[tokio::test]
    async fn test_stale_guard_keeps_newer_registration() {
        let tracker = InFlightTracker::<u32>::new();
        let key = ResourceKey::from("img://a");

        let old = tracker.join_or_register(&key, |guard| {
            async move {
                drop(guard);
                1
            }
            .boxed()
        });
        tracker.clear(&key);
        let newer = tracker.register(key.clone(), async { 2 }.boxed());

        let Acquired::Registered(old) = old else {
            panic!("first caller must register");
        };
        assert_eq!(old.await, 1);
        assert!(tracker.has_in_flight(&key));
        assert_eq!(newer.await, 2);
    }
}

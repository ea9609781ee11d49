//! Hints to warm up downstream caches for images that are likely needed soon.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use super::ImageLoader;
use crate::types::ResourceKey;
use crate::utils::futures::{CallOnDrop, CancelOnDrop};

/// How urgently a preload hint should be fetched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadPriority {
    /// Fetched when one of the few low priority slots is free.
    #[default]
    Low,
    /// Fetched right away.
    High,
}

impl PreloadPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            PreloadPriority::Low => "low",
            PreloadPriority::High => "high",
        }
    }
}

struct Hint {
    id: u64,
    _task: CancelOnDrop<()>,
}

/// The hints currently alive.
pub(super) struct PreloadHints {
    active: Arc<Mutex<HashMap<ResourceKey, Hint>>>,
    low_priority: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl fmt::Debug for PreloadHints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadHints")
            .field("active", &self.active.lock().unwrap().len())
            .finish()
    }
}

impl PreloadHints {
    pub fn new(low_priority_concurrency: usize) -> Self {
        Self {
            active: Default::default(),
            low_priority: Arc::new(Semaphore::new(low_priority_concurrency.max(1))),
            next_id: AtomicU64::new(1),
        }
    }
}

impl ImageLoader {
    /// Hints that `keys` will be displayed soon.
    ///
    /// Every hint fetches its image in the background and discards the result, which only
    /// warms up caches below the loader, like the HTTP connection pool or a CDN edge. Hints
    /// never populate the image cache. A hint gives up after the configured preload window.
    /// Keys that already have an active hint are skipped.
    ///
    /// Returns the number of hints that were issued.
    pub fn preload_images<I>(&self, keys: I, priority: PreloadPriority) -> usize
    where
        I: IntoIterator,
        I::Item: Into<ResourceKey>,
    {
        let hints = &self.inner.preload;
        let window = self.inner.config.preload_window;
        let mut issued = 0;

        let mut active = hints.active.lock().unwrap();
        for key in keys {
            let key = key.into();
            if key.is_empty() || active.contains_key(&key) {
                continue;
            }

            let id = hints.next_id.fetch_add(1, Ordering::Relaxed);
            let done_token = {
                let key = key.clone();
                let active = Arc::clone(&hints.active);
                CallOnDrop::new(move || {
                    let mut active = active.lock().unwrap();
                    if active.get(&key).is_some_and(|hint| hint.id == id) {
                        let hint = active.remove(&key);
                        drop(active);
                        drop(hint);
                    }
                })
            };

            let fetcher = Arc::clone(&self.inner.fetcher);
            let semaphore = match priority {
                PreloadPriority::Low => Some(Arc::clone(&hints.low_priority)),
                PreloadPriority::High => None,
            };
            let task_key = key.clone();
            let task = tokio::spawn(async move {
                let _done_token = done_token;
                let hint = async {
                    let _permit = match semaphore {
                        Some(semaphore) => Some(semaphore.acquire_owned().await),
                        None => None,
                    };
                    fetcher.fetch(&task_key).await
                };
                match tokio::time::timeout(window, hint).await {
                    Ok(Ok(_)) => tracing::trace!(key = %task_key, "Preloaded image"),
                    Ok(Err(error)) => {
                        tracing::trace!(key = %task_key, %error, "Preloading image failed")
                    }
                    Err(_) => tracing::trace!(key = %task_key, "Preload hint expired"),
                }
            });

            metric!(counter("preload.hint") += 1, "priority" => priority.as_str());
            active.insert(
                key,
                Hint {
                    id,
                    _task: CancelOnDrop::new(task),
                },
            );
            issued += 1;
        }

        issued
    }

    /// Number of preload hints that are still running.
    pub fn active_hints(&self) -> usize {
        self.inner.preload.active.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::loader::LoadOptions;
    use crate::test::{self, ScriptedFetcher, Step};

    #[tokio::test(start_paused = true)]
    async fn test_hints_do_not_populate_cache() {
        let fetcher = ScriptedFetcher::new();
        let loader = test::loader(&fetcher);

        let issued = loader.preload_images(["img://a", "img://b"], PreloadPriority::High);
        assert_eq!(issued, 2);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(fetcher.calls("img://a"), 1);
        assert_eq!(loader.active_hints(), 0);
        assert!(loader.cache().get(&"img://a".into()).is_none());

        loader.load("img://a".into(), LoadOptions::default()).await;
        assert_eq!(fetcher.calls("img://a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_hints_are_skipped() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script("img://a", [Step::ok_after(Duration::from_secs(1))]);
        let loader = test::loader(&fetcher);

        assert_eq!(loader.preload_images(["img://a"], PreloadPriority::High), 1);
        assert_eq!(
            loader.preload_images(["img://a", "img://a", ""], PreloadPriority::High),
            0
        );
        assert_eq!(loader.active_hints(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(loader.active_hints(), 0);
        assert_eq!(fetcher.calls("img://a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hints_expire_after_window() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script("img://slow", [Step::ok_after(Duration::from_secs(60))]);
        let loader = test::loader_with(&fetcher, |config| {
            config.preload_window = Duration::from_secs(10);
        });

        loader.preload_images(["img://slow"], PreloadPriority::High);
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(loader.active_hints(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(loader.active_hints(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_priority_is_throttled() {
        let fetcher = ScriptedFetcher::new();
        for key in ["img://1", "img://2", "img://3"] {
            fetcher.script(key, [Step::ok_after(Duration::from_secs(1))]);
        }
        let loader = test::loader_with(&fetcher, |config| {
            config.preload_low_priority_concurrency = 2;
        });

        loader.preload_images(["img://1", "img://2", "img://3"], PreloadPriority::Low);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fetcher.dispatched().len(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetcher.dispatched().len(), 3);
    }
}

//! Loading images with caching, deduplication, retries and fallbacks.
//!
//! The [`ImageLoader`] is the entry point for everything that needs an image. It is a cheap
//! handle that can be cloned freely, all clones share the same cache and bookkeeping.
//!
//! A call to [`ImageLoader::load`] goes through these stages:
//!
//! 1. A live entry in the [`ResourceCache`] is returned immediately.
//! 2. If another caller is already loading the same key, its load is joined.
//! 3. Otherwise a new load is started. It runs as a spawned task, so it completes even if
//!    every caller stops waiting for it. Each attempt is bounded by a timeout, and failed
//!    attempts are retried with a linearly growing delay.
//! 4. On success the image is cached. After the last failed attempt, the key is marked as
//!    failed and the load resolves to the fallback image or the generated placeholder.
//!
//! Loads therefore never fail from the caller's perspective.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::FutureExt;
use tokio::sync::broadcast;

use crate::caching::{Acquired, InFlightTracker, Janitor, JanitorHandle, ResourceCache};
use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::events::{EventSink, LoaderEvent, ProgressCallback, ProgressReporter};
use crate::fetch::Fetcher;
use crate::types::{
    LoadStatus, LoaderStats, LoadingState, Placeholder, ResolvedResource, ResourceKey,
};
use crate::utils::futures::measure;

mod attempt;
mod batch;
mod preload;

use attempt::load_once;
pub use batch::{
    BatchError, BatchItem, BatchOptions, BatchOutcome, BatchProgressCallback, BatchTargetOptions,
    ImageCompleteCallback, TargetConfig,
};
pub use preload::PreloadPriority;

use preload::PreloadHints;

/// Capacity of the event channel before slow subscribers start lagging.
const EVENT_CAPACITY: usize = 256;

/// Progress reported at the start of every attempt, multiplied by the attempt number.
const ATTEMPT_PROGRESS_BAND: u32 = 20;

/// Per call overrides of the [`LoaderConfig`].
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// Image shown if all attempts fail, instead of the configured fallback.
    pub fallback: Option<ResourceKey>,
    /// Time budget of each attempt.
    pub timeout: Option<Duration>,
    /// Total number of attempts, including the first one.
    pub max_attempts: Option<u32>,
    /// Base delay between attempts, multiplied by the number of the failed attempt.
    pub retry_delay: Option<Duration>,
    /// Whether to consult and populate the cache.
    pub enable_cache: bool,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            fallback: None,
            timeout: None,
            max_attempts: None,
            retry_delay: None,
            enable_cache: true,
            on_progress: None,
        }
    }
}

impl LoadOptions {
    pub fn with_fallback(mut self, fallback: impl Into<ResourceKey>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&crate::events::ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(ProgressCallback::new(f));
        self
    }
}

/// The detailed result of a load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadOutcome {
    /// What to display. Always present, even if loading failed.
    pub resource: ResolvedResource,
    /// Why the requested image could not be loaded.
    pub error: Option<LoadError>,
    /// Attempts made by this load. Zero for cache hits.
    pub attempts: u32,
}

impl LoadOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn load_status(outcome: &LoadOutcome) -> &'static str {
    if outcome.is_success() { "ok" } else { "fallback" }
}

struct LoaderInner {
    config: LoaderConfig,
    fetcher: Arc<dyn Fetcher>,
    cache: ResourceCache,
    in_flight: InFlightTracker<LoadOutcome>,
    failed: Mutex<HashSet<ResourceKey>>,
    states: Arc<Mutex<HashMap<ResourceKey, LoadingState>>>,
    events: EventSink,
    placeholder: Placeholder,
    preload: PreloadHints,
}

/// Loads images, see the [module docs](self).
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("cache", &self.inner.cache)
            .field("in_flight", &self.inner.in_flight)
            .finish()
    }
}

impl ImageLoader {
    pub fn new(config: LoaderConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let cache = ResourceCache::new(config.cache_expiry, config.in_memory_capacity);
        let placeholder = Placeholder::generate(&config.placeholder);
        let preload = PreloadHints::new(config.preload_low_priority_concurrency);

        Self {
            inner: Arc::new(LoaderInner {
                config,
                fetcher,
                cache,
                in_flight: InFlightTracker::new(),
                failed: Default::default(),
                states: Default::default(),
                events: EventSink::new(EVENT_CAPACITY),
                placeholder,
                preload,
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.inner.cache
    }

    /// The placeholder shown when no fallback is configured.
    pub fn placeholder(&self) -> &Placeholder {
        &self.inner.placeholder
    }

    /// Subscribes to progress events of all loads.
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventSink {
        &self.inner.events
    }

    /// Loads `key`, resolving to the image, the fallback, or the placeholder.
    pub async fn load(&self, key: ResourceKey, options: LoadOptions) -> ResolvedResource {
        self.load_detailed(key, options).await.resource
    }

    /// Loads `key`, additionally reporting why loading failed.
    pub async fn load_detailed(&self, key: ResourceKey, options: LoadOptions) -> LoadOutcome {
        metric!(counter("loader.access") += 1);

        if options.enable_cache {
            if let Some(entry) = self.inner.cache.get(&key) {
                tracing::trace!(%key, "Cache hit");
                metric!(counter("loader.cache.hit") += 1);
                return LoadOutcome {
                    resource: entry.value,
                    error: None,
                    attempts: 0,
                };
            }
            tracing::trace!(%key, "Cache miss");
        }

        let acquired = self.inner.in_flight.join_or_register(&key, |done_token| {
            let inner = Arc::clone(&self.inner);
            let key = key.clone();
            let load = async move {
                let outcome = inner.load_with_retries(key, options).await;
                drop(done_token);
                outcome
            };
            measure("image_load", load_status, load).boxed()
        });

        match acquired {
            Acquired::Joined(load) => {
                tracing::trace!(%key, "Joining running load");
                metric!(counter("loader.inflight.joined") += 1);
                load.await
            }
            Acquired::Registered(load) => {
                // the load outlives callers that stop waiting for it
                tokio::spawn(load.clone());
                load.await
            }
        }
    }

    /// Forgets what is known about `key` and loads it again.
    pub async fn reload(&self, key: ResourceKey, options: LoadOptions) -> ResolvedResource {
        self.inner.cache.invalidate(&key);
        self.inner.failed.lock().unwrap().remove(&key);
        self.load(key, options).await
    }

    /// Whether the most recent load of `key` exhausted its attempts.
    pub fn is_failed(&self, key: &ResourceKey) -> bool {
        self.inner.failed.lock().unwrap().contains(key)
    }

    /// Whether a load of `key` is currently running.
    pub fn is_loading(&self, key: &ResourceKey) -> bool {
        self.inner.in_flight.has_in_flight(key)
    }

    /// The state of the most recent load of `key`.
    pub fn loading_state(&self, key: &ResourceKey) -> Option<LoadingState> {
        self.inner.states.lock().unwrap().get(key).cloned()
    }

    pub fn get_stats(&self) -> LoaderStats {
        let completed = self
            .inner
            .states
            .lock()
            .unwrap()
            .values()
            .filter(|state| state.status == LoadStatus::Completed)
            .count();

        LoaderStats {
            cached: self.inner.cache.len(),
            loading: self.inner.in_flight.len(),
            completed,
            failed: self.inner.failed.lock().unwrap().len(),
        }
    }

    /// Clears the cache, the failed keys and all loading states.
    ///
    /// Running loads are not affected and still cache their result when they complete.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
        self.inner.failed.lock().unwrap().clear();
        self.inner.states.lock().unwrap().clear();
        tracing::debug!("Cleared image cache");
    }

    /// Starts evicting expired cache entries in the background.
    pub fn start_janitor(&self) -> JanitorHandle {
        let janitor = Janitor::new(self.inner.cache.clone(), self.inner.config.janitor_interval);
        janitor.spawn()
    }
}

impl LoaderInner {
    async fn load_with_retries(&self, key: ResourceKey, options: LoadOptions) -> LoadOutcome {
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.config.retry_attempts)
            .max(1);
        let retry_delay = options.retry_delay.unwrap_or(self.config.retry_delay);

        self.states
            .lock()
            .unwrap()
            .insert(key.clone(), LoadingState::pending());
        let mut progress = self.progress_reporter(&key, options.on_progress.clone());

        if key.is_empty() {
            let error = LoadError::InvalidKey("empty key".into());
            return self.exhausted(key, error, 0, options.fallback, &mut progress);
        }

        let mut attempt = 1;
        loop {
            self.update_state(&key, |state| {
                state.status = LoadStatus::Loading;
                state.attempts = attempt;
            });
            let band = ATTEMPT_PROGRESS_BAND.saturating_mul(attempt).min(90) as u8;
            progress.report(band, LoadStatus::Loading);

            let result = load_once(&*self.fetcher, &key, timeout, &mut progress).await;
            let status = match &result {
                Ok(_) => "ok",
                Err(err) => err.metric_tag(),
            };
            metric!(counter("loader.attempt") += 1, "status" => status);

            match result {
                Ok(image) => {
                    let resource = ResolvedResource::Loaded(image);
                    if options.enable_cache {
                        self.cache.put(key.clone(), resource.clone());
                    }
                    self.failed.lock().unwrap().remove(&key);
                    self.update_state(&key, |state| {
                        state.status = LoadStatus::Completed;
                        state.error = None;
                    });
                    progress.report(100, LoadStatus::Completed);

                    return LoadOutcome {
                        resource,
                        error: None,
                        attempts: attempt,
                    };
                }
                Err(error) if attempt >= max_attempts => {
                    return self.exhausted(key, error, attempt, options.fallback, &mut progress);
                }
                Err(error) => {
                    let delay = retry_delay.saturating_mul(attempt);
                    tracing::debug!(
                        %key,
                        attempt,
                        error = %error,
                        "Image load failed, retrying in {:?}",
                        delay
                    );
                    self.update_state(&key, |state| state.error = Some(error.to_string()));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn exhausted(
        &self,
        key: ResourceKey,
        last: LoadError,
        attempts: u32,
        fallback: Option<ResourceKey>,
        progress: &mut ProgressReporter,
    ) -> LoadOutcome {
        tracing::warn!(%key, attempts, error = %last, "Image could not be loaded");
        metric!(counter("loader.exhausted") += 1);

        self.failed.lock().unwrap().insert(key.clone());
        self.update_state(&key, |state| {
            state.status = LoadStatus::Failed;
            state.error = Some(last.to_string());
        });
        progress.report(progress.progress(), LoadStatus::Failed);

        let configured = self.config.fallback_url.as_deref().map(ResourceKey::from);
        let resource = match fallback.or(configured) {
            Some(fallback) => ResolvedResource::Substitute(fallback),
            None => ResolvedResource::Placeholder(self.placeholder.clone()),
        };

        LoadOutcome {
            resource,
            error: Some(LoadError::AllAttemptsExhausted {
                attempts,
                last: Box::new(last),
            }),
            attempts,
        }
    }

    fn update_state(&self, key: &ResourceKey, f: impl FnOnce(&mut LoadingState)) {
        if let Some(state) = self.states.lock().unwrap().get_mut(key) {
            f(state);
        }
    }

    /// Creates a reporter that also records progress in the key's loading state.
    fn progress_reporter(
        &self,
        key: &ResourceKey,
        on_progress: Option<ProgressCallback>,
    ) -> ProgressReporter {
        let states = Arc::clone(&self.states);
        let callback = ProgressCallback::new(move |event| {
            if let Some(state) = states.lock().unwrap().get_mut(&event.key) {
                state.progress = event.progress;
            }
            if let Some(on_progress) = &on_progress {
                on_progress.call(event);
            }
        });
        ProgressReporter::new(key.clone(), self.events.clone(), Some(callback))
    }
}

//! Loading many images in windows of bounded concurrency.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ImageLoader, LoadOptions, LoadOutcome};
use crate::binding::DisplayTarget;
use crate::error::LoadError;
use crate::events::{BatchProgress, LoaderEvent};
use crate::types::{ResolvedResource, ResourceKey};

/// Options for [`ImageLoader::load_all`].
#[derive(Clone, Debug, Default)]
pub struct BatchOptions {
    /// Number of loads running at the same time. Defaults to the configured concurrency.
    pub concurrency: Option<usize>,
    /// Stop dispatching windows after the first window containing a failed load.
    pub fail_fast: bool,
    /// Options for every load in the batch.
    pub load: LoadOptions,
}

/// A key that was loaded successfully.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchItem {
    pub key: ResourceKey,
    pub resource: ResolvedResource,
}

/// A key that could not be loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchError {
    pub key: ResourceKey,
    pub error: LoadError,
    /// The fallback that was resolved instead, if the key was loaded at all.
    pub fallback: Option<ResolvedResource>,
}

/// The settled results of a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub results: Vec<BatchItem>,
    pub errors: Vec<BatchError>,
    /// Keys that were never dispatched because of `fail_fast`.
    pub skipped: Vec<ResourceKey>,
}

impl BatchOutcome {
    fn record(&mut self, key: ResourceKey, outcome: LoadOutcome) -> bool {
        match outcome.error {
            None => {
                self.results.push(BatchItem {
                    key,
                    resource: outcome.resource,
                });
                true
            }
            Some(error) => {
                self.errors.push(BatchError {
                    key,
                    error,
                    fallback: Some(outcome.resource),
                });
                false
            }
        }
    }
}

/// An image paired with the slot that displays it.
#[derive(Clone)]
pub struct TargetConfig {
    pub key: ResourceKey,
    pub target: Arc<dyn DisplayTarget>,
}

impl TargetConfig {
    pub fn new(key: impl Into<ResourceKey>, target: Arc<dyn DisplayTarget>) -> Self {
        Self {
            key: key.into(),
            target,
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

pub type BatchProgressCallback = Arc<dyn Fn(&BatchProgress) + Send + Sync>;
pub type ImageCompleteCallback = Arc<dyn Fn(&ResourceKey, &LoadOutcome) + Send + Sync>;

/// Options for [`ImageLoader::load_all_to_targets`].
#[derive(Clone, Default)]
pub struct BatchTargetOptions {
    pub concurrency: Option<usize>,
    pub load: LoadOptions,
    /// Called after every bound image with the aggregate progress.
    pub on_batch_progress: Option<BatchProgressCallback>,
    /// Called after every bound image with its outcome.
    pub on_image_complete: Option<ImageCompleteCallback>,
}

impl fmt::Debug for BatchTargetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchTargetOptions")
            .field("concurrency", &self.concurrency)
            .field("load", &self.load)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    fn batch_concurrency(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.config().concurrency).max(1)
    }

    /// Loads all `keys`, `concurrency` at a time.
    ///
    /// Keys are dispatched in windows. All loads of a window run concurrently, and the next
    /// window starts once every load of the current one has settled. Loads that resolved to
    /// a fallback are reported as errors.
    pub async fn load_all<I>(&self, keys: I, options: BatchOptions) -> BatchOutcome
    where
        I: IntoIterator,
        I::Item: Into<ResourceKey>,
    {
        let keys: Vec<ResourceKey> = keys.into_iter().map(Into::into).collect();
        let concurrency = self.batch_concurrency(options.concurrency);
        tracing::debug!(keys = keys.len(), concurrency, "Loading batch");

        let mut outcome = BatchOutcome::default();
        let mut windows = keys.chunks(concurrency);

        while let Some(window) = windows.next() {
            metric!(counter("loader.batch.window") += 1);

            let loads = window
                .iter()
                .map(|key| self.load_detailed(key.clone(), options.load.clone()));
            let settled = futures::future::join_all(loads).await;

            let mut window_failed = false;
            for (key, result) in window.iter().zip(settled) {
                window_failed |= !outcome.record(key.clone(), result);
            }

            if window_failed && options.fail_fast {
                outcome.skipped = windows.flatten().cloned().collect();
                tracing::debug!(
                    skipped = outcome.skipped.len(),
                    "Stopping batch after failed window"
                );
                break;
            }
        }

        outcome
    }

    /// Loads every image into its paired display slot, `concurrency` at a time.
    ///
    /// After each image is bound, the aggregate progress is passed to
    /// `on_batch_progress` and broadcast as [`LoaderEvent::BatchProgress`].
    pub async fn load_all_to_targets(
        &self,
        configs: Vec<TargetConfig>,
        options: BatchTargetOptions,
    ) -> BatchOutcome {
        let total = configs.len();
        let concurrency = self.batch_concurrency(options.concurrency);
        let completed = AtomicUsize::new(0);

        let report = |key: &ResourceKey, result: Option<&LoadOutcome>| {
            if let (Some(on_image_complete), Some(result)) = (&options.on_image_complete, result) {
                on_image_complete(key, result);
            }
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            let progress = BatchProgress::new(done, total);
            if let Some(on_batch_progress) = &options.on_batch_progress {
                on_batch_progress(&progress);
            }
            self.events().emit(LoaderEvent::BatchProgress(progress));
        };
        let report = &report;
        let load = &options.load;

        let mut outcome = BatchOutcome::default();
        for window in configs.chunks(concurrency) {
            metric!(counter("loader.batch.window") += 1);

            let binds = window.iter().map(|config| async move {
                let result = self
                    .bind_detailed(&*config.target, config.key.clone(), load.clone())
                    .await;
                report(&config.key, result.as_ref().ok());
                result
            });
            let settled = futures::future::join_all(binds).await;

            for (config, result) in window.iter().zip(settled) {
                match result {
                    Ok(loaded) => {
                        outcome.record(config.key.clone(), loaded);
                    }
                    Err(error) => outcome.errors.push(BatchError {
                        key: config.key.clone(),
                        error: LoadError::InvalidKey(error.to_string()),
                        fallback: None,
                    }),
                }
            }
        }

        outcome
    }
}

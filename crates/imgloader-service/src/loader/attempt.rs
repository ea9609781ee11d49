//! A single attempt at loading an image.

use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::LoadError;
use crate::events::ProgressReporter;
use crate::fetch::Fetcher;
use crate::types::{LoadStatus, LoadedImage, ResourceKey};

/// Progress reported as soon as an attempt starts.
pub const WARM_UP_PROGRESS: u8 = 30;
/// Synthetic progress never goes beyond this until the image arrives.
pub const MAX_SYNTHETIC_PROGRESS: u8 = 90;
/// How often synthetic progress advances while waiting for the fetch.
pub const TICK_INTERVAL: Duration = Duration::from_millis(200);
/// Upper bound of a single synthetic progress step.
const MAX_TICK_STEP: u8 = 15;

/// Fetches `key` once, within `timeout`.
///
/// While the fetch is outstanding, randomized progress ticks are reported so that
/// observers see something moving. Transfer sizes are unknown upfront, so the ticks are
/// a heuristic and never exceed [`MAX_SYNTHETIC_PROGRESS`]. Whatever the outcome, the
/// ticker stops together with the fetch.
///
/// This performs no retries and no caching.
pub(crate) async fn load_once(
    fetcher: &dyn Fetcher,
    key: &ResourceKey,
    timeout: Duration,
    progress: &mut ProgressReporter,
) -> Result<LoadedImage, LoadError> {
    progress.report(WARM_UP_PROGRESS, LoadStatus::Loading);

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let fetch = fetcher.fetch(key);
    tokio::pin!(fetch);

    let mut ticker = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let fetched = loop {
        tokio::select! {
            biased;

            result = &mut fetch => break result?,
            _ = &mut deadline => {
                tracing::debug!(%key, ?timeout, "Image load timed out");
                return Err(LoadError::Timeout(timeout));
            }
            _ = ticker.tick() => {
                let current = progress.progress();
                if current < MAX_SYNTHETIC_PROGRESS {
                    let step = rand::thread_rng().gen_range(0..=MAX_TICK_STEP);
                    let next = current.saturating_add(step).min(MAX_SYNTHETIC_PROGRESS);
                    progress.report(next, LoadStatus::Loading);
                }
            }
        }
    };

    Ok(LoadedImage {
        key: key.clone(),
        data: fetched.data,
        content_type: fetched.content_type,
    })
}

//! Protection of display slots against stale results.
//!
//! When a slot receives requests in quick succession, like a preview pane following the
//! selection in a list, the responses may arrive in any order. Each request stamps the slot
//! with a fresh token, and a result is only applied if its token is still the slot's latest
//! when it arrives. Everything else is discarded.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::DisplayTarget;
use crate::error::BindError;
use crate::loader::{ImageLoader, LoadOptions};
use crate::types::{ResolvedResource, ResourceKey};

/// Source of request tokens, shared by all slots.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn next_token() -> u64 {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

/// A [`DisplayTarget`] that remembers its most recent request.
pub struct RaceProtectedSlot {
    target: Arc<dyn DisplayTarget>,
    latest_token: AtomicU64,
}

impl fmt::Debug for RaceProtectedSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaceProtectedSlot")
            .field("latest_token", &self.latest_token)
            .finish_non_exhaustive()
    }
}

impl RaceProtectedSlot {
    pub fn new(target: Arc<dyn DisplayTarget>) -> Self {
        Self {
            target,
            latest_token: AtomicU64::new(0),
        }
    }

    pub fn target(&self) -> &dyn DisplayTarget {
        &*self.target
    }

    /// The token of the most recent request, `0` if there was none.
    pub fn latest_token(&self) -> u64 {
        self.latest_token.load(Ordering::SeqCst)
    }

    fn issue_token(&self) -> u64 {
        let token = next_token();
        self.latest_token.store(token, Ordering::SeqCst);
        token
    }

    fn is_latest(&self, token: u64) -> bool {
        self.latest_token() == token
    }
}

/// Options for [`ImageLoader::bind_with_race_protection`].
#[derive(Clone, Debug)]
pub struct RaceOptions {
    /// Time to wait for a newer request before loading. Defaults to the configured debounce.
    pub debounce: Option<Duration>,
    /// Give up after the debounce if a newer request arrived in the meantime.
    pub cancel_previous: bool,
    /// Shown while the image is loading.
    pub loading_placeholder: Option<ResourceKey>,
    pub load: LoadOptions,
}

impl Default for RaceOptions {
    fn default() -> Self {
        Self {
            debounce: None,
            cancel_previous: true,
            loading_placeholder: None,
            load: LoadOptions::default(),
        }
    }
}

/// What happened to a race protected request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaceOutcome {
    /// The result was shown. `loaded` is false if it was a fallback.
    Applied { loaded: bool },
    /// A newer request for the slot superseded this one.
    Cancelled,
}

/// Marks the slot as failed if a request that is still the latest is dropped midway.
struct LatestRequestGuard<'a> {
    slot: &'a RaceProtectedSlot,
    token: u64,
    armed: bool,
}

impl Drop for LatestRequestGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.slot.is_latest(self.token) {
            self.slot.target.set_error_state();
        }
    }
}

impl ImageLoader {
    /// Loads `key` into `slot`, unless a newer request for the slot supersedes it.
    ///
    /// The request waits for the debounce interval first, and with `cancel_previous` gives
    /// up right away if a newer request arrived in the meantime. Once loaded, the result is
    /// only shown if no newer request was made, regardless of the order in which loads
    /// complete.
    pub async fn bind_with_race_protection(
        &self,
        key: ResourceKey,
        slot: &RaceProtectedSlot,
        options: RaceOptions,
    ) -> Result<RaceOutcome, BindError> {
        if key.is_empty() {
            return Err(BindError::MissingKey);
        }

        let token = slot.issue_token();
        let target = slot.target();
        if let Some(placeholder) = options.loading_placeholder {
            target.assign_resource(&ResolvedResource::Substitute(placeholder));
        }
        target.set_loading_state();

        let mut guard = LatestRequestGuard {
            slot,
            token,
            armed: true,
        };

        let debounce = options.debounce.unwrap_or(self.config().debounce);
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }

        if options.cancel_previous && !slot.is_latest(token) {
            tracing::trace!(%key, token, "Superseded during debounce");
            metric!(counter("race.cancelled") += 1, "stage" => "debounce");
            guard.armed = false;
            return Ok(RaceOutcome::Cancelled);
        }

        let outcome = self.load_detailed(key.clone(), options.load).await;

        guard.armed = false;
        if !slot.is_latest(token) {
            tracing::trace!(%key, token, "Discarding stale result");
            metric!(counter("race.cancelled") += 1, "stage" => "load");
            return Ok(RaceOutcome::Cancelled);
        }

        target.assign_resource(&outcome.resource);
        let loaded = outcome.is_success();
        if loaded {
            target.set_loaded_state();
        } else {
            target.set_error_state();
        }

        Ok(RaceOutcome::Applied { loaded })
    }
}

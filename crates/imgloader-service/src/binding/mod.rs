//! Binding loaded images to display slots.
//!
//! A [`DisplayTarget`] is anything that can show an image and reflect its loading state,
//! such as a thumbnail in a list or the preview pane of an editor. Binding a key to a
//! target marks the target as loading, loads the key and then assigns the result. Every
//! binding ends with exactly one terminal marker, loaded or error.

use crate::error::BindError;
use crate::loader::{ImageLoader, LoadOptions, LoadOutcome};
use crate::types::{ResolvedResource, ResourceKey};

mod race;

pub use race::{RaceOptions, RaceOutcome, RaceProtectedSlot};

/// A slot that displays an image.
///
/// Implementations usually forward these calls to a UI toolkit. They are called from async
/// tasks and must not block.
pub trait DisplayTarget: Send + Sync {
    /// Marks the slot as waiting for an image.
    fn set_loading_state(&self);

    /// Marks the slot as showing the requested image.
    fn set_loaded_state(&self);

    /// Marks the slot as showing a fallback.
    fn set_error_state(&self);

    /// Shows `resource` in the slot.
    fn assign_resource(&self, resource: &ResolvedResource);
}

/// Makes sure a target receives a terminal marker.
///
/// If the guard is dropped before [`loaded`](Self::loaded) or [`failed`](Self::failed)
/// was called, the target is marked as failed.
pub(crate) struct TerminalMarker<'a> {
    target: Option<&'a dyn DisplayTarget>,
}

impl<'a> TerminalMarker<'a> {
    pub fn new(target: &'a dyn DisplayTarget) -> Self {
        Self {
            target: Some(target),
        }
    }

    pub fn loaded(mut self) {
        if let Some(target) = self.target.take() {
            target.set_loaded_state();
        }
    }

    pub fn failed(mut self) {
        if let Some(target) = self.target.take() {
            target.set_error_state();
        }
    }
}

impl Drop for TerminalMarker<'_> {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            target.set_error_state();
        }
    }
}

impl ImageLoader {
    /// Loads `key` into `target`.
    ///
    /// Returns whether the requested image is shown, as opposed to a fallback. Only fails if
    /// `key` is empty, in which case the target is not touched.
    pub async fn bind_to_target(
        &self,
        target: &dyn DisplayTarget,
        key: ResourceKey,
        options: LoadOptions,
    ) -> Result<bool, BindError> {
        let outcome = self.bind_detailed(target, key, options).await?;
        Ok(outcome.is_success())
    }

    pub(crate) async fn bind_detailed(
        &self,
        target: &dyn DisplayTarget,
        key: ResourceKey,
        options: LoadOptions,
    ) -> Result<LoadOutcome, BindError> {
        if key.is_empty() {
            return Err(BindError::MissingKey);
        }

        target.set_loading_state();
        let marker = TerminalMarker::new(target);

        let outcome = self.load_detailed(key, options).await;
        target.assign_resource(&outcome.resource);
        if outcome.is_success() {
            marker.loaded();
        } else {
            marker.failed();
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::error::LoadError;
    use crate::test::{self, Marker, RecordingTarget, ScriptedFetcher, Step};

    #[tokio::test(start_paused = true)]
    async fn test_bind_loaded() {
        let fetcher = ScriptedFetcher::new();
        let loader = test::loader(&fetcher);
        let target = RecordingTarget::new();

        let loaded = loader
            .bind_to_target(&*target, "img://a".into(), LoadOptions::default())
            .await;
        assert_eq!(loaded, Ok(true));
        assert_eq!(
            target.markers(),
            [
                Marker::Loading,
                Marker::Assigned("img://a".into()),
                Marker::Loaded
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_fallback() {
        let fetcher = ScriptedFetcher::new();
        fetcher.always("img://a", Step::err(LoadError::NotFound));
        let loader = test::loader(&fetcher);
        let target = RecordingTarget::new();

        let options = LoadOptions::default().with_fallback("img://fallback");
        let loaded = loader
            .bind_to_target(&*target, "img://a".into(), options)
            .await;
        assert_eq!(loaded, Ok(false));
        assert_eq!(target.shown().as_deref(), Some("img://fallback"));
        assert_eq!(target.markers().last(), Some(&Marker::Error));
        assert_eq!(target.terminal_markers(), 1);
    }

    #[tokio::test]
    async fn test_bind_missing_key() {
        let fetcher = ScriptedFetcher::new();
        let loader = test::loader(&fetcher);
        let target = RecordingTarget::new();

        let result = loader
            .bind_to_target(&*target, " ".into(), LoadOptions::default())
            .await;
        assert_eq!(result, Err(BindError::MissingKey));
        assert!(target.markers().is_empty());
        assert!(fetcher.dispatched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_binding_marks_error() {
        let fetcher = ScriptedFetcher::new();
        fetcher.script("img://a", [Step::ok_after(Duration::from_secs(3))]);
        let loader = test::loader(&fetcher);
        let target = RecordingTarget::new();

        let bind = loader.bind_to_target(&*target, "img://a".into(), LoadOptions::default());
        let result = tokio::time::timeout(Duration::from_secs(1), bind).await;
        assert!(result.is_err());
        assert_eq!(target.markers(), [Marker::Loading, Marker::Error]);
    }

    struct PanickingTarget(RecordingTarget);

    impl DisplayTarget for PanickingTarget {
        fn set_loading_state(&self) {
            self.0.set_loading_state()
        }

        fn set_loaded_state(&self) {
            self.0.set_loaded_state()
        }

        fn set_error_state(&self) {
            self.0.set_error_state()
        }

        fn assign_resource(&self, _resource: &ResolvedResource) {
            panic!("slot was removed");
        }
    }

    #[tokio::test]
    async fn test_panicking_target_gets_one_marker() {
        let fetcher = ScriptedFetcher::new();
        let loader = test::loader(&fetcher);
        let target = PanickingTarget(RecordingTarget::default());

        let bind = loader.bind_to_target(&target, "img://a".into(), LoadOptions::default());
        let result = AssertUnwindSafe(bind).catch_unwind().await;
        assert!(result.is_err());
        assert_eq!(target.0.markers(), [Marker::Loading, Marker::Error]);
    }
}

//! Asynchronous image loading for the portfolio dashboard and its live previews.
//!
//! The [`ImageLoader`](loader::ImageLoader) fetches remote images through a
//! [`Fetcher`](fetch::Fetcher), caches them in memory, deduplicates concurrent
//! requests for the same key and retries failed attempts before falling back to a
//! placeholder. The [`binding`] module binds results to display slots and protects slots
//! that receive rapid successive requests from stale results.

#[macro_use]
pub mod metrics;

pub mod binding;
pub mod caching;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod types;
pub mod utils;


pub use binding::{DisplayTarget, RaceOptions, RaceOutcome, RaceProtectedSlot};
pub use error::{BindError, LoadError};
pub use loader::{
    BatchOptions, BatchOutcome, ImageLoader, LoadOptions, LoadOutcome, PreloadPriority,
};
pub use types::{LoadedImage, Placeholder, ResolvedResource, ResourceKey};

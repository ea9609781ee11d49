//! Fetching image bytes from their source.
//!
//! The [`Fetcher`] trait is the seam between the loader and the outside world. The
//! loader treats it as a black box: one call per attempt, returning the image or an
//! error. [`HttpFetcher`] is the production implementation.

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::LoadError;
use crate::types::ResourceKey;

mod http;

pub use self::http::HttpFetcher;

/// Raw bytes of a fetched image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fetched {
    pub data: Bytes,
    pub content_type: Option<String>,
}

impl Fetched {
    pub fn new(data: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.map(str::to_owned),
        }
    }
}

/// Fetches the image identified by a key.
///
/// Implementations perform exactly one fetch per call and must not retry or cache, the
/// [`ImageLoader`](crate::loader::ImageLoader) takes care of both.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch<'a>(&'a self, key: &'a ResourceKey) -> BoxFuture<'a, Result<Fetched, LoadError>>;
}

/// Checks that a declared content type describes an image.
///
/// A missing content type is accepted, many CDNs omit it for cached variants.
pub(crate) fn ensure_image_content_type(content_type: Option<&str>) -> Result<(), LoadError> {
    let Some(content_type) = content_type else {
        return Ok(());
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime.is_empty() || mime.starts_with("image/") || mime == "application/octet-stream" {
        Ok(())
    } else {
        Err(LoadError::Malformed(format!(
            "expected an image, got `{mime}`"
        )))
    }
}

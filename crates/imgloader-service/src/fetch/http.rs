//! Support to fetch images over HTTP, from `data:` URLs and from the local file system.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, StatusCode, header};
use url::Url;

use super::{Fetched, Fetcher, ensure_image_content_type};
use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::types::ResourceKey;

/// The user agent sent with every image request.
pub const USER_AGENT: &str = concat!("imgloader/", env!("CARGO_PKG_VERSION"));

/// Creates a [`reqwest::Client`] for image requests.
///
/// The client-level timeout mirrors the per attempt timeout, so that a hanging transfer is
/// torn down even if the loader's own timeout was lifted.
pub fn create_client(config: &LoaderConfig) -> reqwest::Result<Client> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .hickory_dns(true)
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
}

/// Fetcher for `http(s)://`, `data:` and (optionally) `file://` keys.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    allow_file_urls: bool,
}

impl HttpFetcher {
    pub fn new(config: &LoaderConfig) -> reqwest::Result<Self> {
        Ok(Self {
            client: create_client(config)?,
            allow_file_urls: config.allow_file_urls,
        })
    }

    /// Creates a fetcher using an existing client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            allow_file_urls: false,
        }
    }

    pub fn allow_file_urls(mut self, allow: bool) -> Self {
        self.allow_file_urls = allow;
        self
    }

    async fn fetch_http(&self, url: Url) -> Result<Fetched, LoadError> {
        tracing::trace!("Fetching image from `{}`", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            tracing::debug!("Unexpected status code from `{}`: {}", url, status);
            return Err(match status {
                StatusCode::NOT_FOUND | StatusCode::GONE => LoadError::NotFound,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    LoadError::PermissionDenied(status.to_string())
                }
                _ => LoadError::Download(status.to_string()),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        ensure_image_content_type(content_type.as_deref())?;

        let data = response.bytes().await?;
        if data.is_empty() {
            return Err(LoadError::Malformed("empty response body".into()));
        }

        Ok(Fetched { data, content_type })
    }

    fn fetch_data_url(&self, key: &ResourceKey) -> Result<Fetched, LoadError> {
        let data_url = data_url::DataUrl::process(key.as_str())
            .map_err(|e| LoadError::InvalidKey(format!("{e:?}")))?;
        let mime = data_url.mime_type();
        let content_type = format!("{}/{}", mime.type_, mime.subtype);
        ensure_image_content_type(Some(&content_type))?;

        let (data, _fragment) = data_url
            .decode_to_vec()
            .map_err(|_| LoadError::Malformed("invalid base64 payload".into()))?;

        Ok(Fetched::new(data, Some(&content_type)))
    }

    async fn fetch_file(&self, url: Url) -> Result<Fetched, LoadError> {
        if !self.allow_file_urls {
            return Err(LoadError::InvalidKey("file URLs are not allowed".into()));
        }
        let path = url
            .to_file_path()
            .map_err(|_| LoadError::InvalidKey(format!("not a local path: {url}")))?;
        let data = tokio::fs::read(&path).await?;
        if data.is_empty() {
            return Err(LoadError::Malformed("empty file".into()));
        }
        Ok(Fetched::new(data, None))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, key: &'a ResourceKey) -> BoxFuture<'a, Result<Fetched, LoadError>> {
        async move {
            let url = Url::parse(key.as_str())
                .map_err(|e| LoadError::InvalidKey(format!("{key}: {e}")))?;

            match url.scheme() {
                "http" | "https" => self.fetch_http(url).await,
                "data" => self.fetch_data_url(key),
                "file" => self.fetch_file(url).await,
                scheme => Err(LoadError::InvalidKey(format!(
                    "unsupported scheme `{scheme}`"
                ))),
            }
        }
        .boxed()
    }
}

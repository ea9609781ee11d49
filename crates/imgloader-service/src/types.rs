use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::PlaceholderConfig;

/// Identifies a loadable image, usually by its URL.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ResourceKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An image that was fetched successfully.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedImage {
    pub key: ResourceKey,
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// A generated image shown in place of images that could not be loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placeholder {
    width: u32,
    height: u32,
    svg: Arc<str>,
}

impl Placeholder {
    /// Renders a placeholder SVG with a centered caption.
    pub fn generate(config: &PlaceholderConfig) -> Self {
        let PlaceholderConfig {
            width,
            height,
            text,
            background,
            foreground,
        } = config;
        let font_size = (width.min(height) / 16).max(10);
        let svg = format!(
            concat!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
                r#"<rect width="100%" height="100%" fill="{bg}"/>"#,
                r#"<text x="50%" y="50%" font-family="sans-serif" font-size="{fs}" fill="{fg}" "#,
                r#"text-anchor="middle" dominant-baseline="middle">{text}</text></svg>"#
            ),
            w = width,
            h = height,
            bg = escape_xml(background),
            fg = escape_xml(foreground),
            fs = font_size,
            text = escape_xml(text),
        );
        Self {
            width: *width,
            height: *height,
            svg: svg.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn svg(&self) -> &str {
        &self.svg
    }

    /// A `data:` URL embedding the SVG document.
    pub fn data_url(&self) -> String {
        let mut url = String::with_capacity(self.svg.len() + 32);
        url.push_str("data:image/svg+xml;charset=utf-8,");
        for c in self.svg.chars() {
            match c {
                '%' => url.push_str("%25"),
                '#' => url.push_str("%23"),
                '<' => url.push_str("%3C"),
                '>' => url.push_str("%3E"),
                '"' => url.push('\''),
                '\n' | '\r' => {}
                c => url.push(c),
            }
        }
        url
    }
}

fn escape_xml(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(input);
    }
    let mut escaped = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// The result of loading a key.
///
/// Loads never fail from the caller's point of view: a key that could not be loaded
/// resolves to the configured fallback, or to a generated placeholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedResource {
    /// The requested image.
    Loaded(LoadedImage),
    /// A substitute image the display target resolves on its own, such as the
    /// configured fallback URL or a loading placeholder.
    Substitute(ResourceKey),
    /// The generated default placeholder.
    Placeholder(Placeholder),
}

impl ResolvedResource {
    /// Whether this is the image that was asked for.
    pub fn is_loaded(&self) -> bool {
        matches!(self, ResolvedResource::Loaded(_))
    }

    /// The URL a display target should show.
    pub fn url(&self) -> Cow<'_, str> {
        match self {
            ResolvedResource::Loaded(image) => Cow::Borrowed(image.key.as_str()),
            ResolvedResource::Substitute(key) => Cow::Borrowed(key.as_str()),
            ResolvedResource::Placeholder(placeholder) => Cow::Owned(placeholder.data_url()),
        }
    }

    pub fn as_loaded(&self) -> Option<&LoadedImage> {
        match self {
            ResolvedResource::Loaded(image) => Some(image),
            _ => None,
        }
    }
}

/// Where a key is in its loading lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Pending,
    Loading,
    Completed,
    Failed,
}

impl LoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadStatus::Pending => "pending",
            LoadStatus::Loading => "loading",
            LoadStatus::Completed => "completed",
            LoadStatus::Failed => "failed",
        }
    }
}

/// Progress of the most recent load of a key.
///
/// Only used for feedback, never for deciding what to load.
#[derive(Clone, Debug)]
pub struct LoadingState {
    pub status: LoadStatus,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub started_at: Instant,
    /// Number of attempts made so far.
    pub attempts: u32,
    pub error: Option<String>,
}

impl LoadingState {
    pub(crate) fn pending() -> Self {
        Self {
            status: LoadStatus::Pending,
            progress: 0,
            started_at: Instant::now(),
            attempts: 0,
            error: None,
        }
    }
}

/// Counters exported for dashboards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    /// Live entries in the image cache.
    pub cached: usize,
    /// Keys with a load in progress.
    pub loading: usize,
    /// Keys whose most recent load succeeded.
    pub completed: usize,
    /// Keys whose most recent load exhausted its attempts.
    pub failed: usize,
}

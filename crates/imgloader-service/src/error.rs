use std::time::Duration;

use thiserror::Error;

/// An error that happens when loading an image from a remote location.
///
/// These errors are local to a single attempt and are absorbed by the
/// [`ImageLoader`](crate::loader::ImageLoader), which retries or falls back. They only
/// surface in diagnostics, batch outcomes and loading states.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The attempt did not finish within its time budget.
    #[error("load timed out after {0:?}")]
    Timeout(Duration),
    /// The image could not be fetched, like connection loss, DNS resolution,
    /// or a 5xx server response.
    #[error("download failed: {0}")]
    Download(String),
    /// The image was not found at the remote location.
    #[error("not found")]
    NotFound,
    /// The remote location refused access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The response was received, but is not a usable image.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The key is not a URL the loader can fetch.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Every attempt for the key failed.
    #[error("all {attempts} attempts failed, last error: {last}")]
    AllAttemptsExhausted {
        attempts: u32,
        last: Box<LoadError>,
    },
}

impl LoadError {
    /// Creates a [`Download`](Self::Download) error from the innermost source of `error`.
    pub fn download_error(mut error: &dyn std::error::Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        Self::Download(error_string)
    }

    /// A short, stable name used to tag metrics and loading states.
    pub fn metric_tag(&self) -> &'static str {
        match self {
            LoadError::Timeout(_) => "timeout",
            LoadError::Download(_) => "downloaderror",
            LoadError::NotFound => "notfound",
            LoadError::PermissionDenied(_) => "permissiondenied",
            LoadError::Malformed(_) => "malformed",
            LoadError::InvalidKey(_) => "invalidkey",
            LoadError::AllAttemptsExhausted { .. } => "exhausted",
        }
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(error: reqwest::Error) -> Self {
        Self::download_error(&error)
    }
}

impl From<std::io::Error> for LoadError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(error.to_string()),
            _ => Self::Download(error.to_string()),
        }
    }
}

/// Misuse of the binding layer.
///
/// These are surfaced immediately and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// The request did not name an image.
    #[error("no image key given")]
    MissingKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(LoadError::from(err), LoadError::NotFound);

        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(LoadError::from(err), LoadError::Download("reset".into()));
    }

    #[test]
    fn test_exhausted_display() {
        let err = LoadError::AllAttemptsExhausted {
            attempts: 2,
            last: Box::new(LoadError::Timeout(std::time::Duration::from_secs(1))),
        };
        assert_eq!(
            err.to_string(),
            "all 2 attempts failed, last error: load timed out after 1s"
        );
        assert_eq!(err.metric_tag(), "exhausted");
    }
}

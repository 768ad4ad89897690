use std::fmt;

/// Failure reported by a single transport attempt.
///
/// `status` is `None` when the request never produced an HTTP response
/// (connect failure, timeout, DNS).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    /// Failure carrying an HTTP status code.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Failure without any HTTP response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "http {status}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|status| status.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum CdnError {
    /// Invalid policy or target, raised before any attempt is made.
    #[error("configuration error: {0}")]
    Config(String),
    /// Non-retryable failure; no further attempts were made.
    #[error("fatal error on attempt {attempts}: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    /// Every attempt failed with a retryable error.
    #[error("CDN unavailable: all {attempts} attempts exhausted, last error: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },
    /// Cancelled while waiting between attempts.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
    /// Upload failed for the given destination path.
    #[error("CDN upload failed for {path}: {source}")]
    Upload {
        path: String,
        #[source]
        source: TransportError,
    },
    /// Single-shot request failed; surfaced as-is.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CdnError {
    /// Number of attempts made before this error, when the error came out of
    /// the retry loop.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Fatal { attempts, .. }
            | Self::RetryExhausted { attempts, .. }
            | Self::Cancelled { attempts } => Some(*attempts),
            Self::Config(_) => Some(0),
            Self::Upload { .. } | Self::Transport(_) => None,
        }
    }

    /// HTTP status of the underlying transport failure, if any.
    pub fn last_status(&self) -> Option<u16> {
        match self {
            Self::Fatal { source, .. } | Self::Upload { source, .. } => source.status,
            Self::RetryExhausted { last, .. } => last.status,
            Self::Transport(err) => err.status,
            Self::Config(_) | Self::Cancelled { .. } => None,
        }
    }
}

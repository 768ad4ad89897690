use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Response};

use crate::{
    AttemptSink, CdnError, ClientOptions, Result, RetryPredicate, RetryingFetcher,
    TransportError, UploadReceipt,
};

const API_KEY_HEADER: &str = "X-API-Key";

/// Joins the CDN base URL and an asset path.
///
/// Example: `("https://cdn.example.com/", "products/a.jpg")` →
/// `"https://cdn.example.com/products/a.jpg"`
pub fn asset_url(base_url: &str, asset_path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = asset_path.trim();
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[derive(Clone)]
/// HTTP client for a media CDN origin.
///
/// Only [`CdnClient::fetch_asset`] retries; uploads and purges are single
/// attempts.
pub struct CdnClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    options: ClientOptions,
    classifier: Option<RetryPredicate>,
    sink: Option<Arc<dyn AttemptSink>>,
}

impl fmt::Debug for CdnClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdnClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

impl CdnClient {
    /// Creates a client for `base_url` authenticating with `X-API-Key`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            options: ClientOptions::default(),
            classifier: None,
            sink: None,
        }
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `MEDIACDN_BASE_URL` — origin base URL (e.g. `https://cdn.example.com`)
    /// - `MEDIACDN_API_KEY` — value sent as `X-API-Key`
    ///
    /// Returns an error if either variable is missing or empty.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mediacdn_http::CdnClient;
    ///
    /// let cdn = CdnClient::from_env().expect("missing MEDIACDN_* env vars");
    /// ```
    pub fn from_env() -> std::result::Result<Self, String> {
        let base_url = std::env::var("MEDIACDN_BASE_URL")
            .map_err(|_| "missing MEDIACDN_BASE_URL environment variable".to_owned())?;
        let api_key = std::env::var("MEDIACDN_API_KEY")
            .map_err(|_| "missing MEDIACDN_API_KEY environment variable".to_owned())?;
        if base_url.trim().is_empty() {
            return Err("MEDIACDN_BASE_URL is set but empty".to_owned());
        }
        if api_key.trim().is_empty() {
            return Err("MEDIACDN_API_KEY is set but empty".to_owned());
        }
        Ok(Self::new(base_url, api_key))
    }

    /// Applies client options such as timeouts and the fetch retry policy.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    /// Overrides which fetch failures are considered transient.
    pub fn with_classifier(mut self, predicate: RetryPredicate) -> Self {
        self.classifier = Some(predicate);
        self
    }

    /// Attaches a sink receiving one event per fetch attempt.
    pub fn with_sink(mut self, sink: Arc<dyn AttemptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Downloads an asset, retrying transient failures per
    /// [`ClientOptions::retry`].
    pub async fn fetch_asset(&self, asset_path: &str) -> Result<Vec<u8>> {
        let fetcher = self.fetcher()?;
        fetcher
            .fetch(asset_path, |path| {
                let request = self
                    .http
                    .get(asset_url(&self.base_url, path))
                    .header(API_KEY_HEADER, &self.api_key)
                    .header(header::USER_AGENT, &self.options.user_agent)
                    .timeout(Duration::from_millis(self.options.fetch_timeout_ms));
                async move {
                    let response = ensure_success(request.send().await?).await?;
                    let bytes = response.bytes().await?;
                    Ok::<_, TransportError>(bytes.to_vec())
                }
            })
            .await
    }

    /// Uploads `data` to `asset_path`. Not retried; failures are wrapped in
    /// [`CdnError::Upload`].
    pub async fn upload_asset(&self, asset_path: &str, data: Vec<u8>) -> Result<UploadReceipt> {
        let url = asset_url(&self.base_url, asset_path);
        let result: std::result::Result<Response, TransportError> = async {
            let response = self
                .http
                .put(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .timeout(Duration::from_millis(self.options.upload_timeout_ms))
                .body(data)
                .send()
                .await?;
            ensure_success(response).await
        }
        .await;

        match result {
            Ok(response) => {
                let etag = response
                    .headers()
                    .get(header::ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);

                #[cfg(feature = "tracing")]
                tracing::info!(path = asset_path, "uploaded asset");

                Ok(UploadReceipt { url, etag })
            }
            Err(source) => {
                #[cfg(feature = "tracing")]
                tracing::error!(path = asset_path, error = %source, "asset upload failed");

                Err(CdnError::Upload {
                    path: asset_path.to_owned(),
                    source,
                })
            }
        }
    }

    /// Purges the cached copy of `asset_path` at `{base}/cache{path}`. Not
    /// retried; failures are returned as [`CdnError::Transport`].
    pub async fn purge_cache(&self, asset_path: &str) -> Result<()> {
        let url = asset_url(&self.base_url, &format!("/cache{}", leading_slash(asset_path)));
        let result: std::result::Result<Response, TransportError> = async {
            let response = self
                .http
                .delete(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .send()
                .await?;
            ensure_success(response).await
        }
        .await;

        match result {
            Ok(_) => {
                #[cfg(feature = "tracing")]
                tracing::info!(path = asset_path, "cache purged");
                Ok(())
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::error!(path = asset_path, error = %err, "cache purge failed");
                Err(CdnError::Transport(err))
            }
        }
    }

    fn fetcher(&self) -> Result<RetryingFetcher> {
        let mut fetcher = RetryingFetcher::new(self.options.retry)?;
        if let Some(predicate) = &self.classifier {
            fetcher = fetcher.with_predicate(Arc::clone(predicate));
        }
        if let Some(sink) = &self.sink {
            fetcher = fetcher.with_sink(Arc::clone(sink));
        }
        Ok(fetcher)
    }
}

/// Turns a non-2xx response into a [`TransportError`] carrying its status.
async fn ensure_success(response: Response) -> std::result::Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_owned()
    } else {
        body
    };
    Err(TransportError::status(status.as_u16(), message))
}

fn leading_slash(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

//! The HTTP client used to fetch issuer metadata and keysets

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// The time allowed for a single metadata or keyset request, unless overridden
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A failed JSON fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be completed or the response status was not a
    /// success
    #[error("request failed")]
    Transport(#[source] reqwest::Error),

    /// The response body was not the expected JSON document
    #[error("response body could not be decoded")]
    Decode(#[source] serde_json::Error),
}

/// A shared HTTP client that bounds every request with a timeout
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    /// Wraps an existing client
    ///
    /// The `timeout` is applied to each request in addition to any timeout
    /// configured on the client itself.
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Constructs a client with the crate's user agent
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("jwtverifier/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::new(client, timeout))
    }

    /// The per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetches `url` and decodes the response body as JSON
    #[tracing::instrument(skip(self), fields(http.status_code = tracing::field::Empty))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "request failed");
                FetchError::Transport(err)
            })?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if let Err(err) = response.error_for_status_ref() {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "unexpected response status");
            return Err(FetchError::Transport(err));
        }

        let body = response.bytes().await.map_err(FetchError::Transport)?;

        serde_json::from_slice(&body).map_err(|err| {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "unexpected response body");
            FetchError::Decode(err)
        })
    }
}

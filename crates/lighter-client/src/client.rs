//! HTTP nonce source backed by the Lighter REST API.
//!
//! `GET {base_url}/api/v1/nextNonce?account_index=..&api_key_index=..`
//! answers `{"code": 200, "nonce": 1234}` on success and
//! `{"code": <error code>, "message": ".."}` otherwise.

use std::time::Duration;

use lighter_nonce::{AccountIndex, ApiKeyIndex, BoxFuture, Nonce, RemoteNonceSource, SourceError};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// Mainnet REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://mainnet.zklighter.elliot.ai";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Success code carried in the response body.
const CODE_OK: i64 = 200;

const NEXT_NONCE_PATH: &str = "api/v1/nextNonce";

#[derive(Debug, Deserialize)]
struct NextNonceResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    nonce: Option<u128>,
}

/// Fetches starting nonces from the venue over HTTP.
///
/// Cheap to share: one instance can serve several coordinators.
pub struct HttpNonceSource {
    /// HTTP client.
    client: Client,
    /// Full URL of the nextNonce endpoint.
    endpoint: Url,
}

impl HttpNonceSource {
    /// Create a new nonce source.
    ///
    /// # Arguments
    /// * `base_url` - REST base URL (e.g., "https://mainnet.zklighter.elliot.ai")
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: next_nonce_endpoint(base_url)?,
        })
    }

    /// Endpoint queried by [`RemoteNonceSource::next_nonce`].
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn fetch(
        &self,
        account_index: AccountIndex,
        api_key_index: ApiKeyIndex,
    ) -> Result<Nonce, SourceError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("account_index", account_index.value().to_string()),
                ("api_key_index", api_key_index.value().to_string()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Transport(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            // Venue error bodies still carry a code and message.
            return Err(match parse_next_nonce(&body) {
                Err(venue @ SourceError::Venue { .. }) => venue,
                _ => SourceError::Venue {
                    code: i64::from(status.as_u16()),
                    message: body,
                },
            });
        }

        let nonce = parse_next_nonce(&body)?;
        debug!(
            %account_index,
            %api_key_index,
            %nonce,
            "Fetched next nonce from venue"
        );
        Ok(nonce)
    }
}

impl RemoteNonceSource for HttpNonceSource {
    fn next_nonce(
        &self,
        account_index: AccountIndex,
        api_key_index: ApiKeyIndex,
    ) -> BoxFuture<'_, Result<Nonce, SourceError>> {
        Box::pin(self.fetch(account_index, api_key_index))
    }
}

/// Interpret a nextNonce response body.
///
/// # Errors
/// - `SourceError::Decode` if the body is not the expected JSON shape
/// - `SourceError::Venue` if the body carries a non-200 code
pub fn parse_next_nonce(body: &str) -> Result<Nonce, SourceError> {
    let parsed: NextNonceResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::Decode(format!("Invalid nextNonce response: {e}")))?;

    if parsed.code != CODE_OK {
        return Err(SourceError::Venue {
            code: parsed.code,
            message: parsed.message.unwrap_or_default(),
        });
    }

    parsed
        .nonce
        .map(Nonce::new)
        .ok_or_else(|| SourceError::Decode("nextNonce response missing nonce".to_string()))
}

fn next_nonce_endpoint(base_url: &str) -> ClientResult<Url> {
    // Trailing slash so `join` appends instead of replacing the last segment.
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&base)
        .and_then(|url| url.join(NEXT_NONCE_PATH))
        .map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))
}

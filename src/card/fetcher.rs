//! Remote card fetching (C2).
//!
//! Stateless GET with hard limits. User-supplied publisher URLs may redirect
//! anywhere; peer-sync fetches only follow redirects on the original host.

use std::time::Duration;

use reqwest::redirect;
use reqwest::Client;
use snafu::Snafu;
use url::Url;

use crate::types::card::MAX_CARD_BYTES;

// ============================================================================
// Constants (fixed limits)
// ============================================================================

/// TCP connect budget.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Whole-request budget, including body.
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum redirect hops.
pub const MAX_REDIRECTS: usize = 3;

/// Maximum response body size.
pub const MAX_RESPONSE_BYTES: usize = MAX_CARD_BYTES;

/// Redirect policy for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// Follow up to [`MAX_REDIRECTS`] hops to any host. Used for URLs
    /// belonging to a verified publisher.
    AnyHost,
    /// Follow up to [`MAX_REDIRECTS`] hops on the original host only.
    /// Used for peer synchronization.
    SameHost,
}

/// Fetch failure.
#[derive(Debug, Snafu)]
pub enum FetchError {
    /// The URL was not absolute http(s).
    #[snafu(display("url must be absolute http or https"))]
    InvalidUrl,

    /// The server answered outside 2xx.
    #[snafu(display("fetch failed with status {status}"))]
    Status {
        /// The HTTP status received.
        status: u16,
    },

    /// The response did not declare a JSON content type.
    #[snafu(display("response is not application/json (got '{content_type}')"))]
    ContentType {
        /// What the server declared.
        content_type: String,
    },

    /// The body exceeded [`MAX_RESPONSE_BYTES`].
    #[snafu(display("response exceeds {limit} bytes"))]
    TooLarge {
        /// The enforced limit.
        limit: usize,
    },

    /// Connect/read deadline exhausted.
    #[snafu(display("fetch timed out"))]
    Timeout,

    /// TLS, DNS, redirect-policy, or other transport failure.
    #[snafu(display("transport error: {source}"))]
    Transport {
        /// The underlying client error.
        source: reqwest::Error,
    },
}

/// Raw card bytes plus the declared content type.
#[derive(Debug, Clone)]
pub struct FetchedCard {
    /// The response body.
    pub bytes: Vec<u8>,
    /// The `Content-Type` header value.
    pub content_type: String,
}

/// Stateless HTTP fetcher for Agent Cards and peer indexes.
#[derive(Debug, Clone)]
pub struct CardFetcher {
    any_host: Client,
    same_host: Client,
}

impl CardFetcher {
    /// Build a fetcher with both redirect policies preconfigured.
    pub fn new() -> Result<Self, FetchError> {
        let any_host = base_builder()
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|source| FetchError::Transport { source })?;
        let same_host = base_builder()
            .redirect(redirect::Policy::custom(|attempt| {
                if attempt.previous().len() > MAX_REDIRECTS {
                    return attempt.error("too many redirects");
                }
                let original_host = attempt
                    .previous()
                    .first()
                    .and_then(|u| u.host_str().map(str::to_owned));
                match (original_host, attempt.url().host_str()) {
                    (Some(original), Some(next)) if original == next => attempt.follow(),
                    _ => attempt.error("cross-host redirect refused"),
                }
            }))
            .build()
            .map_err(|source| FetchError::Transport { source })?;
        Ok(Self {
            any_host,
            same_host,
        })
    }

    /// GET `url`, optionally with a bearer token, and return the body.
    ///
    /// Enforces the connect/total timeouts, the redirect policy, the size
    /// cap, and requires a JSON content type.
    pub async fn fetch(
        &self,
        url: &Url,
        auth_token: Option<&str>,
        mode: RedirectMode,
    ) -> Result<FetchedCard, FetchError> {
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(FetchError::InvalidUrl);
        }

        let client = match mode {
            RedirectMode::AnyHost => &self.any_host,
            RedirectMode::SameHost => &self.same_host,
        };

        let mut request = client.get(url.clone());
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("application/json") {
            return Err(FetchError::ContentType { content_type });
        }

        if let Some(declared) = response.content_length() {
            if declared as usize > MAX_RESPONSE_BYTES {
                return Err(FetchError::TooLarge {
                    limit: MAX_RESPONSE_BYTES,
                });
            }
        }

        let bytes = response.bytes().await.map_err(classify)?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(FetchError::TooLarge {
                limit: MAX_RESPONSE_BYTES,
            });
        }

        Ok(FetchedCard {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

fn base_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(TOTAL_TIMEOUT)
        .user_agent(concat!("canopy/", env!("CARGO_PKG_VERSION")))
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = err.status() {
        FetchError::Status {
            status: status.as_u16(),
        }
    } else {
        FetchError::Transport { source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_http_schemes() {
        let fetcher = CardFetcher::new().unwrap();
        let url = Url::parse("ftp://example.com/card.json").unwrap();
        let err = fetcher.fetch(&url, None, RedirectMode::AnyHost).await;
        assert!(matches!(err, Err(FetchError::InvalidUrl)));
    }

    #[test]
    fn test_limits_are_conservative() {
        assert!(CONNECT_TIMEOUT <= TOTAL_TIMEOUT);
        assert_eq!(MAX_RESPONSE_BYTES, 256 * 1024);
        assert_eq!(MAX_REDIRECTS, 3);
    }
}

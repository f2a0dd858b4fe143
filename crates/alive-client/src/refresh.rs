//! Fresh socket URLs.
//!
//! Signed socket URLs expire. Once the transport gives up on the current
//! one, the session asks a [`RefreshUrlFetcher`] for a new URL; `Ok(None)`
//! means the endpoint no longer serves this client and the session should
//! stop.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::errors::RefreshError;

/// Header carrying the one-time token on the second leg.
pub const CSRF_HEADER: &str = "Scoped-CSRF-Token";

/// Source of fresh socket URLs.
#[async_trait]
pub trait RefreshUrlFetcher: Send + Sync {
    /// A new socket URL, or `None` when the resource is gone.
    async fn fetch(&self) -> Result<Option<String>, RefreshError>;
}

#[derive(Deserialize)]
struct PostUrl {
    url: Option<String>,
    token: Option<String>,
}

/// Two-step HTTP refresh over `reqwest`.
///
/// 1. `GET refresh_url` (JSON) → `{url, token}`; 404 or a missing field means gone
/// 2. `POST url` with the token header → the socket URL as plain text
pub struct HttpRefresher {
    client: reqwest::Client,
    refresh_url: String,
}

impl HttpRefresher {
    /// Create a refresher with a default client.
    pub fn new(refresh_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("alive-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self::with_client(client, refresh_url)
    }

    /// Create a refresher sharing an existing client.
    pub fn with_client(client: reqwest::Client, refresh_url: impl Into<String>) -> Self {
        Self {
            client,
            refresh_url: refresh_url.into(),
        }
    }

    /// The endpoint queried first.
    pub fn refresh_url(&self) -> &str {
        &self.refresh_url
    }

    async fn fetch_post_url(&self) -> Result<Option<PostUrl>, RefreshError> {
        let response = self
            .client
            .get(&self.refresh_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RefreshError::Status {
                endpoint: "refresh endpoint",
                status: status.as_u16(),
            });
        }
        Ok(Some(response.json().await?))
    }

    async fn post(&self, url: &str, token: &str) -> Result<String, RefreshError> {
        let response = self
            .client
            .post(self.resolve(url))
            .header(CSRF_HEADER, token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status {
                endpoint: "socket url endpoint",
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    /// Resolve a possibly relative URL against the refresh endpoint.
    fn resolve(&self, url: &str) -> String {
        Url::parse(&self.refresh_url)
            .and_then(|base| base.join(url))
            .map_or_else(|_| url.to_string(), String::from)
    }
}

#[async_trait]
impl RefreshUrlFetcher for HttpRefresher {
    async fn fetch(&self) -> Result<Option<String>, RefreshError> {
        let Some(post_url) = self.fetch_post_url().await? else {
            debug!(url = %self.refresh_url, "refresh endpoint gone");
            return Ok(None);
        };
        let (Some(url), Some(token)) = (
            post_url.url.filter(|u| !u.is_empty()),
            post_url.token.filter(|t| !t.is_empty()),
        ) else {
            debug!(url = %self.refresh_url, "refresh response missing url or token");
            return Ok(None);
        };
        self.post(&url, &token).await.map(Some)
    }
}

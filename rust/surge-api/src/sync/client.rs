//! Page fetching.

use std::time::Duration;

use async_trait::async_trait;

use super::payload::Page;
use crate::error::SyncError;

/// Source of result pages. The HTTP implementation is [`HttpPageSource`];
/// tests substitute canned pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<Page, SyncError>;
}

/// Fetches pages over HTTP with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("surge-api/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SyncError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch_page(&self, url: &str) -> Result<Page, SyncError> {
        let transport = |source| SyncError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&body).map_err(|source| SyncError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

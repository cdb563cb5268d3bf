//! Page fetching for the collector. One fixed user agent, bounded timeout,
//! non-2xx is an error the collector decides how to handle.

use crate::error::{ResearchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub const USER_AGENT: &str = "Mozilla/5.0";
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page and return its raw HTML body.
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ResearchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(PAGE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ResearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResearchError::HttpStatus { status: status.as_u16(), body: String::new() });
        }

        response
            .text()
            .await
            .map_err(|e| ResearchError::Transport(e.to_string()))
    }
}

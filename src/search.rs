//! Google Custom Search JSON API client.

use crate::error::{truncate_body, ResearchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

pub const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Organic results requested per query.
pub const RESULT_COUNT: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchItem {
    pub link: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchItem>>;
}

pub struct GoogleSearch {
    client: Client,
    api_key: String,
    engine_id: String,
}

impl GoogleSearch {
    pub fn new(api_key: String, engine_id: String) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ResearchError::Transport(e.to_string()))?;
        Ok(Self { client, api_key, engine_id })
    }
}

#[async_trait]
impl SearchApi for GoogleSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchItem>> {
        let count = RESULT_COUNT.to_string();
        let params = [
            ("key", self.api_key.as_str()),
            ("cx", self.engine_id.as_str()),
            ("q", query),
            ("num", count.as_str()),
        ];

        let response = self
            .client
            .get(SEARCH_URL)
            .query(&params)
            .send()
            .await
            .map_err(|e| ResearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResearchError::HttpStatus {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::MalformedResponse(e.to_string()))?;
        Ok(parsed.items)
    }
}

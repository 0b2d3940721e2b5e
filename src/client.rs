use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::planner::FetchTask;

pub trait CatalogClient: Send + Sync {
    fn fetch(&self, task: &FetchTask) -> Result<Vec<u8>, HarvestError>;

    fn fetch_page(&self, url: &str) -> Result<String, HarvestError>;
}

#[derive(Clone)]
pub struct HttpCatalogClient {
    client: Client,
}

impl HttpCatalogClient {
    pub fn new(config: &HarvestConfig) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.crawler_user_agent)
                .map_err(|err| HarvestError::InvalidConfig(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(config.locale.as_str())
                .map_err(|err| HarvestError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, HarvestError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .ok()
            .map(|text| truncate(&text, 200))
            .unwrap_or_else(|| "request failed".to_string());
        Err(HarvestError::Status { status, message })
    }
}

impl CatalogClient for HttpCatalogClient {
    fn fetch(&self, task: &FetchTask) -> Result<Vec<u8>, HarvestError> {
        let response = self
            .client
            .get(&task.url)
            .headers(task.headers.clone())
            .send()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let bytes = response
            .bytes()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn fetch_page(&self, url: &str) -> Result<String, HarvestError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .text()
            .map_err(|err| HarvestError::Http(err.to_string()))
    }
}

pub fn is_retryable(err: &HarvestError) -> bool {
    match err {
        HarvestError::Http(_) => true,
        HarvestError::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
        _ => false,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

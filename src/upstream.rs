// Client for the Calendarific holiday-data API
// Every call carries the API key as a query parameter and unwraps the `response` envelope.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::holiday_cache_key;

pub const DEFAULT_BASE_URL: &str = "https://calendarific.com/api/v2";

// Any failure talking to the upstream service. Cloneable so one result can be
// handed to every request waiting on the same call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Request failed with status code {0}")]
    Status(u16),

    #[error("timeout of {0}ms exceeded")]
    Timeout(u64),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("Upstream call aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout_ms: 10_000,
        }
    }
}

// A validated holidays request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolidayQuery {
    pub country: String,
    pub year: i32,
}

impl HolidayQuery {
    pub fn cache_key(&self) -> String {
        holiday_cache_key(&self.country, self.year)
    }
}

// The two read-only upstream operations the proxy depends on.
// Both return the list extracted from the envelope, untouched.
#[async_trait]
pub trait HolidayApi: Send + Sync + 'static {
    async fn holidays(&self, query: &HolidayQuery) -> Result<Value, UpstreamError>;

    async fn countries(&self) -> Result<Value, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
struct HolidaysBody {
    holidays: Value,
}

#[derive(Debug, Deserialize)]
struct CountriesBody {
    countries: Value,
}

pub struct CalendarificClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl CalendarificClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    // The request URL embeds the API key, so it is stripped before the error is
    // logged or shown to a client.
    fn classify(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.config.timeout_ms)
        } else if err.is_decode() {
            UpstreamError::InvalidResponse(err.without_url().to_string())
        } else {
            UpstreamError::NetworkError(err.without_url().to_string())
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        debug!(path, "Calling upstream");

        let response = self
            .http
            .get(self.endpoint(path))
            .query(&[("api_key", self.config.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(path, status = status.as_u16(), "Upstream returned an error status");
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| self.classify(e))?;
        Ok(envelope.response)
    }
}

#[async_trait]
impl HolidayApi for CalendarificClient {
    async fn holidays(&self, query: &HolidayQuery) -> Result<Value, UpstreamError> {
        let params = [
            ("country", query.country.clone()),
            ("year", query.year.to_string()),
        ];
        let body: HolidaysBody = self.fetch("holidays", &params).await?;
        Ok(body.holidays)
    }

    async fn countries(&self) -> Result<Value, UpstreamError> {
        let body: CountriesBody = self.fetch("countries", &[]).await?;
        Ok(body.countries)
    }
}

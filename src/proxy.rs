// Caching front for the holiday API.
// Each request is validated, mapped to a cache key, answered from the cache when
// possible and otherwise fetched once from upstream and stored.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheStats, ExpiringCache, COUNTRIES_CACHE_KEY};
use crate::upstream::{HolidayApi, HolidayQuery, UpstreamError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("Country and year are required")]
    MissingParameter,

    #[error("Year must be a valid integer")]
    InvalidYear(String),

    #[error("{0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ProxyError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ProxyError::Upstream(_))
    }
}

impl HolidayQuery {
    // Blank values count as missing, like absent ones
    pub fn from_params(country: Option<&str>, year: Option<&str>) -> Result<Self, ProxyError> {
        fn present(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        let (country, year) = match (present(country), present(year)) {
            (Some(country), Some(year)) => (country, year),
            _ => return Err(ProxyError::MissingParameter),
        };

        let year = year
            .parse::<i32>()
            .map_err(|_| ProxyError::InvalidYear(year.to_string()))?;

        Ok(Self {
            country: country.to_string(),
            year,
        })
    }
}

type UpstreamCall = Shared<BoxFuture<'static, Result<Value, UpstreamError>>>;

pub struct HolidayProxy {
    api: Arc<dyn HolidayApi>,
    cache: Arc<dyn ExpiringCache<Value = Value>>,
    // at most one upstream call per key is running at any time
    in_flight: Arc<DashMap<String, UpstreamCall>>,
}

impl HolidayProxy {
    pub fn new(api: Arc<dyn HolidayApi>, cache: Arc<dyn ExpiringCache<Value = Value>>) -> Self {
        Self {
            api,
            cache,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn holidays(
        &self,
        country: Option<&str>,
        year: Option<&str>,
    ) -> Result<Value, ProxyError> {
        let query = HolidayQuery::from_params(country, year)?;
        let key = query.cache_key();
        let api = self.api.clone();

        self.cached(key, move || async move { api.holidays(&query).await }.boxed())
            .await
    }

    pub async fn countries(&self) -> Result<Value, ProxyError> {
        let api = self.api.clone();

        self.cached(COUNTRIES_CACHE_KEY.to_string(), move || {
            async move { api.countries().await }.boxed()
        })
        .await
    }

    async fn cached<F>(&self, key: String, fetch: F) -> Result<Value, ProxyError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value, UpstreamError>>,
    {
        if let Some(value) = self.cache.get(&key) {
            debug!(%key, "Cache hit");
            return Ok(value);
        }

        let call = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(%key, "Joining in-flight upstream call");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                // a call for this key may have finished and filled the cache since the lookup
                if let Some(value) = self.cache.get(&key) {
                    debug!(%key, "Cache hit");
                    return Ok(value);
                }

                debug!(%key, "Cache miss");
                let call = self.upstream_call(key.clone(), fetch());
                entry.insert(call.clone());
                call
            }
        };

        Ok(call.await?)
    }

    // The call runs on its own task: it finishes, stores its result and frees its
    // in-flight slot even when every request waiting on it has gone away.
    fn upstream_call(
        &self,
        key: String,
        upstream: BoxFuture<'static, Result<Value, UpstreamError>>,
    ) -> UpstreamCall {
        let cache = self.cache.clone();
        let in_flight = self.in_flight.clone();

        let task = tokio::spawn(async move {
            let result = upstream.await;
            match &result {
                Ok(value) => cache.set(&key, value.clone()),
                Err(e) => warn!(%key, error = %e, "Upstream call failed, not caching"),
            }
            in_flight.remove(&key);
            result
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(UpstreamError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

//! Per-model token prices used by the cache-token estimator.
//!
//! Prices come from a remote table (OpenRouter's `/models` listing) cached for
//! a configurable time-to-live, with a small static table as fallback for when
//! the fetch fails or the model is not listed.

use crate::error::{ProxyError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_PRICING_URL: &str = "https://openrouter.ai/api/v1/models";
pub const DEFAULT_TTL_HOURS: i64 = 7 * 24;
/// Minimum gap between remote fetch attempts while the table is stale.
const RETRY_BACKOFF_MINUTES: i64 = 10;

/// Prices in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64, cache_read: f64, cache_write: f64) -> Self {
        Self {
            input,
            output,
            cache_read,
            cache_write,
        }
    }

    pub fn input_per_token(&self) -> f64 {
        self.input / 1_000_000.0
    }

    pub fn output_per_token(&self) -> f64 {
        self.output / 1_000_000.0
    }

    pub fn cache_read_per_token(&self) -> f64 {
        self.cache_read / 1_000_000.0
    }

    pub fn cache_write_per_token(&self) -> f64 {
        self.cache_write / 1_000_000.0
    }
}

const STATIC_PRICES: &[(&str, ModelPricing)] = &[
    ("anthropic/claude-opus-4.1", ModelPricing::new(15.0, 75.0, 1.5, 18.75)),
    ("anthropic/claude-opus-4", ModelPricing::new(15.0, 75.0, 1.5, 18.75)),
    ("anthropic/claude-sonnet-4.5", ModelPricing::new(3.0, 15.0, 0.3, 3.75)),
    ("anthropic/claude-sonnet-4", ModelPricing::new(3.0, 15.0, 0.3, 3.75)),
    ("anthropic/claude-3.7-sonnet", ModelPricing::new(3.0, 15.0, 0.3, 3.75)),
    ("anthropic/claude-3.5-sonnet", ModelPricing::new(3.0, 15.0, 0.3, 3.75)),
    ("anthropic/claude-haiku-4.5", ModelPricing::new(1.0, 5.0, 0.1, 1.25)),
    ("anthropic/claude-3.5-haiku", ModelPricing::new(0.8, 4.0, 0.08, 1.0)),
    ("openai/gpt-4o", ModelPricing::new(2.5, 10.0, 1.25, 2.5)),
    ("openai/gpt-4o-mini", ModelPricing::new(0.15, 0.6, 0.075, 0.15)),
    ("google/gemini-2.5-pro", ModelPricing::new(1.25, 10.0, 0.31, 1.625)),
    ("google/gemini-2.5-flash", ModelPricing::new(0.3, 2.5, 0.075, 0.3833)),
];

/// Look a model up in the built-in fallback table.
pub fn static_pricing(model: &str) -> Option<ModelPricing> {
    let key = model.to_lowercase();
    STATIC_PRICES
        .iter()
        .find(|(id, _)| *id == key)
        .or_else(|| STATIC_PRICES.iter().find(|(id, _)| matches_unprefixed(id, &key)))
        .map(|(_, pricing)| *pricing)
}

/// `anthropic/claude-sonnet-4` matches a bare `claude-sonnet-4` lookup.
fn matches_unprefixed(id: &str, key: &str) -> bool {
    !key.contains('/') && id.rsplit('/').next() == Some(key)
}

/// Prices keyed by lowercase model id.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    entries: HashMap<String, ModelPricing>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: &str, pricing: ModelPricing) {
        self.entries.insert(model.to_lowercase(), pricing);
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let key = model.to_lowercase();
        self.entries.get(&key).copied().or_else(|| {
            self.entries
                .iter()
                .find(|(id, _)| matches_unprefixed(id, &key))
                .map(|(_, pricing)| *pricing)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a table from an OpenRouter `/models` response body.
    ///
    /// Listed prices are USD per token as decimal strings; entries with
    /// missing or negative (variable-priced) input/output prices are skipped.
    pub fn from_openrouter_json(body: &str) -> Result<Self> {
        let listing: RemoteListing = serde_json::from_str(body)?;
        let mut table = Self::new();

        for model in listing.data {
            let Some(pricing) = model.pricing else {
                continue;
            };
            let (Some(input), Some(output)) = (
                per_million(pricing.prompt.as_deref()),
                per_million(pricing.completion.as_deref()),
            ) else {
                continue;
            };
            // Models without cache pricing bill cached tokens like normal input.
            let cache_read = per_million(pricing.input_cache_read.as_deref()).unwrap_or(input);
            let cache_write = per_million(pricing.input_cache_write.as_deref()).unwrap_or(input);
            table.insert(
                &model.id,
                ModelPricing::new(input, output, cache_read, cache_write),
            );
        }

        Ok(table)
    }
}

fn per_million(raw: Option<&str>) -> Option<f64> {
    let value: f64 = raw?.trim().parse().ok()?;
    (value >= 0.0).then_some(value * 1_000_000.0)
}

#[derive(Debug, Deserialize)]
struct RemoteListing {
    #[serde(default)]
    data: Vec<RemoteModel>,
}

#[derive(Debug, Deserialize)]
struct RemoteModel {
    id: String,
    #[serde(default)]
    pricing: Option<RemotePricing>,
}

#[derive(Debug, Deserialize)]
struct RemotePricing {
    prompt: Option<String>,
    completion: Option<String>,
    input_cache_read: Option<String>,
    input_cache_write: Option<String>,
}

#[derive(Debug)]
struct CachedTable {
    table: PriceTable,
    fetched_at: DateTime<Utc>,
}

/// Shared, refreshable price cache. One instance lives in the app state.
#[derive(Debug)]
pub struct PricingCache {
    url: Option<String>,
    ttl: Duration,
    inner: RwLock<Option<CachedTable>>,
    /// When a remote fetch was last started, successful or not.
    last_attempt: RwLock<Option<DateTime<Utc>>>,
}

impl PricingCache {
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: Some(url.into()),
            ttl,
            inner: RwLock::new(None),
            last_attempt: RwLock::new(None),
        }
    }

    /// A cache that never goes to the network and answers from the static table.
    pub fn offline() -> Self {
        Self {
            url: None,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            inner: RwLock::new(None),
            last_attempt: RwLock::new(None),
        }
    }

    /// A cache pre-populated with `table`, fetched "now" and never refreshed remotely.
    pub fn with_table(table: PriceTable) -> Self {
        Self {
            url: None,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            inner: RwLock::new(Some(CachedTable {
                table,
                fetched_at: Utc::now(),
            })),
            last_attempt: RwLock::new(None),
        }
    }

    pub async fn seed(&self, table: PriceTable, fetched_at: DateTime<Utc>) {
        *self.inner.write().await = Some(CachedTable { table, fetched_at });
    }

    pub async fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match self.inner.read().await.as_ref() {
            Some(cached) => now - cached.fetched_at >= self.ttl,
            None => true,
        }
    }

    fn retry_backoff(&self) -> Duration {
        Duration::minutes(RETRY_BACKOFF_MINUTES).min(self.ttl)
    }

    /// Whether `resolve` at `now` would go to the network: the table is stale
    /// and no fetch was attempted within the retry back-off.
    pub async fn refresh_due_at(&self, now: DateTime<Utc>) -> bool {
        if self.url.is_none() || !self.is_stale_at(now).await {
            return false;
        }
        match *self.last_attempt.read().await {
            Some(at) => now - at >= self.retry_backoff(),
            None => true,
        }
    }

    /// Atomically check that a refresh is due and record the attempt.
    async fn claim_refresh(&self, now: DateTime<Utc>) -> bool {
        if !self.refresh_due_at(now).await {
            return false;
        }
        let mut last = self.last_attempt.write().await;
        if last.is_some_and(|at| now - at < self.retry_backoff()) {
            return false;
        }
        *last = Some(now);
        true
    }

    /// Fetch the remote table and replace the cached copy.
    ///
    /// Concurrent refreshes may race; each overwrites the table with the same data.
    pub async fn refresh(&self, client: &reqwest::Client) -> Result<usize> {
        let Some(ref url) = self.url else {
            return Err(ProxyError::config("pricing refresh has no remote URL"));
        };
        *self.last_attempt.write().await = Some(Utc::now());

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| ProxyError::provider(format!("Pricing fetch failed: {e}")))?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(ProxyError::provider(format!(
                "Pricing source returned status {status}"
            )));
        }

        let body = response.text().await?;
        let table = PriceTable::from_openrouter_json(&body)?;
        let count = table.len();
        self.seed(table, Utc::now()).await;

        info!(models = count, url = %url, "Pricing table refreshed");
        Ok(count)
    }

    /// Cached remote price first, then the static fallback.
    pub async fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let cached = self
            .inner
            .read()
            .await
            .as_ref()
            .and_then(|c| c.table.get(model));
        cached.or_else(|| static_pricing(model))
    }

    /// Refresh if the table is stale, then look the model up.
    ///
    /// A failed refresh is logged and the lookup falls back to whatever is
    /// cached. Failed fetches are not retried until the back-off has passed.
    pub async fn resolve(&self, client: &reqwest::Client, model: &str) -> Option<ModelPricing> {
        if self.claim_refresh(Utc::now()).await {
            if let Err(e) = self.refresh(client).await {
                warn!(error = %e, "Pricing refresh failed, using fallback prices");
            }
        }

        let pricing = self.lookup(model).await;
        if pricing.is_none() {
            debug!(model = %model, "No pricing known for model");
        }
        pricing
    }
}

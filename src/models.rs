//! The model catalogue served on `/v1/models`.
//!
//! The router does not expose a listing we can forward, so the proxy answers
//! with a static catalogue of commonly routed models plus any alias names from
//! the `[models]` config section.

use crate::config::ProxyConfig;
use serde::{Deserialize, Serialize};

/// One entry in an OpenAI-style `/models` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelEntry {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelEntry>,
}

/// Models the default router is known to serve.
#[must_use]
pub fn known_models() -> &'static [&'static str] {
    &[
        "anthropic/claude-opus-4.1",
        "anthropic/claude-sonnet-4.5",
        "anthropic/claude-sonnet-4",
        "anthropic/claude-3.7-sonnet",
        "anthropic/claude-haiku-4.5",
        "openai/gpt-4o",
        "openai/gpt-4o-mini",
        "google/gemini-2.5-pro",
        "google/gemini-2.5-flash",
    ]
}

/// Catalogue plus configured aliases, sorted and de-duplicated.
#[must_use]
pub fn model_list(config: &ProxyConfig) -> ModelList {
    let mut ids: Vec<String> = known_models().iter().map(ToString::to_string).collect();
    ids.extend(config.models.keys().cloned());
    ids.sort();
    ids.dedup();

    let data = ids
        .into_iter()
        .map(|id| {
            let owned_by = id
                .split_once('/')
                .map_or_else(|| config.provider.name.clone(), |(vendor, _)| vendor.to_string());
            ModelEntry {
                id,
                object: "model".to_string(),
                created: 0,
                owned_by,
            }
        })
        .collect();

    ModelList {
        object: "list".to_string(),
        data,
    }
}

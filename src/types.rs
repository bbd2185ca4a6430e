use serde::{Deserialize, Serialize};

use crate::session::{CollectionLimits, SessionSnapshot};

/// One image as returned by a provider. `size_bytes_estimate` is what the
/// cache accounts with; providers that don't report sizes estimate it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProviderImage {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub source_page: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    pub size_bytes_estimate: u64,
}

/// One page of provider results.
#[derive(Debug, Clone)]
pub struct ImagePage {
    pub items: Vec<ProviderImage>,
    pub total: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSearchRequest {
    pub query: String,
    #[serde(default)]
    pub limits: Option<CollectionLimits>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSearchResponse {
    pub session: SessionSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchResponse {
    pub images: Vec<ProviderImage>,
    pub awaiting_confirmation: bool,
    pub should_warn: bool,
    pub progress: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

// SearXNG API types (categories=images)
#[derive(Debug, Deserialize)]
pub struct SearxngImageResponse {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub number_of_results: u64,
    pub results: Vec<SearxngImageResult>,
    #[serde(default)]
    pub unresponsive_engines: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SearxngImageResult {
    pub url: String,
    pub title: String,
    pub engine: String,
    #[serde(default)]
    pub img_src: Option<String>,
    #[serde(default)]
    pub thumbnail_src: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub img_format: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use tracing::{debug, info};
use url::Url;

use crate::error::ProviderError;
use crate::provider::ImageProvider;
use crate::types::{ImagePage, ProviderImage, SearxngImageResponse};

/// Fallback byte estimate for results without a usable resolution.
const DEFAULT_SIZE_ESTIMATE: u64 = 256 * 1024;
/// Ceiling on resolution-derived estimates; anything bigger is noise.
const MAX_SIZE_ESTIMATE: u64 = 32 * 1024 * 1024;

/// SearXNG-backed image provider (`categories=images`, JSON format).
pub struct SearxngImageProvider {
    base_url: String,
    http_client: reqwest::Client,
    // Short-lived page cache so a re-issued batch doesn't spend quota.
    page_cache: moka::future::Cache<String, ImagePage>,
}

impl SearxngImageProvider {
    pub fn new(base_url: String, http_client: reqwest::Client) -> anyhow::Result<Self> {
        Url::parse(&base_url)?;
        Ok(Self {
            base_url,
            http_client,
            page_cache: moka::future::Cache::builder()
                .max_capacity(1_000)
                .time_to_live(Duration::from_secs(60 * 10))
                .build(),
        })
    }
}

#[async_trait]
impl ImageProvider for SearxngImageProvider {
    async fn search(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<ImagePage, ProviderError> {
        info!("image search: {} (page {})", query, page);
        // Key includes paging so different pages don't collide
        let cache_key = format!("q={query}|page={page}|per={per_page}");
        if let Some(cached) = self.page_cache.get(&cache_key).await {
            debug!("page cache hit for query");
            return Ok(cached);
        }

        let mut params: HashMap<String, String> = HashMap::new();
        params.insert("q".into(), query.to_string());
        params.insert("format".into(), "json".into());
        params.insert("categories".into(), "images".into());
        params.insert("pageno".into(), page.to_string());
        params.insert("language".into(), "en".into());
        // Allow override via env
        let engines = std::env::var("SEARXNG_IMAGE_ENGINES")
            .unwrap_or_else(|_| "duckduckgo,google,bing".to_string());
        params.insert("engines".into(), engines);
        let safesearch = std::env::var("SEARXNG_SAFESEARCH").unwrap_or_else(|_| "1".to_string());
        params.insert("safesearch".into(), safesearch);

        let search_url = format!("{}/search", self.base_url);
        debug!("search URL: {}", search_url);

        let client = self.http_client.clone();
        let response: SearxngImageResponse = retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(200))
                .with_max_interval(Duration::from_secs(2))
                .with_max_elapsed_time(Some(Duration::from_secs(4)))
                .build(),
            || async {
                let resp = client
                    .get(&search_url)
                    .query(&params)
                    .header("User-Agent", "ImageHarvest/1.0")
                    .header("Accept", "application/json")
                    .send()
                    .await
                    .map_err(|e| {
                        backoff::Error::transient(ProviderError::Network(e.to_string()))
                    })?;
                let status = resp.status();
                if status.as_u16() == 429 {
                    return Err(backoff::Error::permanent(
                        ProviderError::RateLimitedByProvider,
                    ));
                }
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_else(|_| "".into());
                    let err = ProviderError::Other(format!(
                        "SearXNG request failed with status {}: {}",
                        status, text
                    ));
                    // 5xx transient, others permanent
                    if status.is_server_error() {
                        return Err(backoff::Error::transient(err));
                    }
                    return Err(backoff::Error::permanent(err));
                }
                match resp.json::<SearxngImageResponse>().await {
                    Ok(parsed) => Ok(parsed),
                    Err(e) => Err(backoff::Error::transient(ProviderError::MalformedResponse(
                        e.to_string(),
                    ))),
                }
            },
        )
        .await?;

        info!("SearXNG returned {} image results", response.results.len());
        let page_result = convert(response, per_page);
        self.page_cache
            .insert(cache_key, page_result.clone())
            .await;
        Ok(page_result)
    }
}

/// Map the raw SearXNG payload to provider images: drop results without an
/// image source, dedupe by it, truncate to `per_page` (SearXNG has no
/// server-side page-size knob).
fn convert(response: SearxngImageResponse, per_page: u32) -> ImagePage {
    let total = (response.number_of_results > 0).then_some(response.number_of_results);
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for result in response.results {
        let Some(img_src) = result.img_src else {
            continue;
        };
        if img_src.is_empty() || !seen.insert(img_src.clone()) {
            continue;
        }
        items.push(ProviderImage {
            id: img_src.clone(),
            url: img_src,
            title: result.title,
            thumbnail_url: result.thumbnail_src.or(result.thumbnail),
            source_page: Some(result.url),
            size_bytes_estimate: estimate_size(result.resolution.as_deref()),
            resolution: result.resolution,
        });
        if items.len() == per_page as usize {
            break;
        }
    }
    ImagePage { items, total }
}

/// Rough decoded-size estimate from a "WxH" resolution string, 3 bytes per
/// pixel, capped. SearXNG image results carry no byte size.
fn estimate_size(resolution: Option<&str>) -> u64 {
    let Some(res) = resolution else {
        return DEFAULT_SIZE_ESTIMATE;
    };
    let cleaned: String = res.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parts = cleaned.split(['x', 'X', '*']);
    match (
        parts.next().and_then(|w| w.parse::<u64>().ok()),
        parts.next().and_then(|h| h.parse::<u64>().ok()),
    ) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w * h * 3).min(MAX_SIZE_ESTIMATE),
        _ => DEFAULT_SIZE_ESTIMATE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_size_from_resolution() {
        assert_eq!(estimate_size(Some("100x200")), 60_000);
        assert_eq!(estimate_size(Some("100 x 200")), 60_000);
        assert_eq!(estimate_size(Some("100*200")), 60_000);
        assert_eq!(estimate_size(Some("garbage")), DEFAULT_SIZE_ESTIMATE);
        assert_eq!(estimate_size(None), DEFAULT_SIZE_ESTIMATE);
        // Absurd resolutions are capped.
        assert_eq!(estimate_size(Some("1000000x1000000")), MAX_SIZE_ESTIMATE);
    }

    #[test]
    fn converts_and_dedupes_results() {
        let raw = serde_json::json!({
            "query": "rust crab",
            "number_of_results": 120,
            "results": [
                {
                    "url": "https://host/a",
                    "title": "A",
                    "engine": "duckduckgo",
                    "img_src": "https://img/a.jpg",
                    "thumbnail_src": "https://img/a_t.jpg",
                    "resolution": "800x600"
                },
                {
                    "url": "https://host/a-mirror",
                    "title": "A again",
                    "engine": "bing",
                    "img_src": "https://img/a.jpg"
                },
                {
                    "url": "https://host/no-image",
                    "title": "missing img_src",
                    "engine": "google"
                },
                {
                    "url": "https://host/b",
                    "title": "B",
                    "engine": "google",
                    "img_src": "https://img/b.png"
                }
            ]
        });
        let response: SearxngImageResponse = serde_json::from_value(raw).unwrap();
        let page = convert(response, 10);
        assert_eq!(page.total, Some(120));
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "https://img/a.jpg");
        assert_eq!(page.items[0].size_bytes_estimate, 800 * 600 * 3);
        assert_eq!(
            page.items[0].thumbnail_url.as_deref(),
            Some("https://img/a_t.jpg")
        );
        assert_eq!(page.items[1].size_bytes_estimate, DEFAULT_SIZE_ESTIMATE);
    }

    #[test]
    fn truncates_to_requested_page_size() {
        let results: Vec<_> = (0..8)
            .map(|i| {
                serde_json::json!({
                    "url": format!("https://host/{i}"),
                    "title": format!("img {i}"),
                    "engine": "duckduckgo",
                    "img_src": format!("https://img/{i}.jpg")
                })
            })
            .collect();
        let raw = serde_json::json!({ "results": results });
        let response: SearxngImageResponse = serde_json::from_value(raw).unwrap();
        let page = convert(response, 3);
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.total, None);
    }
}

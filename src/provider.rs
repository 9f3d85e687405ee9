use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::AppError;
use crate::config::ProviderConfig;
use crate::models::{StockSnapshot, StockStatus};
use crate::utils::error::ProviderError;

/// Turns a tracked product reference into a point-in-time snapshot of price
/// and per-size availability. One implementation per retailer API shape.
#[async_trait]
pub trait StockProvider: Send + Sync {
    async fn fetch(
        &self,
        product_ref: &str,
        region: &str,
    ) -> Result<StockSnapshot, ProviderError>;
}

// Wire format of the product-details endpoint. Required fields are not
// Option: a body missing them is schema drift and fails closed as
// MalformedResponse, never a permissive default.
#[derive(Debug, Deserialize)]
struct ProductDetails {
    detail: ProductDetail,
}

#[derive(Debug, Deserialize)]
struct ProductDetail {
    colors: Vec<ColorVariant>,
}

#[derive(Debug, Deserialize)]
struct ColorVariant {
    sizes: Vec<SizeEntry>,
}

#[derive(Debug, Deserialize)]
struct SizeEntry {
    name: String,
    availability: String,
    /// Minor currency units, as the API reports them.
    price: i64,
}

/// Client for the retailer's product-details endpoint.
pub struct HttpStockProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpStockProvider {
    pub fn new(config: ProviderConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn details_url(&self, product_ref: &str, region: &str) -> String {
        format!(
            "{}/{}/{}/products-details?productIds={}",
            self.config.endpoint.trim_end_matches('/'),
            region,
            self.config.language,
            product_ref
        )
    }
}

#[async_trait]
impl StockProvider for HttpStockProvider {
    async fn fetch(
        &self,
        product_ref: &str,
        region: &str,
    ) -> Result<StockSnapshot, ProviderError> {
        let url = self.details_url(product_ref, region);
        tracing::debug!(product_ref, region, "fetching product details");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::TransientNetwork(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(ProviderError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => return Err(ProviderError::RateLimited),
            status if status.is_server_error() => {
                return Err(ProviderError::TransientNetwork(format!(
                    "upstream returned {status}"
                )));
            }
            status if !status.is_success() => {
                return Err(ProviderError::MalformedResponse(format!(
                    "unexpected status {status}"
                )));
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::TransientNetwork(e.to_string()))?;

        parse_snapshot(&body, &self.config.currency)
    }
}

fn parse_snapshot(body: &str, currency: &str) -> Result<StockSnapshot, ProviderError> {
    let products: Vec<ProductDetails> = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    // An empty product list means the variant is gone upstream.
    let product = products.into_iter().next().ok_or(ProviderError::NotFound)?;
    let variant = product
        .detail
        .colors
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("product has no colour variants".into()))?;

    if variant.sizes.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "variant lists no sizes".into(),
        ));
    }

    let mut sizes = HashMap::new();
    let mut price = 0i64;
    for size in &variant.sizes {
        if size.price > 0 {
            price = size.price;
        }
        sizes.insert(size.name.clone(), StockStatus::from_wire(&size.availability));
    }

    Ok(StockSnapshot {
        observed_at: Utc::now(),
        price,
        currency: currency.to_string(),
        sizes,
    })
}

/// Extracts the variant id from a retailer product URL so the dashboard can
/// submit plain URLs. Prefers the `v1=` query parameter and falls back to
/// the `-p<id>.html` path suffix.
pub fn parse_product_ref(url: &str) -> Option<String> {
    static VARIANT_ID: OnceLock<Regex> = OnceLock::new();
    static PRODUCT_ID: OnceLock<Regex> = OnceLock::new();

    let variant = VARIANT_ID.get_or_init(|| Regex::new(r"v1=(\d+)").unwrap());
    let product = PRODUCT_ID.get_or_init(|| Regex::new(r"-p(\d+)\.html").unwrap());

    variant
        .captures(url)
        .or_else(|| product.captures(url))
        .map(|captures| captures[1].to_string())
}

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use restock_watcher::cache::CachedProvider;
use restock_watcher::config::ProviderConfig;
use restock_watcher::models::StockStatus;
use restock_watcher::provider::{HttpStockProvider, StockProvider};
use restock_watcher::utils::error::ProviderError;

use super::*;

const PRODUCT_BODY: &str = r#"[{
    "detail": {
        "colors": [{
            "sizes": [
                {"name": "S", "availability": "out_of_stock", "price": 12900},
                {"name": "M", "availability": "in_stock", "price": 12900},
                {"name": "L", "availability": "back_soon", "price": 12900}
            ]
        }]
    }
}]"#;

fn provider_for(server: &MockServer) -> HttpStockProvider {
    let config = ProviderConfig {
        endpoint: server.uri(),
        request_timeout_secs: 2,
        ..ProviderConfig::default()
    };
    HttpStockProvider::new(config).unwrap()
}

#[tokio::test]
async fn test_fetch_parses_product_details() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tr/en/products-details"))
        .and(query_param("productIds", "413025712"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PRODUCT_BODY, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let snapshot = provider.fetch("413025712", "tr").await?;

    assert_eq!(snapshot.price, 12_900);
    assert_eq!(snapshot.currency, "TRY");
    assert_eq!(snapshot.status_for("S"), StockStatus::OutOfStock);
    assert_eq!(snapshot.status_for("M"), StockStatus::InStock);
    // Unclassifiable availability never defaults to purchasable.
    assert_eq!(snapshot.status_for("L"), StockStatus::Unknown);
    Ok(())
}

#[tokio::test]
async fn test_http_status_mapping() -> anyhow::Result<()> {
    let cases = [
        (404, "missing"),
        (429, "limited"),
        (500, "flaky"),
    ];

    let server = MockServer::start().await;
    for (status, product_ref) in cases {
        Mock::given(method("GET"))
            .and(path("/tr/en/products-details"))
            .and(query_param("productIds", product_ref))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }

    let provider = provider_for(&server);

    assert!(matches!(
        provider.fetch("missing", "tr").await,
        Err(ProviderError::NotFound)
    ));
    assert!(matches!(
        provider.fetch("limited", "tr").await,
        Err(ProviderError::RateLimited)
    ));
    assert!(matches!(
        provider.fetch("flaky", "tr").await,
        Err(ProviderError::TransientNetwork(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_schema_drift_fails_closed() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    // availability missing from every size entry
    let body = r#"[{"detail": {"colors": [{"sizes": [{"name": "M", "price": 12900}]}]}}]"#;
    Mock::given(method("GET"))
        .and(query_param("productIds", "drifted"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(query_param("productIds", "garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);

    assert!(matches!(
        provider.fetch("drifted", "tr").await,
        Err(ProviderError::MalformedResponse(_))
    ));
    assert!(matches!(
        provider.fetch("garbage", "tr").await,
        Err(ProviderError::MalformedResponse(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_empty_product_list_means_gone() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("productIds", "retired"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("[]", "application/json"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    assert!(matches!(
        provider.fetch("retired", "tr").await,
        Err(ProviderError::NotFound)
    ));
    Ok(())
}

#[tokio::test]
async fn test_cache_collapses_duplicate_lookups() -> anyhow::Result<()> {
    let inner = Arc::new(ScriptedProvider::new());
    inner.script("p1", vec![ok_response(12_900, &[("M", in_stock())])]);

    let cached = CachedProvider::new(inner.clone(), Duration::from_millis(100));

    // Two lookups inside the TTL produce one upstream call.
    cached.fetch("p1", "tr").await?;
    cached.fetch("p1", "tr").await?;
    assert_eq!(inner.calls("p1"), 1);

    // A lookup after expiry goes upstream again.
    tokio::time::sleep(Duration::from_millis(150)).await;
    cached.fetch("p1", "tr").await?;
    assert_eq!(inner.calls("p1"), 2);
    Ok(())
}

#[tokio::test]
async fn test_cache_is_keyed_by_region() -> anyhow::Result<()> {
    let inner = Arc::new(ScriptedProvider::new());
    inner.script("p1", vec![ok_response(12_900, &[("M", in_stock())])]);

    let cached = CachedProvider::new(inner.clone(), Duration::from_secs(60));

    cached.fetch("p1", "tr").await?;
    cached.fetch("p1", "de").await?;
    assert_eq!(inner.calls("p1"), 2);
    Ok(())
}

#[tokio::test]
async fn test_cache_does_not_store_failures() -> anyhow::Result<()> {
    let inner = Arc::new(ScriptedProvider::new());
    inner.script(
        "p1",
        vec![
            ScriptedResponse::TransientNetwork,
            ok_response(12_900, &[("M", in_stock())]),
        ],
    );

    let cached = CachedProvider::new(inner.clone(), Duration::from_secs(60));

    assert!(cached.fetch("p1", "tr").await.is_err());
    // The failure was not cached; the next lookup reaches upstream.
    assert!(cached.fetch("p1", "tr").await.is_ok());
    assert_eq!(inner.calls("p1"), 2);
    Ok(())
}

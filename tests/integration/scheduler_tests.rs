use std::sync::Arc;
use std::time::Duration;

use restock_watcher::AppConfig;
use restock_watcher::evaluator::TransitionKind;
use restock_watcher::models::TrackedItem;
use restock_watcher::repository::Repository;
use restock_watcher::scheduler::{PollScheduler, SchedulerHandle};

use super::*;

struct Fixture {
    repository: Arc<Repository>,
    provider: Arc<ScriptedProvider>,
    dispatcher: Arc<CollectingDispatcher>,
    handle: SchedulerHandle,
}

async fn start_fixture(config: AppConfig) -> Fixture {
    let repository = Arc::new(Repository::in_memory().await.unwrap());
    let provider = Arc::new(ScriptedProvider::new());
    let dispatcher = Arc::new(CollectingDispatcher::default());

    let handle = PollScheduler::new(
        Arc::clone(&repository),
        provider.clone(),
        dispatcher.clone(),
        config,
    )
    .start();

    Fixture {
        repository,
        provider,
        dispatcher,
        handle,
    }
}

fn fast_config() -> AppConfig {
    test_config(std::path::Path::new("unused.db"))
}

async fn add_item(fixture: &Fixture, product_ref: &str, size: &str) -> TrackedItem {
    fixture
        .repository
        .create_item(new_item(product_ref, size))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_manual_check_coalesces_with_running_cycle() -> anyhow::Result<()> {
    let fixture = start_fixture(fast_config()).await;

    for product_ref in ["p1", "p2", "p3"] {
        fixture
            .provider
            .script(product_ref, vec![ok_response(12_900, &[("M", in_stock())])]);
        add_item(&fixture, product_ref, "M").await;
    }
    // One item is much slower than the others, keeping the cycle in flight.
    fixture.provider.set_delay("p2", Duration::from_millis(400));

    let first = {
        let handle = fixture.handle.clone();
        tokio::spawn(async move { handle.check_now().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Second request lands while the first cycle is still running.
    let second = fixture.handle.check_now().await?;
    let first = first.await??;

    // Both requests were satisfied by the same single cycle.
    assert_eq!(first, second);
    assert_eq!(first.attempted, 3);
    assert_eq!(first.succeeded, 3);

    // One cycle's worth of work per item: one fetch, one snapshot, one
    // price point.
    let items = fixture.repository.list_items().await?;
    for item in &items {
        assert_eq!(fixture.provider.calls(&item.product_ref), 1);
        assert!(
            fixture
                .repository
                .current_snapshot(&item.id)
                .await?
                .is_some()
        );
        assert_eq!(fixture.repository.price_history(&item.id, 10).await?.len(), 1);
    }

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_transient_failure_is_retried_exactly_to_bound() -> anyhow::Result<()> {
    let fixture = start_fixture(fast_config()).await;

    fixture
        .provider
        .script("flaky", vec![ScriptedResponse::TransientNetwork]);
    let item = add_item(&fixture, "flaky", "M").await;

    let summary = fixture.handle.check_now().await?;

    // Initial attempt plus retry_attempts (2), never more.
    assert_eq!(fixture.provider.calls("flaky"), 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 0);

    // A failed poll leaves no snapshot behind.
    assert!(fixture.repository.current_snapshot(&item.id).await?.is_none());

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_then_recovered() -> anyhow::Result<()> {
    let fixture = start_fixture(fast_config()).await;

    fixture.provider.script(
        "p1",
        vec![
            ScriptedResponse::RateLimited,
            ok_response(12_900, &[("M", in_stock())]),
        ],
    );
    let item = add_item(&fixture, "p1", "M").await;

    let summary = fixture.handle.check_now().await?;

    assert_eq!(fixture.provider.calls("p1"), 2);
    assert_eq!(summary.succeeded, 1);
    assert!(fixture.repository.current_snapshot(&item.id).await?.is_some());

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_not_found_flags_item_and_stops_polling_it() -> anyhow::Result<()> {
    let fixture = start_fixture(fast_config()).await;

    fixture.provider.script("gone", vec![ScriptedResponse::NotFound]);
    let item = add_item(&fixture, "gone", "M").await;

    let summary = fixture.handle.check_now().await?;
    assert_eq!(summary.invalid, 1);
    // NotFound is not retried.
    assert_eq!(fixture.provider.calls("gone"), 1);

    let stored = fixture.repository.get_item(&item.id).await?.unwrap();
    assert!(stored.invalid);

    // The flagged item is excluded from subsequent cycles.
    let summary = fixture.handle.check_now().await?;
    assert_eq!(summary.attempted, 0);
    assert_eq!(fixture.provider.calls("gone"), 1);

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_one_bad_item_does_not_block_others() -> anyhow::Result<()> {
    let fixture = start_fixture(fast_config()).await;

    fixture.provider.script("bad", vec![ScriptedResponse::Malformed]);
    fixture
        .provider
        .script("good", vec![ok_response(9_900, &[("L", in_stock())])]);
    let bad = add_item(&fixture, "bad", "M").await;
    let good = add_item(&fixture, "good", "L").await;

    let summary = fixture.handle.check_now().await?;

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.invalid, 0);

    // Malformed responses are not retried within the cycle.
    assert_eq!(fixture.provider.calls("bad"), 1);
    assert!(fixture.repository.current_snapshot(&good.id).await?.is_some());
    assert!(fixture.repository.current_snapshot(&bad.id).await?.is_none());

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_restock_dispatches_exactly_once() -> anyhow::Result<()> {
    let fixture = start_fixture(fast_config()).await;

    fixture.provider.script(
        "p1",
        vec![
            ok_response(12_900, &[("M", out_of_stock()), ("L", in_stock())]),
            ok_response(12_900, &[("M", in_stock()), ("L", in_stock())]),
        ],
    );
    let item = add_item(&fixture, "p1", "M").await;

    // First observation only establishes the baseline.
    let summary = fixture.handle.check_now().await?;
    assert_eq!(summary.transitions, 0);
    assert_eq!(fixture.dispatcher.count(), 0);

    // Second observation: the target size came back, price unchanged.
    let summary = fixture.handle.check_now().await?;
    assert_eq!(summary.transitions, 1);
    assert_eq!(summary.notifications_sent, 1);
    assert_eq!(summary.price_changes, 0);

    let alerts = fixture.dispatcher.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].target_size, "M");
    assert_eq!(alerts[0].price, 12_900);
    assert_eq!(alerts[0].transition.kind, TransitionKind::BecameAvailable);

    // Unchanged price appends nothing beyond the first point.
    assert_eq!(fixture.repository.price_history(&item.id, 10).await?.len(), 1);

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_out_of_stock_is_recorded_but_not_dispatched_by_default() -> anyhow::Result<()> {
    let fixture = start_fixture(fast_config()).await;

    fixture.provider.script(
        "p1",
        vec![
            ok_response(12_900, &[("M", in_stock())]),
            ok_response(12_900, &[("M", out_of_stock())]),
        ],
    );
    add_item(&fixture, "p1", "M").await;

    fixture.handle.check_now().await?;
    let summary = fixture.handle.check_now().await?;

    // Classified and counted, but no alert goes out.
    assert_eq!(summary.transitions, 1);
    assert_eq!(summary.notifications_sent, 0);
    assert_eq!(fixture.dispatcher.count(), 0);

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_out_of_stock_dispatches_when_configured() -> anyhow::Result<()> {
    let mut config = fast_config();
    config.notifications.notify_out_of_stock = true;
    let fixture = start_fixture(config).await;

    fixture.provider.script(
        "p1",
        vec![
            ok_response(12_900, &[("M", in_stock())]),
            ok_response(12_900, &[("M", out_of_stock())]),
        ],
    );
    add_item(&fixture, "p1", "M").await;

    fixture.handle.check_now().await?;
    fixture.handle.check_now().await?;

    let alerts = fixture.dispatcher.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].transition.kind, TransitionKind::WentOutOfStock);

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_price_drop_appends_history_without_transition() -> anyhow::Result<()> {
    let fixture = start_fixture(fast_config()).await;

    fixture.provider.script(
        "p1",
        vec![
            ok_response(12_900, &[("M", in_stock())]),
            ok_response(9_900, &[("M", in_stock())]),
        ],
    );
    let item = add_item(&fixture, "p1", "M").await;

    fixture.handle.check_now().await?;
    let summary = fixture.handle.check_now().await?;

    assert_eq!(summary.transitions, 0);
    assert_eq!(summary.price_changes, 1);

    let history = fixture.repository.price_history(&item.id, 10).await?;
    assert_eq!(
        history.iter().map(|p| p.price).collect::<Vec<_>>(),
        vec![9_900, 12_900]
    );

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_cycle_deadline_fails_unfinished_items() -> anyhow::Result<()> {
    let mut config = fast_config();
    config.scheduler.cycle_timeout_secs = 1;
    let fixture = start_fixture(config).await;

    fixture
        .provider
        .script("slow", vec![ok_response(12_900, &[("M", in_stock())])]);
    fixture.provider.set_delay("slow", Duration::from_secs(3));
    let item = add_item(&fixture, "slow", "M").await;

    let summary = fixture.handle.check_now().await?;

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 0);
    assert!(fixture.repository.current_snapshot(&item.id).await?.is_none());

    fixture.handle.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_set_interval_is_persisted() -> anyhow::Result<()> {
    let fixture = start_fixture(fast_config()).await;

    fixture
        .handle
        .set_interval(Duration::from_secs(900))
        .await?;
    // A follow-up command guarantees the previous one was processed.
    fixture.handle.check_now().await?;

    assert_eq!(
        fixture
            .repository
            .get_setting("poll_interval", "")
            .await?,
        "900"
    );

    fixture.handle.stop().await?;
    Ok(())
}

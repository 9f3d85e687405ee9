use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_retry::RetryIf;
use tracing::{debug, error, info, warn};

use crate::AppError;
use crate::config::{AppConfig, SchedulerConfig, parse_poll_interval};
use crate::evaluator::{self, TransitionKind};
use crate::models::TrackedItem;
use crate::notify::{NotificationDispatcher, StockAlert};
use crate::provider::StockProvider;
use crate::repository::Repository;
use crate::utils::error::ProviderError;

const INTERVAL_SETTING: &str = "poll_interval";

/// Aggregated result of one full sweep over the pollable items.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items flagged invalid this cycle because the product is gone.
    pub invalid: usize,
    pub transitions: usize,
    pub price_changes: usize,
    pub notifications_sent: usize,
}

/// Outcome of a single item's poll attempt, for per-item observability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded { retries: u32 },
    Failed { retries: u32, reason: String },
    PermanentlyInvalid,
}

struct ItemReport {
    outcome: ItemOutcome,
    transition: Option<TransitionKind>,
    price_recorded: bool,
    notified: bool,
}

impl ItemReport {
    fn failed(retries: u32, reason: String) -> Self {
        Self {
            outcome: ItemOutcome::Failed { retries, reason },
            transition: None,
            price_recorded: false,
            notified: false,
        }
    }
}

enum Command {
    CheckNow(oneshot::Sender<CycleSummary>),
    SetInterval(Duration),
    Stop(oneshot::Sender<()>),
}

/// Control handle for a running scheduler. UI-originated actions go through
/// this channel instead of touching scheduler state directly.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Requests an immediate sweep. If a cycle is already in flight the
    /// request coalesces onto it, and this resolves with that cycle's
    /// summary once it completes.
    pub async fn check_now(&self) -> crate::Result<CycleSummary> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::CheckNow(reply))
            .await
            .map_err(|_| AppError::Internal("scheduler is not running".into()))?;
        response
            .await
            .map_err(|_| AppError::Internal("scheduler stopped before the cycle completed".into()))
    }

    /// Changes the poll interval. Takes effect on the next wake, never
    /// retroactively.
    pub async fn set_interval(&self, interval: Duration) -> crate::Result<()> {
        self.commands
            .send(Command::SetInterval(interval))
            .await
            .map_err(|_| AppError::Internal("scheduler is not running".into()))
    }

    /// Stops the loop, letting any in-flight cycle finish its writes.
    pub async fn stop(&self) -> crate::Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Stop(reply))
            .await
            .map_err(|_| AppError::Internal("scheduler is not running".into()))?;
        response
            .await
            .map_err(|_| AppError::Internal("scheduler exited without confirming".into()))
    }
}

/// The orchestrating loop: owns timing, fan-out across tracked items,
/// per-item retry with backoff, and coalescing of manual check requests.
/// At most one cycle is in flight at any time, system-wide.
pub struct PollScheduler {
    repository: Arc<Repository>,
    provider: Arc<dyn StockProvider>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: AppConfig,
}

impl PollScheduler {
    pub fn new(
        repository: Arc<Repository>,
        provider: Arc<dyn StockProvider>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: AppConfig,
    ) -> Self {
        Self {
            repository,
            provider,
            dispatcher,
            config,
        }
    }

    /// Spawns the scheduling loop and returns its control handle.
    pub fn start(self) -> SchedulerHandle {
        let (commands, receiver) = mpsc::channel(16);
        tokio::spawn(self.run(receiver));
        SchedulerHandle { commands }
    }

    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        let mut poll_interval = self.initial_interval().await;
        info!(interval = ?poll_interval, "scheduler started");

        // The first timer-driven cycle runs one full interval after start.
        let mut ticker = new_ticker(poll_interval);

        let mut in_flight: Option<JoinHandle<CycleSummary>> = None;
        let mut waiters: Vec<oneshot::Sender<CycleSummary>> = Vec::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if in_flight.is_none() {
                        in_flight = Some(self.spawn_cycle());
                    } else {
                        debug!("poll tick while a cycle is in flight; coalescing");
                    }
                }

                result = join_in_flight(&mut in_flight) => {
                    in_flight = None;
                    let summary = match result {
                        Ok(summary) => summary,
                        Err(e) => {
                            error!(error = %e, "poll cycle task panicked");
                            CycleSummary::default()
                        }
                    };
                    for waiter in waiters.drain(..) {
                        let _ = waiter.send(summary.clone());
                    }
                }

                command = commands.recv() => match command {
                    Some(Command::CheckNow(reply)) => {
                        waiters.push(reply);
                        if in_flight.is_none() {
                            in_flight = Some(self.spawn_cycle());
                        } else {
                            debug!("manual check while a cycle is in flight; coalescing");
                        }
                    }
                    Some(Command::SetInterval(interval)) => {
                        poll_interval = interval;
                        ticker = new_ticker(poll_interval);
                        if let Err(e) = self
                            .repository
                            .set_setting(INTERVAL_SETTING, &interval.as_secs().to_string())
                            .await
                        {
                            warn!(error = %e, "could not persist poll interval");
                        }
                        info!(interval = ?interval, "poll interval updated");
                    }
                    Some(Command::Stop(reply)) => {
                        if let Some(handle) = in_flight.take() {
                            match handle.await {
                                Ok(summary) => {
                                    for waiter in waiters.drain(..) {
                                        let _ = waiter.send(summary.clone());
                                    }
                                }
                                Err(e) => error!(error = %e, "poll cycle task panicked"),
                            }
                        }
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        if let Some(handle) = in_flight.take() {
                            let _ = handle.await;
                        }
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    /// Configured interval, overridden by the persisted setting when one
    /// was saved from a previous run.
    async fn initial_interval(&self) -> Duration {
        let configured = self.config.scheduler.interval().unwrap_or_else(|e| {
            // Startup validation rejects bad intervals; this is a fallback.
            warn!(error = %e, "unparseable configured interval, using 5 minutes");
            Duration::from_secs(300)
        });

        match self.repository.get_setting(INTERVAL_SETTING, "").await {
            Ok(saved) if !saved.is_empty() => match parse_poll_interval(&saved) {
                Ok(interval) => interval,
                Err(e) => {
                    warn!(error = %e, "ignoring unparseable saved interval");
                    configured
                }
            },
            Ok(_) => configured,
            Err(e) => {
                warn!(error = %e, "could not read saved interval");
                configured
            }
        }
    }

    fn spawn_cycle(&self) -> JoinHandle<CycleSummary> {
        let repository = Arc::clone(&self.repository);
        let provider = Arc::clone(&self.provider);
        let dispatcher = Arc::clone(&self.dispatcher);
        let config = self.config.clone();

        tokio::spawn(async move { run_cycle(repository, provider, dispatcher, &config).await })
    }
}

async fn join_in_flight(
    in_flight: &mut Option<JoinHandle<CycleSummary>>,
) -> Result<CycleSummary, tokio::task::JoinError> {
    match in_flight.as_mut() {
        Some(handle) => handle.await,
        // Nothing in flight: park this branch so the others can progress.
        None => std::future::pending().await,
    }
}

fn new_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_cycle(
    repository: Arc<Repository>,
    provider: Arc<dyn StockProvider>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: &AppConfig,
) -> CycleSummary {
    let started = tokio::time::Instant::now();

    let items = match repository.list_pollable().await {
        Ok(items) => items,
        Err(e) => {
            error!(error = %e, "could not load tracked items, skipping cycle");
            return CycleSummary::default();
        }
    };

    let mut summary = CycleSummary {
        attempted: items.len(),
        ..CycleSummary::default()
    };

    if items.is_empty() {
        debug!("no pollable items, cycle is a no-op");
        return summary;
    }

    info!(items = items.len(), "poll cycle started");
    let deadline = started + config.scheduler.cycle_timeout();

    let mut reports = stream::iter(items.into_iter().map(|item| {
        let repository = Arc::clone(&repository);
        let provider = Arc::clone(&provider);
        let dispatcher = Arc::clone(&dispatcher);
        let config = config.clone();
        async move { poll_item(repository, provider, dispatcher, &config, item).await }
    }))
    .buffer_unordered(config.scheduler.max_concurrent_checks);

    loop {
        match tokio::time::timeout_at(deadline, reports.next()).await {
            Ok(Some(report)) => {
                match &report.outcome {
                    ItemOutcome::Succeeded { .. } => summary.succeeded += 1,
                    ItemOutcome::Failed { .. } => summary.failed += 1,
                    ItemOutcome::PermanentlyInvalid => summary.invalid += 1,
                }
                if report.transition.is_some() {
                    summary.transitions += 1;
                }
                if report.price_recorded {
                    summary.price_changes += 1;
                }
                if report.notified {
                    summary.notifications_sent += 1;
                }
            }
            Ok(None) => break,
            Err(_) => {
                // Unfinished items fail for this cycle and are picked up by
                // the next one.
                warn!("cycle deadline reached with items still in flight");
                break;
            }
        }
    }

    let completed = summary.succeeded + summary.failed + summary.invalid;
    if completed < summary.attempted {
        summary.failed += summary.attempted - completed;
    }

    info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed,
        invalid = summary.invalid,
        transitions = summary.transitions,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "poll cycle finished"
    );

    summary
}

async fn poll_item(
    repository: Arc<Repository>,
    provider: Arc<dyn StockProvider>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: &AppConfig,
    item: TrackedItem,
) -> ItemReport {
    let attempts = AtomicU32::new(0);
    let fetch = || {
        attempts.fetch_add(1, Ordering::Relaxed);
        provider.fetch(&item.product_ref, &item.region)
    };

    // Each item backs off independently; a retrying item only occupies its
    // own fan-out slot.
    let result = RetryIf::spawn(
        backoff_schedule(&config.scheduler),
        fetch,
        |e: &ProviderError| e.is_retryable(),
    )
    .await;
    let retries = attempts.load(Ordering::Relaxed).saturating_sub(1);

    let snapshot = match result {
        Ok(snapshot) => snapshot,
        Err(ProviderError::NotFound) => {
            warn!(item = %item.label, "product gone upstream, flagging item invalid");
            if let Err(e) = repository.mark_invalid(&item.id, true).await {
                error!(item = %item.label, error = %e, "could not flag item invalid");
            }
            return ItemReport {
                outcome: ItemOutcome::PermanentlyInvalid,
                transition: None,
                price_recorded: false,
                notified: false,
            };
        }
        Err(e) => {
            if retries > 0 {
                warn!(item = %item.label, retries, error = %e, "item poll retried then failed");
            } else {
                warn!(item = %item.label, error = %e, "item poll failed");
            }
            return ItemReport::failed(retries, e.to_string());
        }
    };

    let observation = match repository.record_observation(&item.id, &snapshot).await {
        Ok(observation) => observation,
        Err(e) => {
            // The prior snapshot stays authoritative for this item; the
            // rest of the cycle is unaffected.
            error!(item = %item.label, error = %e, "snapshot write failed");
            return ItemReport::failed(retries, format!("storage: {e}"));
        }
    };

    if !observation.snapshot_written {
        debug!(item = %item.label, "stale observation discarded");
        return ItemReport {
            outcome: ItemOutcome::Succeeded { retries },
            transition: None,
            price_recorded: false,
            notified: false,
        };
    }

    let transition = evaluator::evaluate(
        &item.id,
        &item.target_size,
        observation.previous.as_ref(),
        &snapshot,
    );

    let mut notified = false;
    if let Some(transition) = &transition {
        info!(
            item = %item.label,
            size = %transition.size,
            from = ?transition.from,
            to = ?transition.to,
            "stock transition"
        );

        let should_notify = match transition.kind {
            TransitionKind::BecameAvailable => true,
            TransitionKind::WentOutOfStock => config.notifications.notify_out_of_stock,
        };

        if should_notify {
            let alert = StockAlert {
                item_id: item.id.clone(),
                label: item.label.clone(),
                target_size: item.target_size.clone(),
                price: snapshot.price,
                currency: snapshot.currency.clone(),
                transition: transition.clone(),
            };
            dispatcher.dispatch(&alert).await;
            notified = true;
        }
    }

    if retries > 0 {
        info!(item = %item.label, retries, "item poll retried then succeeded");
    } else {
        debug!(item = %item.label, "item poll succeeded");
    }

    ItemReport {
        outcome: ItemOutcome::Succeeded { retries },
        transition: transition.map(|t| t.kind),
        price_recorded: observation.price_recorded,
        notified,
    }
}

/// Exponential backoff schedule: base, 2x base, 4x base, one entry per
/// allowed retry.
fn backoff_schedule(config: &SchedulerConfig) -> Vec<Duration> {
    (0..config.retry_attempts)
        .map(|attempt| {
            Duration::from_millis(config.retry_base_delay_ms.saturating_mul(1u64 << attempt))
        })
        .collect()
}

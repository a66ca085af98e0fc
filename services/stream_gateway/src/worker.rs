//! Per-topic polling workers.
//!
//! Exactly one worker runs per active topic, owned by the registry. The
//! worker resolves the topic fresh each cycle, fetches quotes through the
//! rate-limited source, merges them with holdings overlays, and hands the
//! payload back to the registry for fan-out. Every await point races the
//! shutdown channel, so cancellation wins immediately, including while
//! the worker is waiting on the registry guard inside `broadcast`.

use crate::directory::TopicDirectory;
use crate::registry::ConnectionRegistry;
use crate::source::PriceSource;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{PriceItem, PriceQuote, PriceUpdate, TopicId, TopicSnapshot};

/// The hours during which the upstream publishes live prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingWindow {
    /// Opening hour, UTC, inclusive.
    pub open_hour: u32,
    /// Closing hour, UTC, exclusive.
    pub close_hour: u32,
    pub weekdays_only: bool,
}

impl TradingWindow {
    fn contains(&self, now: DateTime<Utc>) -> bool {
        if self.weekdays_only && matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let hour = now.hour();
        self.open_hour <= hour && hour < self.close_hour
    }
}

/// Poll pacing, passed into worker construction. Plain data: deployments
/// differ only in what they put here, never in worker structure.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    pub trading: Duration,
    pub off_hours: Duration,
    /// `None` polls at the trading cadence around the clock.
    pub window: Option<TradingWindow>,
}

impl PollSchedule {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            trading: interval,
            off_hours: interval,
            window: None,
        }
    }

    /// The interval to sleep before the next cycle, given the current time.
    pub fn interval_at(&self, now: DateTime<Utc>) -> Duration {
        match &self.window {
            Some(window) if !window.contains(now) => self.off_hours,
            _ => self.trading,
        }
    }
}

/// Handle to one running poll loop. At most one exists per topic at any
/// instant; the registry's guard enforces that structurally.
pub(crate) struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    pub(crate) started_at: DateTime<Utc>,
}

impl WorkerHandle {
    pub(crate) fn spawn(
        topic: TopicId,
        registry: Arc<ConnectionRegistry>,
        directory: Arc<dyn TopicDirectory>,
        source: Arc<PriceSource>,
        schedule: PollSchedule,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = TopicWorker {
            topic,
            registry,
            directory,
            source,
            schedule,
        };
        let task = tokio::spawn(worker.run(shutdown_rx));
        Self {
            shutdown,
            task,
            started_at: Utc::now(),
        }
    }

    /// Request cancellation and wait for the loop to exit. Callers must
    /// await this before considering the topic empty; fire-and-forget
    /// teardown would allow a second worker to start while the first is
    /// still draining.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!("topic worker panicked during shutdown");
            }
        }
        debug!(uptime_secs = (Utc::now() - self.started_at).num_seconds(), "worker torn down");
    }
}

struct TopicWorker {
    topic: TopicId,
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn TopicDirectory>,
    source: Arc<PriceSource>,
    schedule: PollSchedule,
}

impl TopicWorker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, "topic worker started");
        loop {
            let interval = self.schedule.interval_at(Utc::now());
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.run_cycle() => {}
            }
        }
        info!(topic = %self.topic, "topic worker stopped");
    }

    /// One poll cycle. Nothing escapes this except cancellation;
    /// collaborator failures degrade to null fields or a skipped cycle.
    async fn run_cycle(&self) {
        // Fresh resolution every cycle; the directory releases its backing
        // resource before we return to sleep.
        let snapshot = match self.directory.resolve(self.topic).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "topic resolution failed; skipping cycle");
                return;
            }
        };

        let quotes = self.source.fetch(&snapshot.symbols).await;
        if quotes.is_empty() && !snapshot.symbols.is_empty() {
            // Total fetch failure still broadcasts: clients get an all-null
            // payload with a fresh timestamp rather than silence.
            debug!(topic = %self.topic, "no quotes this cycle; broadcasting null payload");
        }

        let update = build_update(self.topic, &snapshot, &quotes, Utc::now());
        self.registry.broadcast(self.topic, update).await;
    }
}

/// Merge one cycle's quotes with the topic's overlays into a payload.
/// Rows follow the snapshot's symbol order; symbols without a quote get
/// all-null value fields.
pub(crate) fn build_update(
    topic: TopicId,
    snapshot: &TopicSnapshot,
    quotes: &HashMap<String, PriceQuote>,
    timestamp: DateTime<Utc>,
) -> PriceUpdate {
    let items = snapshot
        .symbols
        .iter()
        .map(|symbol| {
            let overlay = snapshot.overlays.get(symbol);
            match quotes.get(symbol) {
                Some(quote) => {
                    let quantity = overlay.map(|o| o.quantity);
                    let market_value = quantity.map(|q| q * quote.price);
                    let unrealized_pnl = overlay.and_then(|o| {
                        o.cost_basis
                            .map(|basis| (quote.price - basis) * o.quantity)
                    });
                    PriceItem {
                        symbol: symbol.clone(),
                        price: Some(quote.price),
                        delta: Some(quote.delta),
                        delta_percent: Some(quote.delta_percent),
                        quantity,
                        market_value,
                        unrealized_pnl,
                    }
                }
                None => PriceItem {
                    quantity: overlay.map(|o| o.quantity),
                    ..PriceItem::unavailable(symbol.clone())
                },
            }
        })
        .collect();

    PriceUpdate {
        topic_id: topic,
        items,
        timestamp,
    }
}

//! Relay engine
//!
//! Polls each source chain for `TransferInitiated` events and submits the
//! matching `fulfill` on the other side of the route.
//!
//! # Delivery guarantees
//!
//! Within a process, a message id is acted on at most once: the shared
//! [`DeliveryTracker`] records every id that was observed, found already
//! fulfilled, or settled by this relayer. Across restarts the destination
//! contract is the source of truth. `isFulfilled` is consulted before every
//! submission and `fulfill` itself must reject a repeated message id, which
//! is what makes two relayers on the same key safe.
//!
//! # Deferred events
//!
//! An event that could not be settled (relayer balance below
//! `requiredNativeFee()`, reverted receipt, RPC error while handling it) is
//! moved to the route's deferred set. Deferred events are retried at the
//! start of a tick independently of the scan window, so advancing
//! `last_seen_block` never drops them. A fee shortfall is retried on the
//! next tick; each `Failed` attempt doubles the wait (see [`RetryPolicy`]).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::events::read_transfers;
use crate::hash::{bytes32_to_hex, MessageIdScheme};
use crate::ledger::{ChainEndpoint, FulfillmentSubmitter};
use crate::metrics::Metrics;
use crate::tracker::DeliveryTracker;
use crate::types::{ChainId, TransferEvent};

/// A one-directional relay path.
///
/// Without a submitter the route is observe-only: events are read and
/// recorded but nothing is sent.
#[derive(Clone)]
pub struct Route {
    pub source: ChainEndpoint,
    pub destination: ChainEndpoint,
    pub submitter: Option<Arc<dyn FulfillmentSubmitter>>,
}

impl Route {
    pub fn label(&self) -> String {
        format!("{}->{}", self.source.chain_id, self.destination.chain_id)
    }
}

/// What the relay did with one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayOutcome {
    /// Already handled earlier in this process
    AlreadySeen,
    /// Recorded without submitting (no signing identity)
    Observed,
    /// Destination reports the id as fulfilled
    AlreadyFulfilled,
    /// Relayer balance below the required fee; deferred
    InsufficientFunds,
    /// Fulfillment confirmed on the destination
    Settled,
    /// Reverted receipt or RPC error; deferred
    Failed,
}

impl RelayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::AlreadySeen => "already_seen",
            RelayOutcome::Observed => "observed",
            RelayOutcome::AlreadyFulfilled => "already_fulfilled",
            RelayOutcome::InsufficientFunds => "insufficient_funds",
            RelayOutcome::Settled => "settled",
            RelayOutcome::Failed => "failed",
        }
    }

    /// Whether the event stays queued for another attempt
    pub fn is_deferred(&self) -> bool {
        matches!(self, RelayOutcome::InsufficientFunds | RelayOutcome::Failed)
    }
}

/// Result of one tick on one route
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    /// Scanned range, `None` if the scan did not happen
    pub scanned: Option<(u64, u64)>,
    /// Outcomes in processing order: deferred retries first, then new events
    pub outcomes: Vec<([u8; 32], RelayOutcome)>,
    /// Set when the route aborted before finishing its scan
    pub error: Option<String>,
}

impl TickReport {
    pub fn count(&self, outcome: RelayOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

/// Backoff for reverted or erroring fulfillments, counted in ticks.
///
/// Fee shortfalls are retried every tick since they cost no gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on the wait between two attempts
    pub max_backoff_ticks: u64,
    /// Failed attempts after which every further failure is logged at error
    pub alert_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_backoff_ticks: 32,
            alert_after: 5,
        }
    }
}

impl RetryPolicy {
    /// Ticks to wait after the given failed attempt (1-indexed): 1, 2, 4, ...
    pub fn backoff_ticks(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(63);
        (1u64 << exp).min(self.max_backoff_ticks.max(1))
    }

    pub fn should_alert(&self, attempt: u32) -> bool {
        attempt >= self.alert_after
    }
}

/// Relay settings shared by all routes
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub scheme: MessageIdScheme,
    /// Maximum lookback in blocks
    pub window: u64,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

/// Relay progress shared with the HTTP server
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    pub ticks: u64,
    /// Last scanned block by source chain id
    pub last_scanned_block: BTreeMap<ChainId, u64>,
    pub settled: u64,
    pub observed: u64,
    pub deferred: usize,
    pub tracked: usize,
}

pub type SharedRelayStats = Arc<RwLock<RelayStats>>;

/// An event waiting for another delivery attempt
#[derive(Debug, Clone)]
struct DeferredEvent {
    event: TransferEvent,
    /// Consecutive `Failed` outcomes
    failures: u32,
    /// First worker tick at which the event is tried again
    retry_at_tick: u64,
}

struct RouteWorker {
    route: Route,
    last_seen_block: u64,
    ticks: u64,
    deferred: HashMap<[u8; 32], DeferredEvent>,
}

/// Borrowed state every route needs during a tick
struct TickContext<'a> {
    settings: &'a RelaySettings,
    tracker: &'a DeliveryTracker,
    metrics: &'a Metrics,
}

pub struct Relayer {
    workers: Vec<RouteWorker>,
    settings: RelaySettings,
    tracker: DeliveryTracker,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    stats: Option<SharedRelayStats>,
}

impl Relayer {
    pub fn new(
        routes: Vec<Route>,
        settings: RelaySettings,
        tracker: DeliveryTracker,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        for route in &routes {
            if route.submitter.is_none() {
                warn!(
                    route = %route.label(),
                    "No relayer key configured, route is observe-only"
                );
            }
        }

        Self {
            workers: routes
                .into_iter()
                .map(|route| RouteWorker {
                    route,
                    last_seen_block: 0,
                    ticks: 0,
                    deferred: HashMap::new(),
                })
                .collect(),
            settings,
            tracker,
            metrics,
            clock,
            stats: None,
        }
    }

    /// Publish progress after every tick.
    pub fn with_stats(mut self, stats: SharedRelayStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    /// Last scanned block per route, in route order
    pub fn last_seen_blocks(&self) -> Vec<u64> {
        self.workers.iter().map(|w| w.last_seen_block).collect()
    }

    /// Number of deferred events per route, in route order
    pub fn deferred_counts(&self) -> Vec<usize> {
        self.workers.iter().map(|w| w.deferred.len()).collect()
    }

    /// Consecutive failed attempts per deferred event, per route
    pub fn deferred_failures(&self) -> Vec<Vec<u32>> {
        self.workers
            .iter()
            .map(|w| w.deferred.values().map(|d| d.failures).collect())
            .collect()
    }

    /// Run until a shutdown signal is received.
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(
            routes = self.workers.len(),
            scheme = %self.settings.scheme,
            window = self.settings.window,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Relay starting"
        );

        let clock = Arc::clone(&self.clock);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = clock.sleep(self.settings.poll_interval) => {
                    let started = clock.now();
                    let reports = self.tick().await;
                    debug!(
                        routes = reports.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Tick complete"
                    );
                }
            }
        }

        Ok(())
    }

    /// Process every route once. Never fails: route errors are logged and
    /// reported in the returned [`TickReport`]s.
    pub async fn tick(&mut self) -> Vec<TickReport> {
        let ctx = TickContext {
            settings: &self.settings,
            tracker: &self.tracker,
            metrics: &self.metrics,
        };

        let reports = join_all(self.workers.iter_mut().map(|w| w.tick(&ctx))).await;

        self.metrics
            .relay_tracked_messages
            .set(self.tracker.len() as i64);

        if let Some(stats) = &self.stats {
            let mut stats = stats.write().await;
            stats.ticks += 1;
            for report in &reports {
                if let Some((_, to_block)) = report.scanned {
                    stats
                        .last_scanned_block
                        .insert(report.source_chain, to_block);
                }
                stats.settled += report.count(RelayOutcome::Settled) as u64;
                stats.observed += report.count(RelayOutcome::Observed) as u64;
            }
            stats.deferred = self.workers.iter().map(|w| w.deferred.len()).sum();
            stats.tracked = self.tracker.len();
        }

        reports
    }
}

impl RouteWorker {
    async fn tick(&mut self, ctx: &TickContext<'_>) -> TickReport {
        let label = self.route.label();
        self.ticks += 1;
        let mut report = TickReport {
            source_chain: self.route.source.chain_id,
            destination_chain: self.route.destination.chain_id,
            ..Default::default()
        };

        self.retry_deferred(ctx, &mut report).await;

        if let Err(e) = self.scan(ctx, &mut report).await {
            error!(route = %label, error = %e, "Route scan failed");
            ctx.metrics
                .relay_tick_errors_total
                .with_label_values(&[&self.route.source.chain_id.to_string()])
                .inc();
            report.error = Some(e.to_string());
        }

        ctx.metrics
            .relay_deferred
            .with_label_values(&[&label])
            .set(self.deferred.len() as i64);
        report
    }

    async fn retry_deferred(&mut self, ctx: &TickContext<'_>, report: &mut TickReport) {
        if self.deferred.is_empty() {
            return;
        }
        let Some(submitter) = self.route.submitter.clone() else {
            return;
        };

        let tick = self.ticks;
        let pending: Vec<([u8; 32], TransferEvent)> = self
            .deferred
            .iter()
            .filter(|(_, d)| d.retry_at_tick <= tick)
            .map(|(id, d)| (*id, d.event.clone()))
            .collect();
        if pending.is_empty() {
            return;
        }

        debug!(
            route = %self.route.label(),
            count = pending.len(),
            waiting = self.deferred.len() - pending.len(),
            "Retrying deferred events"
        );

        for (id, event) in pending {
            let outcome = if ctx.tracker.contains(&id) {
                RelayOutcome::AlreadySeen
            } else {
                self.deliver(ctx, submitter.as_ref(), &event, id).await
            };

            if outcome.is_deferred() {
                self.defer(ctx, id, event, outcome);
            } else {
                self.deferred.remove(&id);
            }
            record(ctx, report, id, outcome);
        }
    }

    /// Queue or requeue an event after a deferred outcome.
    fn defer(
        &mut self,
        ctx: &TickContext<'_>,
        id: [u8; 32],
        event: TransferEvent,
        outcome: RelayOutcome,
    ) {
        let tick = self.ticks;
        let policy = ctx.settings.retry;
        let entry = self.deferred.entry(id).or_insert(DeferredEvent {
            event,
            failures: 0,
            retry_at_tick: tick,
        });

        if outcome != RelayOutcome::Failed {
            entry.retry_at_tick = tick + 1;
            return;
        }

        entry.failures += 1;
        let wait = policy.backoff_ticks(entry.failures);
        entry.retry_at_tick = tick + wait;

        if policy.should_alert(entry.failures) {
            error!(
                message_id = %bytes32_to_hex(&id),
                route = %self.route.label(),
                failures = entry.failures,
                next_retry_in_ticks = wait,
                "Fulfillment keeps failing, needs attention"
            );
        }
    }

    async fn scan(&mut self, ctx: &TickContext<'_>, report: &mut TickReport) -> Result<()> {
        let source = &self.route.source;
        let current = source.ledger.block_number().await?;
        let from_block = self
            .last_seen_block
            .max(current.saturating_sub(ctx.settings.window));

        let events = read_transfers(
            source.ledger.as_ref(),
            source.contract,
            source.chain_id,
            from_block,
            current,
        )
        .await?;

        if !events.is_empty() {
            debug!(
                route = %self.route.label(),
                from_block,
                to_block = current,
                count = events.len(),
                "Found transfer events"
            );
            ctx.metrics
                .relay_events_seen_total
                .with_label_values(&[&source.chain_id.to_string()])
                .inc_by(events.len() as u64);
        }

        let destination_chain = self.route.destination.chain_id;
        for event in events {
            let id = event.message_id(ctx.settings.scheme, destination_chain);

            if ctx.tracker.contains(&id) {
                record(ctx, report, id, RelayOutcome::AlreadySeen);
                continue;
            }
            if self.deferred.contains_key(&id) {
                // Handled by the retry pass at the start of this tick
                continue;
            }

            let outcome = match self.route.submitter.clone() {
                None => {
                    ctx.tracker.insert(id);
                    info!(
                        message_id = %bytes32_to_hex(&id),
                        nonce = %event.nonce,
                        tx_hash = %event.tx_hash,
                        "Observed transfer (observe-only)"
                    );
                    RelayOutcome::Observed
                }
                Some(submitter) => self.deliver(ctx, submitter.as_ref(), &event, id).await,
            };

            if outcome.is_deferred() {
                self.defer(ctx, id, event, outcome);
            }
            record(ctx, report, id, outcome);
        }

        report.scanned = Some((from_block, current));
        self.last_seen_block = current;
        ctx.metrics
            .relay_last_scanned_block
            .with_label_values(&[&self.route.source.chain_id.to_string()])
            .set(current as i64);
        Ok(())
    }

    /// Check, fund, submit and confirm one fulfillment. Errors are folded
    /// into [`RelayOutcome::Failed`].
    async fn deliver(
        &self,
        ctx: &TickContext<'_>,
        submitter: &dyn FulfillmentSubmitter,
        event: &TransferEvent,
        id: [u8; 32],
    ) -> RelayOutcome {
        match self.try_deliver(ctx, submitter, event, id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    message_id = %bytes32_to_hex(&id),
                    route = %self.route.label(),
                    error = %e,
                    "Fulfillment attempt failed, will retry"
                );
                RelayOutcome::Failed
            }
        }
    }

    async fn try_deliver(
        &self,
        ctx: &TickContext<'_>,
        submitter: &dyn FulfillmentSubmitter,
        event: &TransferEvent,
        id: [u8; 32],
    ) -> Result<RelayOutcome> {
        let dest = &self.route.destination;
        let id_hex = bytes32_to_hex(&id);

        if dest.ledger.is_fulfilled(dest.contract, id).await? {
            debug!(message_id = %id_hex, "Already fulfilled on destination");
            ctx.tracker.insert(id);
            return Ok(RelayOutcome::AlreadyFulfilled);
        }

        let fee = dest.ledger.required_native_fee(dest.contract).await?;
        let balance = dest.ledger.native_balance(submitter.address()).await?;
        if balance < fee {
            warn!(
                message_id = %id_hex,
                relayer = %submitter.address(),
                balance = %balance,
                required_fee = %fee,
                "Relayer balance below required fee, deferring"
            );
            return Ok(RelayOutcome::InsufficientFunds);
        }

        info!(
            message_id = %id_hex,
            to = %event.to,
            amount = %event.amount_out,
            nonce = %event.nonce,
            "Submitting fulfillment"
        );

        let receipt = submitter
            .fulfill(dest.contract, event.to, event.amount_out, id, fee)
            .await?;

        if receipt.success {
            ctx.metrics
                .fulfillments_submitted_total
                .with_label_values(&["success"])
                .inc();
            ctx.tracker.insert(id);
            info!(message_id = %id_hex, tx_hash = %receipt.tx_hash, "Fulfillment confirmed");
            Ok(RelayOutcome::Settled)
        } else {
            ctx.metrics
                .fulfillments_submitted_total
                .with_label_values(&["reverted"])
                .inc();
            warn!(
                message_id = %id_hex,
                tx_hash = %receipt.tx_hash,
                "Fulfillment reverted, will retry"
            );
            Ok(RelayOutcome::Failed)
        }
    }
}

fn record(ctx: &TickContext<'_>, report: &mut TickReport, id: [u8; 32], outcome: RelayOutcome) {
    ctx.metrics
        .relay_outcomes_total
        .with_label_values(&[outcome.as_str()])
        .inc();
    report.outcomes.push((id, outcome));
}

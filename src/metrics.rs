//! Prometheus metrics
//!
//! One [`Metrics`] value owns its registry and is shared through an `Arc`
//! between the relay task and the HTTP server. Nothing is registered
//! globally, so independent instances can coexist in tests.

use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

pub struct Metrics {
    /// Transfer events read from a source chain, by source chain id
    pub relay_events_seen_total: IntCounterVec,
    /// Per-event relay outcomes, by outcome name
    pub relay_outcomes_total: IntCounterVec,
    /// Fulfillment transactions sent, by receipt status
    pub fulfillments_submitted_total: IntCounterVec,
    /// Ticks that aborted before finishing a route, by source chain id
    pub relay_tick_errors_total: IntCounterVec,
    /// Events waiting for a retry, by route
    pub relay_deferred: IntGaugeVec,
    /// Last block scanned, by source chain id
    pub relay_last_scanned_block: IntGaugeVec,
    /// Entries in the delivery tracker
    pub relay_tracked_messages: IntGauge,
    /// Attestation requests, by result code
    pub attestations_total: IntCounterVec,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let relay_events_seen_total = IntCounterVec::new(
            Opts::new(
                "ferry_relay_events_seen_total",
                "Total TransferInitiated events read from source chains",
            ),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let relay_outcomes_total = IntCounterVec::new(
            Opts::new(
                "ferry_relay_outcomes_total",
                "Relay decisions per event, by outcome",
            ),
            &["outcome"],
        )
        .expect("constant metric name is valid");

        let fulfillments_submitted_total = IntCounterVec::new(
            Opts::new(
                "ferry_fulfillments_submitted_total",
                "Fulfillment transactions sent, by receipt status",
            ),
            &["status"],
        )
        .expect("constant metric name is valid");

        let relay_tick_errors_total = IntCounterVec::new(
            Opts::new(
                "ferry_relay_tick_errors_total",
                "Route scans aborted by an RPC error",
            ),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let relay_deferred = IntGaugeVec::new(
            Opts::new(
                "ferry_relay_deferred",
                "Events waiting for a fulfillment retry",
            ),
            &["route"],
        )
        .expect("constant metric name is valid");

        let relay_last_scanned_block = IntGaugeVec::new(
            Opts::new(
                "ferry_relay_last_scanned_block",
                "Last source block scanned by the relay",
            ),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let relay_tracked_messages = IntGauge::new(
            "ferry_relay_tracked_messages",
            "Message ids recorded as handled in this process",
        )
        .expect("constant metric name is valid");

        let attestations_total = IntCounterVec::new(
            Opts::new(
                "ferry_attestations_total",
                "Attestation requests, by result code",
            ),
            &["result"],
        )
        .expect("constant metric name is valid");

        // Names are unique constants and registration happens once per registry
        registry
            .register(Box::new(relay_events_seen_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(relay_outcomes_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(fulfillments_submitted_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(relay_tick_errors_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(relay_deferred.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(relay_last_scanned_block.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(relay_tracked_messages.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(attestations_total.clone()))
            .expect("metric registration must not be called twice");

        Self {
            relay_events_seen_total,
            relay_outcomes_total,
            fulfillments_submitted_total,
            relay_tick_errors_total,
            relay_deferred,
            relay_last_scanned_block,
            relay_tracked_messages,
            attestations_total,
            registry,
        }
    }
}

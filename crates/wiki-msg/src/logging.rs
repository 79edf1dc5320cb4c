//! ---
//! wiki_section: "02-messaging-bus"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Address-routed bus, envelopes and codecs."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use serde::Serialize;
use tracing::debug;

use crate::types::Envelope;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Envelope handed to the bus by a sender.
    Outbound,
    /// Envelope picked up by an event loop.
    Inbound,
    /// Answer routed back to a pending request.
    Reply,
}

/// Emit a structured log entry for message activity.
pub fn log_message(direction: MessageDirection, envelope: &Envelope) {
    debug!(
        message_id = %envelope.id,
        address = %envelope.address,
        timestamp = %envelope.timestamp,
        body = envelope.body.kind(),
        action = envelope.header("action").unwrap_or("-"),
        expects_reply = envelope.reply_address.is_some(),
        direction = ?direction,
        "bus activity"
    );
}

/// Point-in-time copy of the bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Envelopes accepted by [`crate::Bus`] for delivery.
    pub sent: u64,
    /// Envelopes handed to a handler.
    pub delivered: u64,
    /// Envelopes discarded for lack of a handler or mailbox space.
    pub dropped: u64,
    /// Successful replies matched to a pending request.
    pub replies: u64,
    /// Failure replies matched to a pending request.
    pub failures: u64,
    /// Requests that hit their deadline.
    pub timeouts: u64,
    /// Replies that arrived after their request was gone.
    pub late_replies: u64,
}

/// Prometheus metric handles for bus activity.
///
/// Every bus owns its own registry so several buses (as in tests) never
/// collide on metric names.
#[derive(Clone)]
pub struct BusMetrics {
    registry: Registry,
    sent: IntCounter,
    delivered: IntCounter,
    dropped: IntCounter,
    replies: IntCounter,
    failures: IntCounter,
    timeouts: IntCounter,
    late_replies: IntCounter,
    latency: Histogram,
}

impl std::fmt::Debug for BusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusMetrics")
            .field("stats", &self.snapshot())
            .finish()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl BusMetrics {
    /// Create the metric set inside a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let sent = counter(&registry, "bus_messages_sent_total", "Envelopes accepted for delivery")?;
        let delivered = counter(
            &registry,
            "bus_messages_delivered_total",
            "Envelopes handed to a handler",
        )?;
        let dropped = counter(
            &registry,
            "bus_messages_dropped_total",
            "Envelopes discarded without a handler",
        )?;
        let replies = counter(&registry, "bus_replies_total", "Replies matched to a request")?;
        let failures = counter(
            &registry,
            "bus_reply_failures_total",
            "Failure replies matched to a request",
        )?;
        let timeouts = counter(&registry, "bus_request_timeouts_total", "Requests that timed out")?;
        let late_replies = counter(
            &registry,
            "bus_late_replies_total",
            "Replies discarded because the request had already finished",
        )?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            "bus_request_latency_seconds",
            "Observed latency between request and reply",
        ))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            registry,
            sent,
            delivered,
            dropped,
            replies,
            failures,
            timeouts,
            late_replies,
            latency,
        })
    }

    /// Registry holding the bus metrics, for exposition.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn observe_sent(&self) {
        self.sent.inc();
    }

    pub(crate) fn observe_delivered(&self) {
        self.delivered.inc();
    }

    pub(crate) fn observe_dropped(&self) {
        self.dropped.inc();
    }

    pub(crate) fn observe_reply(&self, success: bool) {
        if success {
            self.replies.inc();
        } else {
            self.failures.inc();
        }
    }

    pub(crate) fn observe_timeout(&self) {
        self.timeouts.inc();
    }

    pub(crate) fn observe_late_reply(&self) {
        self.late_replies.inc();
    }

    pub(crate) fn observe_latency(&self, duration: Duration) {
        self.latency.observe(duration.as_secs_f64());
    }

    /// Current counter values.
    pub fn snapshot(&self) -> BusStats {
        BusStats {
            sent: self.sent.get(),
            delivered: self.delivered.get(),
            dropped: self.dropped.get(),
            replies: self.replies.get(),
            failures: self.failures.get(),
            timeouts: self.timeouts.get(),
            late_replies: self.late_replies.get(),
        }
    }
}

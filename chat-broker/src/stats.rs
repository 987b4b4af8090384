//! Delivery statistics for a broker

use std::sync::atomic::{AtomicU64, Ordering};

/// Result of one attempt to hand a message to a recipient's inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The message was placed in the inbox
    Delivered,
    /// The inbox stayed full for the whole delivery timeout
    TimedOut,
    /// The inbox's receiver is gone
    Closed,
}

/// Live counters, updated by `send` callers and the event loop.
#[derive(Debug, Default)]
pub struct BrokerStats {
    enqueued: AtomicU64,
    rejected_sends: AtomicU64,
    dispatched: AtomicU64,
    delivered: AtomicU64,
    dropped_unknown_recipient: AtomicU64,
    delivery_timeouts: AtomicU64,
    delivery_closed: AtomicU64,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown_recipient(&self) {
        self.dropped_unknown_recipient.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Delivered => &self.delivered,
            DeliveryOutcome::TimedOut => &self.delivery_timeouts,
            DeliveryOutcome::Closed => &self.delivery_closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> BrokerStatsSnapshot {
        BrokerStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected_sends: self.rejected_sends.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_unknown_recipient: self.dropped_unknown_recipient.load(Ordering::Relaxed),
            delivery_timeouts: self.delivery_timeouts.load(Ordering::Relaxed),
            delivery_closed: self.delivery_closed.load(Ordering::Relaxed),
        }
    }
}

/// Broker-wide statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStatsSnapshot {
    /// Messages accepted by `send`/`try_send`
    pub enqueued: u64,
    /// Sends refused because the broker was shut down or closed
    pub rejected_sends: u64,
    /// Messages taken off the queue by the event loop
    pub dispatched: u64,
    /// Successful per-recipient deliveries
    pub delivered: u64,
    /// Direct messages whose recipient was not registered
    pub dropped_unknown_recipient: u64,
    /// Deliveries abandoned after the delivery timeout
    pub delivery_timeouts: u64,
    /// Deliveries to an inbox whose receiver was dropped
    pub delivery_closed: u64,
}

impl BrokerStatsSnapshot {
    /// Deliveries that did not reach their inbox
    pub fn failed_deliveries(&self) -> u64 {
        self.delivery_timeouts + self.delivery_closed
    }
}

//! Broker configuration

use std::time::Duration;

/// Inbound queue size used when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// How long a single delivery may wait on a full inbox before it is dropped.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// What the registry does with a channel displaced by re-registering a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationPolicy {
    /// Drop the old sender, closing the previous session's inbox.
    #[default]
    ClosePrevious,
    /// Hand the old sender back to the caller of `register`.
    ReturnPrevious,
}

/// Broker configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Capacity of the inbound queue; senders wait once it is full
    pub queue_capacity: usize,

    /// Per-recipient bound on a blocked delivery
    pub delivery_timeout: Duration,

    /// Handling of re-registered user IDs
    pub registration_policy: RegistrationPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            registration_policy: RegistrationPolicy::default(),
        }
    }
}

impl BrokerConfig {
    /// Set the inbound queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the per-recipient delivery timeout
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Set the re-registration policy
    pub fn registration_policy(mut self, policy: RegistrationPolicy) -> Self {
        self.registration_policy = policy;
        self
    }
}

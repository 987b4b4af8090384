use thiserror::Error;

/// Errors surfaced to callers of the broker.
///
/// Dropped deliveries (unknown recipient, stalled or departed consumer) are
/// not errors; they only show up in logs and [`crate::stats::BrokerStats`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker shut down")]
    ShutDown,
    #[error("broker queue closed")]
    Closed,
    #[error("broker queue is full")]
    QueueFull,
    #[error("broker event loop already started")]
    AlreadyRunning,
}

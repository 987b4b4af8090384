//! In-process chat message broker.
//!
//! Sessions register a user ID together with the sending half of a bounded
//! Tokio channel; producers hand messages to the broker, whose single event
//! loop delivers them to one recipient or to every registered user.
//!
//! - [`broker`] owns the inbound queue, the event loop and its lifecycle.
//! - [`registry`] maps user IDs to delivery channels behind a read/write lock.
//! - [`message`] defines the routed [`Message`] and channel aliases.
//! - [`shutdown`] is the process-wide cancellation handle both sides observe.
//! - [`config`] and [`stats`] hold tuning knobs and delivery counters.
//! - [`cli`] and [`session`] drive the local terminal demo binary.

pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod message;
pub mod registry;
pub mod session;
pub mod shutdown;
pub mod stats;

pub use broker::{Broker, BrokerState};
pub use config::{BrokerConfig, RegistrationPolicy};
pub use error::BrokerError;
pub use message::{DeliverySender, Inbox, Message, UserId, WeakDeliverySender, inbox};
pub use registry::UserRegistry;
pub use shutdown::Shutdown;
pub use stats::{BrokerStatsSnapshot, DeliveryOutcome};

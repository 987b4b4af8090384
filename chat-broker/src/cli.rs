use std::time::Duration;

use clap::Parser;

use crate::config::{BrokerConfig, RegistrationPolicy};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Comma-separated users to register with the broker.
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [String::from("alice"), String::from("bob")]
    )]
    pub users: Vec<String>,

    /// User that lines read from stdin are sent as. Defaults to the first user.
    #[arg(long = "as")]
    pub sender: Option<String>,

    /// Capacity of the broker's inbound queue.
    #[arg(long, default_value_t = crate::config::DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Milliseconds a delivery may wait on a full inbox before it is dropped.
    #[arg(long, default_value_t = 1000)]
    pub delivery_timeout_ms: u64,

    /// Capacity of each user's inbox.
    #[arg(long, default_value_t = 16)]
    pub inbox_capacity: usize,

    /// Hand displaced channels back on re-registration instead of closing them.
    #[arg(long)]
    pub return_previous: bool,
}

impl Cli {
    pub fn broker_config(&self) -> BrokerConfig {
        let policy = if self.return_previous {
            RegistrationPolicy::ReturnPrevious
        } else {
            RegistrationPolicy::ClosePrevious
        };

        BrokerConfig::default()
            .queue_capacity(self.queue_capacity)
            .delivery_timeout(Duration::from_millis(self.delivery_timeout_ms))
            .registration_policy(policy)
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender
            .as_deref()
            .or_else(|| self.users.first().map(String::as_str))
    }
}

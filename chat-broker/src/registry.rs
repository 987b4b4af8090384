//! User registry
//!
//! Maps each registered user to the sending half of that user's delivery
//! channel. Registration and removal take the write lock; lookups and the
//! broadcast snapshot take the read lock. The lock only covers map access,
//! callers take weak handles out and deliver after it is released.
//!
//! The registry holds the only strong sender for each user, so removing an
//! entry always closes that user's inbox, whatever handles callers kept.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::RegistrationPolicy;
use crate::message::{DeliverySender, UserId, WeakDeliverySender};

/// Registry of connected users and their delivery channels.
pub struct UserRegistry {
    users: RwLock<HashMap<UserId, DeliverySender>>,
    policy: RegistrationPolicy,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::with_policy(RegistrationPolicy::default())
    }

    pub fn with_policy(policy: RegistrationPolicy) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Register `user_id`, replacing any channel it was registered with.
    ///
    /// Under [`RegistrationPolicy::ClosePrevious`] the displaced sender is
    /// dropped and `None` is returned. Under
    /// [`RegistrationPolicy::ReturnPrevious`] it is handed back untouched.
    /// The ID is not validated here.
    pub async fn register(
        &self,
        user_id: impl Into<UserId>,
        sender: DeliverySender,
    ) -> Option<DeliverySender> {
        let user_id = user_id.into();
        let previous = self.users.write().await.insert(user_id.clone(), sender);

        match (previous, self.policy) {
            (None, _) => {
                info!(user = %user_id, "user registered");
                None
            }
            (Some(previous), RegistrationPolicy::ReturnPrevious) => {
                info!(user = %user_id, "user re-registered, previous channel returned");
                Some(previous)
            }
            (Some(_), RegistrationPolicy::ClosePrevious) => {
                info!(user = %user_id, "user re-registered, previous channel closed");
                None
            }
        }
    }

    /// Remove `user_id` and close its channel.
    ///
    /// Returns `false` without touching the registry when the user is not
    /// registered.
    pub async fn unregister(&self, user_id: &str) -> bool {
        let removed = self.users.write().await.remove(user_id);

        match removed {
            Some(_) => {
                info!(user = %user_id, "user unregistered");
                true
            }
            None => {
                debug!(user = %user_id, "unregister ignored, user not registered");
                false
            }
        }
    }

    /// Weak handle to `user_id`'s channel. Upgrade it only for the send.
    pub async fn lookup(&self, user_id: &str) -> Option<WeakDeliverySender> {
        self.users.read().await.get(user_id).map(DeliverySender::downgrade)
    }

    /// Snapshot of every registered user, taken under a single read lock.
    pub async fn all(&self) -> Vec<(UserId, WeakDeliverySender)> {
        self.users
            .read()
            .await
            .iter()
            .map(|(id, sender)| (id.clone(), sender.downgrade()))
            .collect()
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.users.read().await.contains_key(user_id)
    }

    pub async fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.users.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

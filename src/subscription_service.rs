use std::sync::Arc;

use crate::domain::SubscriberEmail;
use crate::store::{AddOutcome, RemoveOutcome, StoreError, SubscriberStore};
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum SubscriptionError {
    #[error("{0}")]
    ValidationError(String),
    #[error("Email already subscribed.")]
    AlreadySubscribed,
    #[error("Email not found.")]
    NotFound,
    #[error("Service unavailable.")]
    StoreError(#[from] StoreError),
}

impl std::fmt::Debug for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Subscribed,
    NotSubscribed,
}

/// Subscribe, unsubscribe and check requests on top of a [`SubscriberStore`].
///
/// Holds no state of its own. Input is validated before the store is
/// touched, and store failures are always surfaced as
/// [`SubscriptionError::StoreError`].
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn SubscriberStore>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn SubscriberStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(name = "Adding new subscriber", skip(self))]
    pub async fn subscribe(&self, email: Option<String>) -> Result<(), SubscriptionError> {
        let email = SubscriberEmail::parse(email.unwrap_or_default())
            .map_err(SubscriptionError::ValidationError)?;
        match self.store.add(&email).await? {
            AddOutcome::Added => Ok(()),
            AddOutcome::AlreadyExists => Err(SubscriptionError::AlreadySubscribed),
        }
    }

    #[tracing::instrument(name = "Removing subscriber", skip(self))]
    pub async fn unsubscribe(&self, email: String) -> Result<(), SubscriptionError> {
        let email = SubscriberEmail::lookup(email);
        match self.store.remove(&email).await? {
            RemoveOutcome::Removed => Ok(()),
            RemoveOutcome::NotFound => Err(SubscriptionError::NotFound),
        }
    }

    #[tracing::instrument(name = "Checking subscription", skip(self))]
    pub async fn check(&self, email: String) -> Result<SubscriptionStatus, SubscriptionError> {
        let email = SubscriberEmail::lookup(email);
        if self.store.exists(&email).await? {
            Ok(SubscriptionStatus::Subscribed)
        } else {
            Ok(SubscriptionStatus::NotSubscribed)
        }
    }
}

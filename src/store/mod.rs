//! Durable storage for the set of subscribed addresses.
//!
//! Every backend implements [`SubscriberStore`]. Callers hold a single
//! instance for the lifetime of the process: `open` it at startup, share it
//! behind an `Arc`, and `close` it on shutdown.

mod document;
mod file;

use std::sync::Arc;

use async_trait::async_trait;

use crate::configuration::{StorageBackend, StorageSettings};
use crate::domain::SubscriberEmail;
use crate::utils::error_chain_fmt;

pub use document::DocumentBackend;
pub use file::FileBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("Subscriber storage is unavailable.")]
    StorageUnavailable(#[source] anyhow::Error),
    #[error("Persisted subscriber state is corrupt.")]
    CorruptState(#[source] anyhow::Error),
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Membership operations over the subscriber set.
///
/// `add` and `remove` are atomic with respect to each other on the same
/// instance: concurrent `add` calls for one address yield exactly one
/// [`AddOutcome::Added`].
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Prepares the medium. Safe to call more than once.
    async fn open(&self) -> Result<(), StoreError>;

    async fn exists(&self, email: &SubscriberEmail) -> Result<bool, StoreError>;

    async fn add(&self, email: &SubscriberEmail) -> Result<AddOutcome, StoreError>;

    async fn remove(&self, email: &SubscriberEmail) -> Result<RemoveOutcome, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

/// Builds the backend selected in configuration. Nothing is touched on the
/// medium until [`SubscriberStore::open`] or the first operation.
pub fn build_store(settings: &StorageSettings) -> Arc<dyn SubscriberStore> {
    match settings.backend {
        StorageBackend::File => Arc::new(FileBackend::new(settings.file.path.clone())),
        StorageBackend::Document => Arc::new(DocumentBackend::new(settings.document.clone())),
    }
}

use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use secrecy::ExposeSecret;
use tokio::sync::OnceCell;

use super::{AddOutcome, RemoveOutcome, StoreError, SubscriberStore};
use crate::configuration::DocumentStorageSettings;
use crate::domain::SubscriberEmail;

const EMAIL_INDEX_NAME: &str = "idx_email_unique";

struct Connection {
    client: Client,
    subscribers: Collection<Document>,
}

/// Keeps one `{ "email": ... }` document per subscriber in a MongoDB
/// collection.
///
/// Uniqueness is enforced by a unique index on `email`, so `add` is a single
/// insert that either succeeds or fails with a duplicate-key error. The
/// connection is established once, on `open` or on first use, and shared by
/// every operation afterwards.
pub struct DocumentBackend {
    settings: DocumentStorageSettings,
    connection: OnceCell<Connection>,
    connection_attempts: AtomicUsize,
}

impl DocumentBackend {
    pub fn new(settings: DocumentStorageSettings) -> Self {
        Self {
            settings,
            connection: OnceCell::new(),
            connection_attempts: AtomicUsize::new(0),
        }
    }

    async fn connection(&self) -> Result<&Connection, StoreError> {
        self.connection.get_or_try_init(|| self.connect()).await
    }

    #[tracing::instrument(
        name = "Connecting to MongoDB",
        skip(self),
        fields(
            database = %self.settings.database_name,
            collection = %self.settings.collection,
            attempt = tracing::field::Empty,
        )
    )]
    async fn connect(&self) -> Result<Connection, StoreError> {
        let attempt = self.connection_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("attempt", attempt);
        let mut options = ClientOptions::parse(self.settings.uri.expose_secret())
            .await
            .context("Failed to parse the MongoDB connection string.")
            .map_err(StoreError::StorageUnavailable)?;
        options.app_name = Some("newsletter".to_string());
        options.connect_timeout = Some(self.settings.connect_timeout());
        options.server_selection_timeout = Some(self.settings.connect_timeout());

        let client = Client::with_options(options)
            .context("Failed to build the MongoDB client.")
            .map_err(StoreError::StorageUnavailable)?;
        let database = client.database(&self.settings.database_name);

        self.timed(database.run_command(doc! { "ping": 1 }))
            .await?
            .context("MongoDB did not answer ping.")
            .map_err(StoreError::StorageUnavailable)?;

        let subscribers = database.collection::<Document>(&self.settings.collection);
        let index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .name(EMAIL_INDEX_NAME.to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        match self.timed(subscribers.create_index(index)).await? {
            Ok(_) => {}
            Err(e) if is_duplicate_key_error(&e) => {
                return Err(StoreError::CorruptState(anyhow::Error::new(e).context(
                    "The subscriber collection holds duplicate emails, the unique index cannot be built.",
                )))
            }
            Err(e) => {
                return Err(StoreError::StorageUnavailable(
                    anyhow::Error::new(e).context("Failed to create the unique email index."),
                ))
            }
        }

        tracing::info!("Connected to MongoDB");
        Ok(Connection {
            client,
            subscribers,
        })
    }

    /// Bounds a single round trip by the configured operation timeout.
    async fn timed<A, T>(&self, action: A) -> Result<mongodb::error::Result<T>, StoreError>
    where
        A: IntoFuture<Output = mongodb::error::Result<T>>,
    {
        let limit = self.settings.operation_timeout();
        tokio::time::timeout(limit, action.into_future())
            .await
            .map_err(|_| {
                StoreError::StorageUnavailable(anyhow::anyhow!(
                    "MongoDB did not respond within {limit:?}."
                ))
            })
    }

    /// Retries `StorageUnavailable` failures with exponential backoff. Only
    /// for operations whose result does not depend on an earlier attempt
    /// having partially applied.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Err(StoreError::StorageUnavailable(e)) if attempt < self.settings.max_retries => {
                    let backoff = self
                        .settings
                        .retry_backoff()
                        .saturating_mul(2u32.saturating_pow(attempt));
                    tracing::warn!(
                        error.cause_chain = ?e,
                        attempt,
                        ?backoff,
                        "MongoDB {operation} failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn find(&self, email: &SubscriberEmail) -> Result<bool, StoreError> {
        let connection = self.connection().await?;
        let found = self
            .timed(connection.subscribers.find_one(doc! { "email": email.as_ref() }))
            .await?
            .context("Failed to query the subscriber collection.")
            .map_err(StoreError::StorageUnavailable)?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl SubscriberStore for DocumentBackend {
    async fn open(&self) -> Result<(), StoreError> {
        self.with_retry("connect", || self.connection())
            .await
            .map(|_| ())
    }

    #[tracing::instrument(name = "Checking subscriber in MongoDB", skip(self, email), fields(subscriber_email = %email))]
    async fn exists(&self, email: &SubscriberEmail) -> Result<bool, StoreError> {
        self.with_retry("lookup", || self.find(email)).await
    }

    #[tracing::instrument(name = "Adding subscriber to MongoDB", skip(self, email), fields(subscriber_email = %email))]
    async fn add(&self, email: &SubscriberEmail) -> Result<AddOutcome, StoreError> {
        let connection = self.connection().await?;
        match self
            .timed(connection.subscribers.insert_one(doc! { "email": email.as_ref() }))
            .await?
        {
            Ok(_) => Ok(AddOutcome::Added),
            Err(e) if is_duplicate_key_error(&e) => Ok(AddOutcome::AlreadyExists),
            Err(e) => Err(StoreError::StorageUnavailable(
                anyhow::Error::new(e).context("Failed to insert the subscriber."),
            )),
        }
    }

    #[tracing::instrument(name = "Removing subscriber from MongoDB", skip(self, email), fields(subscriber_email = %email))]
    async fn remove(&self, email: &SubscriberEmail) -> Result<RemoveOutcome, StoreError> {
        let connection = self.connection().await?;
        let result = self
            .timed(connection.subscribers.delete_one(doc! { "email": email.as_ref() }))
            .await?
            .context("Failed to delete the subscriber.")
            .map_err(StoreError::StorageUnavailable)?;
        match result.deleted_count {
            0 => Ok(RemoveOutcome::NotFound),
            _ => Ok(RemoveOutcome::Removed),
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Some(connection) = self.connection.get() {
            connection.client.clone().shutdown().await;
            tracing::info!("Closed MongoDB connection");
        }
        Ok(())
    }
}

/// Duplicate-key failures (code 11000) come back as a write error from an
/// insert and as a command error from building an index.
fn is_duplicate_key_error(error: &mongodb::error::Error) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => false,
    }
}

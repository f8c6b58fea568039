use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{AddOutcome, RemoveOutcome, StoreError, SubscriberStore};
use crate::domain::SubscriberEmail;

/// Keeps the whole subscriber set in one JSON array on disk.
///
/// Every operation reads the full document and every mutation rewrites it.
/// A single mutex serializes operations on the instance, so the
/// check-then-write sequence of `add` and `remove` cannot interleave with
/// another caller in the same process. Writers in other processes are not
/// arbitrated.
///
/// A missing file is the empty set. A file that does not hold an array of
/// distinct strings is reported as [`StoreError::CorruptState`] and left
/// untouched.
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<String>, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::StorageUnavailable(
                    anyhow::Error::new(e)
                        .context(format!("Failed to read {}", self.path.display())),
                ))
            }
        };
        let subscribers = serde_json::from_slice::<Vec<String>>(&bytes)
            .with_context(|| {
                format!(
                    "{} does not hold a JSON array of strings",
                    self.path.display()
                )
            })
            .map_err(StoreError::CorruptState)?;

        let distinct: HashSet<&str> = subscribers.iter().map(String::as_str).collect();
        if distinct.len() != subscribers.len() {
            return Err(StoreError::CorruptState(anyhow::anyhow!(
                "{} lists the same subscriber more than once",
                self.path.display()
            )));
        }
        Ok(subscribers)
    }

    async fn persist(&self, subscribers: &[String]) -> Result<(), StoreError> {
        let contents = serde_json::to_vec_pretty(subscribers)
            .context("Failed to serialize subscribers.")
            .map_err(StoreError::StorageUnavailable)?;
        let staging_path = self.staging_path();

        let write = async {
            let mut file = fs::File::create(&staging_path).await?;
            file.write_all(&contents).await?;
            file.sync_all().await?;
            fs::rename(&staging_path, &self.path).await?;
            Ok::<(), std::io::Error>(())
        };
        write
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))
            .map_err(StoreError::StorageUnavailable)
    }

    /// Sibling file the new document is written to before it is renamed
    /// over the real one.
    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SubscriberStore for FileBackend {
    #[tracing::instrument(name = "Opening subscriber file", skip(self), fields(path = %self.path.display()))]
    async fn open(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))
                .map_err(StoreError::StorageUnavailable)?;
        }

        match fs::metadata(&self.path).await {
            Ok(_) => {
                let subscribers = self.load().await?;
                tracing::info!(count = subscribers.len(), "Loaded subscriber file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("Subscriber file not found, initializing an empty one");
                self.persist(&[]).await
            }
            Err(e) => Err(StoreError::StorageUnavailable(
                anyhow::Error::new(e).context(format!("Failed to stat {}", self.path.display())),
            )),
        }
    }

    #[tracing::instrument(name = "Checking subscriber in file", skip(self, email), fields(subscriber_email = %email))]
    async fn exists(&self, email: &SubscriberEmail) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let subscribers = self.load().await?;
        Ok(subscribers.iter().any(|s| s == email.as_ref()))
    }

    #[tracing::instrument(name = "Adding subscriber to file", skip(self, email), fields(subscriber_email = %email))]
    async fn add(&self, email: &SubscriberEmail) -> Result<AddOutcome, StoreError> {
        let _guard = self.lock.lock().await;
        let mut subscribers = self.load().await?;
        if subscribers.iter().any(|s| s == email.as_ref()) {
            return Ok(AddOutcome::AlreadyExists);
        }
        subscribers.push(email.as_ref().to_owned());
        self.persist(&subscribers).await?;
        Ok(AddOutcome::Added)
    }

    #[tracing::instrument(name = "Removing subscriber from file", skip(self, email), fields(subscriber_email = %email))]
    async fn remove(&self, email: &SubscriberEmail) -> Result<RemoveOutcome, StoreError> {
        let _guard = self.lock.lock().await;
        let mut subscribers = self.load().await?;
        if !subscribers.iter().any(|s| s == email.as_ref()) {
            return Ok(RemoveOutcome::NotFound);
        }
        subscribers.retain(|s| s != email.as_ref());
        self.persist(&subscribers).await?;
        Ok(RemoveOutcome::Removed)
    }

    async fn close(&self) -> Result<(), StoreError> {
        // Wait for an in-flight write to finish.
        let _guard = self.lock.lock().await;
        Ok(())
    }
}

//! Upload scheduling and state persistence for publishing short clips to
//! social platforms.
//!
//! A [`Clipcast`] instance owns a [`store::JobStore`] (the crash-recoverable
//! queue and history), a credential provider, and one uploader per platform.
//! Callers enqueue jobs through [`job::builder::JobBuilder`]; the spawned
//! control loop dispatches each job when its slot comes up, respecting the
//! per-platform minimum upload delay and the cross-platform stagger, and
//! retries transient failures with exponential backoff until the attempt
//! budget runs out.
//!
//! # Example
//!
//! ```no_run
//! # use clipcast::prelude::*;
//! # use clipcast::credentials::EnvCredentialProvider;
//! # use clipcast::store::FileStore;
//! # use clipcast::uploader::{Uploader, UploadOutcome};
//! # use clipcast::credentials::Credentials;
//! # use clipcast::metadata::ClipMetadata;
//! # use std::path::Path;
//! struct InstagramUploader;
//!
//! #[async_trait::async_trait]
//! impl Uploader for InstagramUploader {
//!     async fn upload(
//!         &self,
//!         clip_path: &Path,
//!         metadata: &ClipMetadata,
//!         credentials: &Credentials,
//!     ) -> UploadOutcome {
//!         // Drive a browser session, call an API, ...
//!         UploadOutcome::Success
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = FileStore::open("state").unwrap();
//! let config = SchedulerConfig::default();
//!
//! let handle = Clipcast::new(store.clone(), EnvCredentialProvider::default())
//!     .with_config(config.clone())
//!     .with_uploader(Platform::Instagram, InstagramUploader)
//!     .spawn()
//!     .await
//!     .unwrap();
//!
//! JobBuilder::new(Platform::Instagram, "clips/intro.mp4")
//!     .with_caption("The moment it all clicked")
//!     .with_hashtags(vec!["shorts"])
//!     .enqueue_to(&store, &config)
//!     .await
//!     .unwrap();
//!
//! handle.graceful_shutdown().await.unwrap();
//! # });
//! ```

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod backoff;
pub mod config;
pub mod credentials;
pub mod history;
pub mod job;
pub mod metadata;
pub mod platform;
pub mod prelude;
pub mod retention;
pub mod retry;
mod scheduler;
pub mod store;
pub mod timing;
pub mod uploader;

use config::SchedulerConfig;
use credentials::{CredentialError, CredentialProvider};
use platform::Platform;
use retention::runner::RetentionRunner;
use retention::RetentionConfig;
use scheduler::SchedulerLoop;
use store::{JobStore, StoreError};
use uploader::{Uploader, UploaderRegistry};

/// Assembles the scheduler: store, credentials, uploaders, configuration.
pub struct Clipcast<S, C>
where
    S: JobStore,
    C: CredentialProvider,
{
    store: S,
    credentials: C,
    uploaders: UploaderRegistry,
    config: SchedulerConfig,
    retention: Option<RetentionConfig>,
}

impl<S, C> Clipcast<S, C>
where
    S: JobStore + Send + Sync + 'static,
    C: CredentialProvider + 'static,
{
    pub fn new(store: S, credentials: C) -> Self {
        Self {
            store,
            credentials,
            uploaders: UploaderRegistry::new(),
            config: SchedulerConfig::default(),
            retention: None,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the uploader implementation for a platform.
    pub fn with_uploader(mut self, platform: Platform, uploader: impl Uploader + 'static) -> Self {
        self.uploaders.register(platform, uploader);
        self
    }

    /// Enables scheduled clean-up of old history entries.
    pub fn with_history_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Recovers interrupted jobs and starts the control loop.
    pub async fn spawn(self) -> Result<ClipcastHandle, ClipcastError> {
        let recovered = self.store.recover(Utc::now()).await?;
        if !recovered.is_empty() {
            tracing::info!(
                count = recovered.len(),
                "Re-queued interrupted upload attempts from a previous run"
            );
        }

        let token = CancellationToken::new();
        if let Some(retention) = self.retention {
            RetentionRunner::new(self.store.clone(), retention).spawn(token.child_token());
        }

        let (scheduler, outcome_rx) = SchedulerLoop::new(
            self.store,
            Arc::new(self.credentials),
            self.uploaders,
            self.config,
        );
        let handle = tokio::spawn(scheduler.run(outcome_rx, token.clone()));
        Ok(ClipcastHandle { token, handle })
    }
}

/// Handle to a running scheduler.
pub struct ClipcastHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ClipcastHandle {
    /// Stops dispatching, waits for in-flight uploads to finish and their
    /// outcomes to be recorded, then returns.
    pub async fn graceful_shutdown(self) -> Result<(), ClipcastError> {
        tracing::debug!("Shutting down clipcast tasks");
        self.token.cancel();
        self.handle
            .await
            .map_err(|_| ClipcastError::GracefulShutdownFailed)
    }
}

#[derive(Debug, Error)]
pub enum ClipcastError {
    #[error("failed to gracefully shut down")]
    GracefulShutdownFailed,
    #[error("error communicating with the job store")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

#[cfg(test)]
mod tests {
    use crate::credentials::StaticCredentialProvider;
    use crate::store::memory::InMemoryStore;

    use super::*;

    #[tokio::test]
    async fn spawn_and_shutdown() {
        let handle = Clipcast::new(InMemoryStore::new(), StaticCredentialProvider::new())
            .spawn()
            .await
            .unwrap();
        handle.graceful_shutdown().await.unwrap();
    }
}

//! The uploader capability: the boundary between scheduling and the
//! platform-specific upload mechanics.
//!
//! An [`Uploader`] logs into a platform and publishes one clip. How it does
//! that (browser automation, an official API, a shell command) is irrelevant
//! to scheduling correctness; what matters is that every failure comes back
//! classified as one of the [`FailureKind`]s so the retry policy can act on
//! it. An uploader that cannot produce this classification is violating the
//! contract.
//!
//! Concrete uploaders are selected by platform through an
//! [`UploaderRegistry`], one implementation per platform.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;
use crate::metadata::ClipMetadata;
use crate::platform::Platform;

/// Publishes a single clip to one platform.
///
/// Implementations may run for minutes and may suspend freely; the scheduler
/// never invokes the same platform's uploader concurrently (browser sessions
/// and profiles are not safe to share).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        clip_path: &Path,
        metadata: &ClipMetadata,
        credentials: &Credentials,
    ) -> UploadOutcome;
}

/// The result of one upload attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Success,
    Failure(UploadFailure),
}

impl UploadOutcome {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Failure(UploadFailure {
            kind: FailureKind::Transient,
            detail: detail.into(),
        })
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Failure(UploadFailure {
            kind: FailureKind::Fatal,
            detail: detail.into(),
        })
    }

    pub fn needs_intervention(detail: impl Into<String>) -> Self {
        Self::Failure(UploadFailure {
            kind: FailureKind::NeedsIntervention,
            detail: detail.into(),
        })
    }
}

/// A classified upload failure.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFailure {
    pub kind: FailureKind,
    pub detail: String,
}

/// How an upload failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying: network timeouts, rate limiting, temporary platform
    /// errors.
    Transient,
    /// Retrying would repeat the same deterministic rejection: authentication
    /// refused, content rejected by the platform.
    Fatal,
    /// The automated path is blocked and a human must act, e.g. a CAPTCHA or
    /// a manual verification challenge. Retried on a long fixed delay without
    /// consuming attempts.
    NeedsIntervention,
}

/// Maps each platform to its uploader implementation.
#[derive(Clone, Default)]
pub struct UploaderRegistry {
    uploaders: HashMap<Platform, Arc<dyn Uploader>>,
}

impl UploaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the uploader for a platform, replacing any previous one.
    pub fn register(&mut self, platform: Platform, uploader: impl Uploader + 'static) {
        self.uploaders.insert(platform, Arc::new(uploader));
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn Uploader>> {
        self.uploaders.get(&platform).cloned()
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.uploaders.keys().copied()
    }
}

impl std::fmt::Debug for UploaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploaderRegistry")
            .field("platforms", &self.uploaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_replaces_existing_uploader() {
        let mut registry = UploaderRegistry::new();
        registry.register(Platform::Instagram, MockUploader::new());
        registry.register(Platform::Instagram, MockUploader::new());

        assert_eq!(registry.platforms().count(), 1);
        assert!(registry.get(Platform::Instagram).is_some());
        assert!(registry.get(Platform::TikTok).is_none());
    }
}

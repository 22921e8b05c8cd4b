//! The credential provider boundary.
//!
//! Resolves a platform to the secret bundle its uploader needs. How the
//! secrets are stored (encrypted files, a keychain, environment variables) is
//! outside the scheduler's contract.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use thiserror::Error;

use crate::platform::Platform;

/// A decrypted secret bundle for one platform account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub extra: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

// Secrets stay out of logs: only the username is shown.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credentials for {0} are not configured")]
    NotConfigured(Platform),
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, platform: Platform) -> Result<Credentials, CredentialError>;
}

/// Reads credentials from the process environment.
///
/// For a prefix of `CLIPCAST`, the Instagram account is taken from
/// `CLIPCAST_INSTAGRAM_USERNAME` and `CLIPCAST_INSTAGRAM_PASSWORD`.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    prefix: String,
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new("CLIPCAST")
    }
}

impl EnvCredentialProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var(&self, platform: Platform, field: &str) -> Option<String> {
        let name = format!(
            "{}_{}_{}",
            self.prefix,
            platform.as_str().to_ascii_uppercase(),
            field
        );
        std::env::var(name).ok().filter(|value| !value.is_empty())
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(&self, platform: Platform) -> Result<Credentials, CredentialError> {
        let username = self
            .var(platform, "USERNAME")
            .ok_or(CredentialError::NotConfigured(platform))?;
        let password = self
            .var(platform, "PASSWORD")
            .ok_or(CredentialError::NotConfigured(platform))?;
        Ok(Credentials::new(username, password))
    }
}

/// A fixed in-memory credential set, mainly useful in tests and examples.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    credentials: HashMap<Platform, Credentials>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: Platform, credentials: Credentials) -> Self {
        self.credentials.insert(platform, credentials);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, platform: Platform) -> Result<Credentials, CredentialError> {
        self.credentials
            .get(&platform)
            .cloned()
            .ok_or(CredentialError::NotConfigured(platform))
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn static_provider_resolves_configured_platform() {
        let provider = StaticCredentialProvider::new()
            .with(Platform::TikTok, Credentials::new("creator", "hunter2"));

        let credentials = provider.resolve(Platform::TikTok).await.unwrap();
        assert_eq!(credentials.username, "creator");

        assert_matches!(
            provider.resolve(Platform::YouTube).await,
            Err(CredentialError::NotConfigured(Platform::YouTube))
        );
    }

    #[tokio::test]
    async fn env_provider_reads_prefixed_variables() {
        std::env::set_var("CLIPCAST_TEST_INSTAGRAM_USERNAME", "creator");
        std::env::set_var("CLIPCAST_TEST_INSTAGRAM_PASSWORD", "hunter2");

        let provider = EnvCredentialProvider::new("CLIPCAST_TEST");
        let credentials = provider.resolve(Platform::Instagram).await.unwrap();
        assert_eq!(credentials.username, "creator");
        assert_eq!(credentials.password, "hunter2");

        assert_matches!(
            provider.resolve(Platform::TikTok).await,
            Err(CredentialError::NotConfigured(Platform::TikTok))
        );
    }

    #[test]
    fn debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("creator", "hunter2"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("creator"));
    }
}

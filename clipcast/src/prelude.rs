//! The purpose of this module is to alleviate the need to import many of the
//! `clipcast` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use clipcast::prelude::*;
//! ```
pub use crate::backoff::BackoffStrategy;
pub use crate::backoff::Jitter;
pub use crate::backoff::Strategy;
pub use crate::config::SchedulerConfig;
pub use crate::credentials::{CredentialProvider, Credentials};
pub use crate::history::{HistoryEntry, HistoryQuery};
pub use crate::job::builder::JobBuilder;
pub use crate::job::{Job, JobId, JobStatus};
pub use crate::metadata::{ClipMetadata, MetadataSession};
pub use crate::platform::Platform;
pub use crate::retention::{RetentionConfig, RetentionSpec};
pub use crate::retry::{RetryDecision, RetryPolicy};
pub use crate::store::{FileStore, InMemoryStore, JobStore};
pub use crate::timing::TimingPolicy;
pub use crate::uploader::{FailureKind, UploadOutcome, Uploader, UploaderRegistry};
pub use crate::{Clipcast, ClipcastHandle};

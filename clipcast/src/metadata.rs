//! Captions and hashtags attached to a publish job.
//!
//! The scheduler treats [`ClipMetadata`] as an opaque payload: it is generated
//! before a job is enqueued and handed to the platform uploader verbatim.
//!
//! [`MetadataSession`] carries the base hashtag set used to keep hashtags
//! consistent across the clips of one source video. The session is an explicit
//! value passed to composition calls; dropping it discards the base set.

use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// The caption/hashtag payload attached to a job at enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipMetadata {
    pub caption: String,
    pub hashtags: Vec<String>,
}

impl ClipMetadata {
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            caption: caption.into(),
            hashtags: Vec::new(),
        }
    }

    pub fn with_hashtags(self, hashtags: Vec<impl Into<String>>) -> Self {
        Self {
            hashtags: hashtags.into_iter().map(normalize_tag).collect(),
            ..self
        }
    }

    /// The caption followed by the hashtag block, formatted the way the
    /// platforms expect (`#tag` separated by spaces, after a blank line).
    pub fn formatted_caption(&self) -> String {
        if self.hashtags.is_empty() {
            return self.caption.clone();
        }
        let tags = self
            .hashtags
            .iter()
            .map(|tag| format!("#{tag}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!("{}\n\n{}", self.caption, tags)
    }
}

fn normalize_tag(tag: impl Into<String>) -> String {
    tag.into().trim().trim_start_matches('#').to_owned()
}

/// Session state for metadata composition.
///
/// Holds the base hashtags shared by every clip in the session so a batch of
/// clips from one video carries a consistent tag set.
#[derive(Debug, Clone, Default)]
pub struct MetadataSession {
    base_hashtags: Option<Vec<String>>,
}

impl MetadataSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base hashtags applied to every subsequent composition.
    pub fn set_base_hashtags(&mut self, hashtags: Vec<impl Into<String>>) {
        let hashtags: Vec<_> = hashtags.into_iter().map(normalize_tag).collect();
        tracing::debug!("Using {} base hashtags for this session", hashtags.len());
        self.base_hashtags = Some(hashtags);
    }

    /// Clears the base hashtags.
    pub fn reset_base_hashtags(&mut self) {
        self.base_hashtags = None;
    }

    /// Builds the metadata payload for one clip: base hashtags first, then the
    /// clip-specific ones, deduplicated and capped at the platform's limit.
    pub fn compose(
        &self,
        caption: impl Into<String>,
        hashtags: Vec<impl Into<String>>,
        platform: Platform,
    ) -> ClipMetadata {
        let mut merged: Vec<String> = Vec::new();
        let base = self.base_hashtags.iter().flatten().cloned();
        for tag in base.chain(hashtags.into_iter().map(normalize_tag)) {
            if !tag.is_empty() && !merged.contains(&tag) {
                merged.push(tag);
            }
        }
        merged.truncate(platform.max_hashtags());
        ClipMetadata {
            caption: caption.into(),
            hashtags: merged,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formatted_caption_appends_hashtag_block() {
        let metadata = ClipMetadata::new("Big reveal").with_hashtags(vec!["#shorts", "viral"]);
        assert_eq!(metadata.formatted_caption(), "Big reveal\n\n#shorts #viral");
    }

    #[test]
    fn formatted_caption_without_hashtags_is_caption_only() {
        assert_eq!(ClipMetadata::new("plain").formatted_caption(), "plain");
    }

    #[test]
    fn compose_merges_base_and_clip_hashtags() {
        let mut session = MetadataSession::new();
        session.set_base_hashtags(vec!["channel", "weekly"]);

        let metadata = session.compose(
            "Clip one",
            vec!["weekly", "highlight"],
            Platform::Instagram,
        );

        assert_eq!(metadata.hashtags, vec!["channel", "weekly", "highlight"]);
    }

    #[test]
    fn compose_caps_hashtags_at_platform_limit() {
        let session = MetadataSession::new();
        let tags: Vec<String> = (0..40).map(|i| format!("tag{i}")).collect();

        let metadata = session.compose("caption", tags.clone(), Platform::YouTube);
        assert_eq!(metadata.hashtags.len(), Platform::YouTube.max_hashtags());

        let metadata = session.compose("caption", tags, Platform::TikTok);
        assert_eq!(metadata.hashtags.len(), Platform::TikTok.max_hashtags());
    }

    #[test]
    fn reset_discards_base_hashtags() {
        let mut session = MetadataSession::new();
        session.set_base_hashtags(vec!["channel"]);
        session.reset_base_hashtags();

        let metadata = session.compose("caption", vec!["clip"], Platform::TikTok);
        assert_eq!(metadata.hashtags, vec!["clip"]);
    }
}

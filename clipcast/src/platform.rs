use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The social platforms clips can be published to.
///
/// Each platform has its own uploader implementation registered via
/// [`crate::uploader::UploaderRegistry`] and its own timing state: uploads to
/// one platform never block uploads to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    YouTube,
    TikTok,
}

impl Platform {
    /// All supported platforms.
    pub const ALL: [Platform; 3] = [Platform::Instagram, Platform::YouTube, Platform::TikTok];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
        }
    }

    /// The maximum number of hashtags the platform accepts on a caption.
    pub fn max_hashtags(&self) -> usize {
        match self {
            Platform::Instagram => 30,
            Platform::YouTube => 15,
            Platform::TikTok => 30,
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "instagram" => Ok(Platform::Instagram),
            "youtube" => Ok(Platform::YouTube),
            "tiktok" => Ok(Platform::TikTok),
            _ => Err(UnknownPlatform(s.to_owned())),
        }
    }
}

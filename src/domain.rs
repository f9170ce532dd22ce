use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SnapError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Account(String);

impl Account {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(value: &str) -> bool {
        let len = value.chars().count();
        (3..=15).contains(&len)
            && value
                .chars()
                .all(|ch| ch.is_alphanumeric() || matches!(ch, '.' | '_' | '-'))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Account {
    type Err = SnapError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !Self::is_valid(value) {
            return Err(SnapError::InvalidAccount(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            MediaKind::Image
        } else {
            MediaKind::Video
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub id: String,
    pub url: String,
    pub kind: MediaKind,
    pub captured_at: i64,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub username: String,
    pub display_name: Option<String>,
    pub hero_image_url: Option<String>,
    pub preview_image_url: Option<String>,
    pub raw: Value,
}

impl Profile {
    /// Name used for avatar files; falls back to the username.
    pub fn file_label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightGroup {
    pub title: String,
    pub segments: Vec<MediaSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedCategory {
    Stories,
    Curated,
    Spotlight,
}

impl FeedCategory {
    pub fn folder_name(self) -> &'static str {
        match self {
            FeedCategory::Stories => "Public Stories",
            FeedCategory::Curated => "Curated Highlights",
            FeedCategory::Spotlight => "Spotlight Highlights",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FeedCategory::Stories => "public stories",
            FeedCategory::Curated => "curated highlights",
            FeedCategory::Spotlight => "spotlight highlights",
        }
    }
}

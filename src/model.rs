use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type StoryId = String;
pub type ChapterId = String;
pub type ContentId = String;

/// Content blocks of one chapter keyed by block id.
pub type Contents = BTreeMap<ContentId, ContentBlock>;

/// Authenticated user as handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub title: String,
    pub description: String,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub contents: Contents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBlockType {
    Text,
    Code,
    Markdown,
}

impl ContentBlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::Markdown => "markdown",
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "code" => Ok(Self::Code),
            "markdown" | "md" => Ok(Self::Markdown),
            other => anyhow::bail!("unsupported content block type: {other}"),
        }
    }
}

impl std::fmt::Display for ContentBlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: ContentId,
    #[serde(rename = "type")]
    pub kind: ContentBlockType,
    pub content: String,
    /// Display position among sibling blocks. Blocks stored without an
    /// index carry [`ContentBlock::UNINDEXED`] and sort last.
    pub index: i64,
}

impl ContentBlock {
    pub const UNINDEXED: i64 = i64::MAX;

    pub fn patch(&self) -> ContentPatch {
        ContentPatch {
            kind: Some(self.kind),
            content: Some(self.content.clone()),
            index: Some(self.index),
        }
    }
}

/// Fields supplied when creating a content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContentBlock {
    #[serde(rename = "type")]
    pub kind: ContentBlockType,
    pub content: String,
    pub index: i64,
}

/// Partial update of a content block; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ContentBlockType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}

impl ContentPatch {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.content.is_none() && self.index.is_none()
    }
}

/// Editor-local copy of a chapter; `contents` is `None` until loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialChapter {
    pub title: String,
    pub contents: Option<Contents>,
}

impl PartialChapter {
    pub fn block_count(&self) -> usize {
        self.contents.as_ref().map_or(0, |c| c.len())
    }
}

impl From<&Chapter> for PartialChapter {
    fn from(chapter: &Chapter) -> Self {
        Self {
            title: chapter.title.clone(),
            contents: Some(chapter.contents.clone()),
        }
    }
}

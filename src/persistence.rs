//! Typed access to stories, chapters and content blocks.
//!
//! Layout in the document store:
//!
//! ```text
//! stories/{story}
//! stories/{story}/chapters/{chapter}
//! stories/{story}/chapters/{chapter}/contents/{content}
//! ```

use std::sync::Arc;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::model::{
    Chapter, ContentBlock, ContentBlockType, ContentId, ContentPatch, Contents, NewContentBlock,
    Story,
};
use crate::store::{CollectionPath, DocumentPath, DocumentStore, FieldFilter, Fields, Snapshot};

const STORIES: &str = "stories";
const CHAPTERS: &str = "chapters";
const CONTENTS: &str = "contents";
const OWNER_FIELD: &str = "owner";

#[derive(Debug, Deserialize)]
struct StoryDoc {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Serialize)]
struct NewStoryDoc<'a> {
    title: &'a str,
    description: &'a str,
    owner: &'a str,
}

#[derive(Debug, Serialize)]
struct StoryUpdateDoc<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChapterDoc {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct ContentDoc {
    #[serde(rename = "type")]
    kind: ContentBlockType,
    #[serde(default)]
    content: String,
    index: Option<i64>,
}

#[derive(Clone)]
pub struct PersistenceClient {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for PersistenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceClient").finish_non_exhaustive()
    }
}

impl PersistenceClient {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn stories() -> anyhow::Result<CollectionPath> {
        CollectionPath::root(STORIES)
    }

    fn story_doc(story_id: &str) -> anyhow::Result<DocumentPath> {
        Self::stories()?.doc(story_id)
    }

    fn chapters(story_id: &str) -> anyhow::Result<CollectionPath> {
        Self::story_doc(story_id)?.collection(CHAPTERS)
    }

    fn chapter_doc(story_id: &str, chapter_id: &str) -> anyhow::Result<DocumentPath> {
        Self::chapters(story_id)?.doc(chapter_id)
    }

    fn contents(story_id: &str, chapter_id: &str) -> anyhow::Result<CollectionPath> {
        Self::chapter_doc(story_id, chapter_id)?.collection(CONTENTS)
    }

    fn content_doc(
        story_id: &str,
        chapter_id: &str,
        content_id: &str,
    ) -> anyhow::Result<DocumentPath> {
        Self::contents(story_id, chapter_id)?.doc(content_id)
    }

    pub async fn get_user_stories(&self, owner_id: &str) -> anyhow::Result<Vec<Story>> {
        let filter = FieldFilter::eq(OWNER_FIELD, owner_id);
        let docs = self
            .store
            .list(&Self::stories()?, Some(&filter))
            .await
            .context("list stories")?;
        Ok(decode_all(docs, decode_story))
    }

    pub async fn get_story(&self, story_id: &str) -> anyhow::Result<Option<Story>> {
        let doc = Self::story_doc(story_id)?;
        let Some(snapshot) = self.store.get(&doc).await.context("get story")? else {
            return Ok(None);
        };
        decode_story(snapshot).map(Some)
    }

    /// Chapters of a story without their content blocks.
    pub async fn get_story_chapters(&self, story_id: &str) -> anyhow::Result<Vec<Chapter>> {
        let docs = self
            .store
            .list(&Self::chapters(story_id)?, None)
            .await
            .with_context(|| format!("list chapters of story {story_id}"))?;
        Ok(decode_all(docs, decode_chapter))
    }

    pub async fn get_chapter_contents(
        &self,
        story_id: &str,
        chapter_id: &str,
    ) -> anyhow::Result<Vec<ContentBlock>> {
        let docs = self
            .store
            .list(&Self::contents(story_id, chapter_id)?, None)
            .await
            .with_context(|| format!("list contents of chapter {chapter_id}"))?;
        Ok(decode_all(docs, decode_content))
    }

    /// A single chapter with its content blocks.
    pub async fn get_chapter(
        &self,
        story_id: &str,
        chapter_id: &str,
    ) -> anyhow::Result<Option<Chapter>> {
        let doc = Self::chapter_doc(story_id, chapter_id)?;
        let Some(snapshot) = self.store.get(&doc).await.context("get chapter")? else {
            return Ok(None);
        };
        let mut chapter = decode_chapter(snapshot)?;
        chapter.contents = into_contents(self.get_chapter_contents(story_id, chapter_id).await?);
        Ok(Some(chapter))
    }

    /// All chapters of a story, each with its content blocks. Content
    /// listings are fetched concurrently; chapter order is preserved.
    pub async fn load_chapters_with_contents(
        &self,
        story_id: &str,
    ) -> anyhow::Result<Vec<Chapter>> {
        let mut chapters = self.get_story_chapters(story_id).await?;

        let mut tasks = JoinSet::new();
        for (pos, chapter) in chapters.iter().enumerate() {
            let client = self.clone();
            let story_id = story_id.to_string();
            let chapter_id = chapter.id.clone();
            tasks.spawn(async move {
                let blocks = client.get_chapter_contents(&story_id, &chapter_id).await;
                (pos, blocks)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let (pos, blocks) = joined.context("join content fetch task")?;
            chapters[pos].contents = into_contents(blocks?);
        }
        Ok(chapters)
    }

    pub async fn add_story(&self, owner_id: &str, title: &str) -> anyhow::Result<String> {
        let fields = to_fields(&NewStoryDoc {
            title,
            description: "",
            owner: owner_id,
        })?;
        let id = self
            .store
            .create(&Self::stories()?, fields)
            .await
            .context("create story")?;
        tracing::info!(story_id = %id, "created story");
        Ok(id)
    }

    pub async fn update_story(
        &self,
        story_id: &str,
        title: &str,
        description: &str,
    ) -> anyhow::Result<()> {
        let fields = to_fields(&StoryUpdateDoc { title, description })?;
        self.store
            .update(&Self::story_doc(story_id)?, fields)
            .await
            .with_context(|| format!("update story {story_id}"))
    }

    pub async fn add_chapter(&self, story_id: &str, title: &str) -> anyhow::Result<String> {
        let fields = to_fields(&ChapterDoc {
            title: title.to_string(),
        })?;
        let id = self
            .store
            .create(&Self::chapters(story_id)?, fields)
            .await
            .with_context(|| format!("create chapter in story {story_id}"))?;
        tracing::info!(story_id, chapter_id = %id, "created chapter");
        Ok(id)
    }

    /// Only the title is written.
    pub async fn update_chapter(
        &self,
        story_id: &str,
        chapter_id: &str,
        title: &str,
    ) -> anyhow::Result<()> {
        let fields = to_fields(&ChapterDoc {
            title: title.to_string(),
        })?;
        self.store
            .update(&Self::chapter_doc(story_id, chapter_id)?, fields)
            .await
            .with_context(|| format!("update chapter {chapter_id}"))
    }

    pub async fn add_chapter_content(
        &self,
        story_id: &str,
        chapter_id: &str,
        block: &NewContentBlock,
    ) -> anyhow::Result<ContentId> {
        let fields = to_fields(block)?;
        self.store
            .create(&Self::contents(story_id, chapter_id)?, fields)
            .await
            .with_context(|| format!("create content in chapter {chapter_id}"))
    }

    pub async fn update_chapter_content(
        &self,
        story_id: &str,
        chapter_id: &str,
        content_id: &str,
        patch: &ContentPatch,
    ) -> anyhow::Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let fields = to_fields(patch)?;
        self.store
            .update(&Self::content_doc(story_id, chapter_id, content_id)?, fields)
            .await
            .with_context(|| format!("update content {content_id}"))
    }

    pub async fn delete_chapter_content(
        &self,
        story_id: &str,
        chapter_id: &str,
        content_id: &str,
    ) -> anyhow::Result<()> {
        self.store
            .delete(&Self::content_doc(story_id, chapter_id, content_id)?)
            .await
            .with_context(|| format!("delete content {content_id}"))
    }
}

fn to_fields<T: Serialize>(value: &T) -> anyhow::Result<Fields> {
    match serde_json::to_value(value).context("serialize document")? {
        serde_json::Value::Object(fields) => Ok(fields),
        other => anyhow::bail!("document must serialize to an object, got {other}"),
    }
}

fn from_fields<T: serde::de::DeserializeOwned>(fields: Fields) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::Object(fields)).context("decode document")
}

fn decode_all<T>(docs: Vec<Snapshot>, decode: fn(Snapshot) -> anyhow::Result<T>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc.id.clone();
            match decode(doc) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(id = %id, ?err, "skipping undecodable document");
                    None
                }
            }
        })
        .collect()
}

fn decode_story(snapshot: Snapshot) -> anyhow::Result<Story> {
    let modified_at = snapshot.modified_at();
    let doc: StoryDoc = from_fields(snapshot.fields)?;
    Ok(Story {
        id: snapshot.id,
        title: doc.title,
        description: doc.description,
        modified_at,
    })
}

fn decode_chapter(snapshot: Snapshot) -> anyhow::Result<Chapter> {
    let modified_at = snapshot.modified_at();
    let doc: ChapterDoc = from_fields(snapshot.fields)?;
    Ok(Chapter {
        id: snapshot.id,
        title: doc.title,
        modified_at,
        contents: Contents::new(),
    })
}

fn decode_content(snapshot: Snapshot) -> anyhow::Result<ContentBlock> {
    let doc: ContentDoc = from_fields(snapshot.fields)?;
    Ok(ContentBlock {
        id: snapshot.id,
        kind: doc.kind,
        content: doc.content,
        index: doc.index.unwrap_or(ContentBlock::UNINDEXED),
    })
}

fn into_contents(blocks: Vec<ContentBlock>) -> Contents {
    blocks
        .into_iter()
        .map(|block| (block.id.clone(), block))
        .collect()
}

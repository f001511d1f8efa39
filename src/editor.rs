use tokio::sync::{broadcast, watch};

use crate::autosave::{AutosaveCoordinator, FlushOutcome, SaveEvent, SavePhase};
use crate::config::EditorConfig;
use crate::model::{Chapter, ContentBlock, ContentBlockType, ContentId, NewContentBlock};
use crate::ordering;
use crate::persistence::PersistenceClient;
use crate::reconcile::MergeDecision;
use crate::stats::ChapterStats;

/// Editing surface for one chapter. Text edits are buffered and saved by
/// the autosave coordinator; adding and deleting blocks go to the store
/// right away and only touch the working copy once the store confirms.
#[derive(Debug, Clone)]
pub struct ChapterEditor {
    autosave: AutosaveCoordinator,
}

impl ChapterEditor {
    pub fn open(
        client: PersistenceClient,
        story_id: impl Into<String>,
        chapter: &Chapter,
        config: EditorConfig,
    ) -> Self {
        Self {
            autosave: AutosaveCoordinator::new(client, story_id, chapter, config),
        }
    }

    pub fn story_id(&self) -> &str {
        self.autosave.story_id()
    }

    pub fn chapter_id(&self) -> &str {
        self.autosave.chapter_id()
    }

    pub fn title(&self) -> anyhow::Result<String> {
        self.autosave.read(|wc| wc.title().to_string())
    }

    pub fn sorted_blocks(&self) -> anyhow::Result<Vec<ContentBlock>> {
        self.autosave.read(|wc| match wc.contents() {
            Some(contents) => ordering::sorted_blocks(contents)
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }

    pub fn sorted_ids(&self) -> anyhow::Result<Vec<ContentId>> {
        self.autosave
            .read(|wc| wc.contents().map(ordering::sorted_ids).unwrap_or_default())
    }

    pub fn stats(&self) -> anyhow::Result<ChapterStats> {
        self.autosave.read(|wc| match wc.contents() {
            Some(contents) => ChapterStats::from_contents(contents),
            None => ChapterStats::default(),
        })
    }

    pub fn is_dirty(&self) -> anyhow::Result<bool> {
        self.autosave.read(|wc| wc.is_dirty())
    }

    pub fn set_title(&self, title: impl Into<String>) -> anyhow::Result<()> {
        let title = title.into();
        self.autosave.edit(|wc| {
            wc.chapter.title = title;
            wc.touch_title();
            Ok(())
        })
    }

    pub fn set_block_content(&self, id: &str, content: impl Into<String>) -> anyhow::Result<()> {
        let content = content.into();
        self.autosave.edit(|wc| {
            let block = wc
                .contents_mut()
                .get_mut(id)
                .ok_or_else(|| anyhow::anyhow!("content block not found: {id}"))?;
            block.content = content;
            wc.touch_block(id);
            Ok(())
        })
    }

    pub fn set_block_type(&self, id: &str, kind: ContentBlockType) -> anyhow::Result<()> {
        self.autosave.edit(|wc| {
            let block = wc
                .contents_mut()
                .get_mut(id)
                .ok_or_else(|| anyhow::anyhow!("content block not found: {id}"))?;
            block.kind = kind;
            wc.touch_block(id);
            Ok(())
        })
    }

    /// Drag-and-drop: moves `moved` onto `target`'s position. Every block
    /// whose index changed is saved on the next cycle.
    pub fn move_block(&self, moved: &str, target: &str) -> anyhow::Result<Vec<ContentId>> {
        self.autosave.edit(|wc| {
            let changed = ordering::reorder(wc.contents_mut(), moved, target)?;
            for id in &changed {
                wc.touch_block(id.clone());
            }
            Ok(changed)
        })
    }

    /// Appends an empty block of `kind` at the end of the chapter.
    pub async fn add_block(&self, kind: ContentBlockType) -> anyhow::Result<ContentId> {
        let index = self
            .autosave
            .read(|wc| wc.contents().map(ordering::next_index).unwrap_or(0))?;
        let new_block = NewContentBlock {
            kind,
            content: String::new(),
            index,
        };
        let id = self
            .autosave
            .client()
            .add_chapter_content(self.autosave.story_id(), self.chapter_id(), &new_block)
            .await?;
        self.autosave.edit(|wc| {
            wc.contents_mut()
                .insert(id.clone(), ordering::empty_block(id.clone(), kind, index));
            Ok(())
        })?;
        tracing::debug!(chapter_id = %self.chapter_id(), content_id = %id, index, "added block");
        Ok(id)
    }

    /// Deletes a block from the store, then from the working copy. On
    /// failure the working copy is left as it was.
    pub async fn delete_block(&self, id: &str) -> anyhow::Result<()> {
        let exists = self
            .autosave
            .read(|wc| wc.contents().is_some_and(|c| c.contains_key(id)))?;
        if !exists {
            anyhow::bail!("content block not found: {id}");
        }
        self.autosave
            .client()
            .delete_chapter_content(self.autosave.story_id(), self.chapter_id(), id)
            .await?;
        self.autosave.edit(|wc| {
            ordering::remove(wc.contents_mut(), id);
            wc.forget_block(id);
            Ok(())
        })?;
        tracing::debug!(chapter_id = %self.chapter_id(), content_id = %id, "deleted block");
        Ok(())
    }

    pub fn apply_remote(&self, remote: &Chapter) -> anyhow::Result<MergeDecision> {
        self.autosave.apply_remote(remote)
    }

    pub async fn flush(&self) -> anyhow::Result<FlushOutcome> {
        self.autosave.flush().await
    }

    pub fn phase(&self) -> SavePhase {
        self.autosave.phase()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SavePhase> {
        self.autosave.watch_phase()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.autosave.subscribe()
    }
}

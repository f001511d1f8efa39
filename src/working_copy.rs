use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::model::{Chapter, ContentId, ContentPatch, Contents, PartialChapter};

/// In-memory chapter being edited, plus the fields touched since the last
/// save attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    pub chapter: PartialChapter,
    pub modified_at: Option<DateTime<Utc>>,
    title_touched: bool,
    touched_blocks: BTreeSet<ContentId>,
}

/// Writes captured from a working copy at the start of a save cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveBatch {
    pub title: Option<String>,
    pub blocks: Vec<(ContentId, ContentPatch)>,
}

impl SaveBatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.blocks.is_empty()
    }

    pub fn write_count(&self) -> usize {
        usize::from(self.title.is_some()) + self.blocks.len()
    }
}

impl WorkingCopy {
    pub fn from_chapter(chapter: &Chapter) -> Self {
        Self {
            chapter: PartialChapter::from(chapter),
            modified_at: chapter.modified_at,
            title_touched: false,
            touched_blocks: BTreeSet::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.chapter.title
    }

    pub fn contents(&self) -> Option<&Contents> {
        self.chapter.contents.as_ref()
    }

    pub fn contents_mut(&mut self) -> &mut Contents {
        self.chapter.contents.get_or_insert_with(Contents::new)
    }

    pub fn block_count(&self) -> usize {
        self.chapter.block_count()
    }

    pub fn is_dirty(&self) -> bool {
        self.title_touched || !self.touched_blocks.is_empty()
    }

    pub fn touch_title(&mut self) {
        self.title_touched = true;
    }

    pub fn touch_block(&mut self, id: impl Into<ContentId>) {
        self.touched_blocks.insert(id.into());
    }

    pub fn forget_block(&mut self, id: &str) {
        self.touched_blocks.remove(id);
    }

    /// Captures touched fields and clears their marks. Marks of blocks that
    /// no longer exist are dropped.
    pub fn take_batch(&mut self) -> SaveBatch {
        let title = std::mem::take(&mut self.title_touched).then(|| self.chapter.title.clone());
        let touched = std::mem::take(&mut self.touched_blocks);
        let blocks = match self.chapter.contents.as_ref() {
            Some(contents) => touched
                .into_iter()
                .filter_map(|id| contents.get(&id).map(|block| (id, block.patch())))
                .collect(),
            None => Vec::new(),
        };
        SaveBatch { title, blocks }
    }

    /// Marks the writes of a failed batch as touched again.
    pub fn restore(&mut self, failed_title: bool, failed_blocks: impl IntoIterator<Item = ContentId>) {
        if failed_title {
            self.title_touched = true;
        }
        let existing = self.chapter.contents.as_ref();
        for id in failed_blocks {
            if existing.is_some_and(|c| c.contains_key(&id)) {
                self.touched_blocks.insert(id);
            }
        }
    }

    /// Takes the remote chapter wholesale and clears all marks.
    pub fn replace_with(&mut self, remote: &Chapter) {
        *self = Self::from_chapter(remote);
    }
}

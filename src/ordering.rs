//! Display order of the content blocks of a chapter.
//!
//! Blocks are ordered by `index`; ties fall back to id order so the
//! sequence is total even when indices collide or are missing.

use crate::model::{ContentBlock, ContentBlockType, ContentId, Contents};

/// Block ids in display order.
pub fn sorted_ids(contents: &Contents) -> Vec<ContentId> {
    let mut blocks = contents.values().collect::<Vec<_>>();
    // Map iteration is already id-ordered, so a stable sort keeps id as tiebreak.
    blocks.sort_by_key(|block| block.index);
    blocks.into_iter().map(|block| block.id.clone()).collect()
}

pub fn sorted_blocks(contents: &Contents) -> Vec<&ContentBlock> {
    sorted_ids(contents)
        .iter()
        .filter_map(|id| contents.get(id))
        .collect()
}

/// Moves `moved` to the position currently held by `target` and re-stamps
/// every block with its zero-based position. Returns the ids whose index
/// changed.
pub fn reorder(
    contents: &mut Contents,
    moved: &str,
    target: &str,
) -> anyhow::Result<Vec<ContentId>> {
    let mut order = sorted_ids(contents);
    let from = position(&order, moved)?;
    let to = position(&order, target)?;

    if from != to {
        let id = order.remove(from);
        order.insert(to, id);
    }

    let mut changed = Vec::new();
    for (pos, id) in order.iter().enumerate() {
        let Some(block) = contents.get_mut(id) else {
            continue;
        };
        let index = pos as i64;
        if block.index != index {
            block.index = index;
            changed.push(id.clone());
        }
    }
    Ok(changed)
}

fn position(order: &[ContentId], id: &str) -> anyhow::Result<usize> {
    order
        .iter()
        .position(|candidate| candidate == id)
        .ok_or_else(|| anyhow::anyhow!("content block not found: {id}"))
}

/// Index for a block appended at the end of the chapter: one past the
/// highest index, which is the block count while indices are dense.
/// Unindexed blocks are ignored.
pub fn next_index(contents: &Contents) -> i64 {
    contents
        .values()
        .map(|block| block.index)
        .filter(|index| *index != ContentBlock::UNINDEXED)
        .max()
        .map_or(0, |highest| highest.saturating_add(1))
}

pub fn empty_block(id: ContentId, kind: ContentBlockType, index: i64) -> ContentBlock {
    ContentBlock {
        id,
        kind,
        content: String::new(),
        index,
    }
}

/// Removes a block without renumbering its siblings.
pub fn remove(contents: &mut Contents, id: &str) -> Option<ContentBlock> {
    contents.remove(id)
}

use serde::Serialize;

use crate::model::{ContentBlockType, Contents};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChapterStats {
    pub words: usize,
    pub characters: usize,
    pub blocks: usize,
    pub text_blocks: usize,
    pub code_blocks: usize,
    pub markdown_blocks: usize,
}

impl ChapterStats {
    pub fn from_contents(contents: &Contents) -> Self {
        let mut stats = Self {
            blocks: contents.len(),
            ..Self::default()
        };
        for block in contents.values() {
            stats.words += block.content.split_whitespace().count();
            stats.characters += block.content.chars().count();
            match block.kind {
                ContentBlockType::Text => stats.text_blocks += 1,
                ContentBlockType::Code => stats.code_blocks += 1,
                ContentBlockType::Markdown => stats.markdown_blocks += 1,
            }
        }
        stats
    }
}

impl std::fmt::Display for ChapterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        write!(
            f,
            "{} word{}, {} block{}",
            self.words,
            plural(self.words),
            self.blocks,
            plural(self.blocks)
        )
    }
}

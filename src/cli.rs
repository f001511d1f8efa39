use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Directory of the local document store (default: $WHITESPACE_STORE_DIR).
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    /// Base URL of a `whitespace-store` server (default: $WHITESPACE_STORE_URL).
    #[arg(long, global = true)]
    pub store_url: Option<String>,

    /// User id to act as (default: $WHITESPACE_USER).
    #[arg(long, global = true)]
    pub user: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Story {
        #[command(subcommand)]
        command: StoryCommand,
    },
    Chapter {
        #[command(subcommand)]
        command: ChapterCommand,
    },
    Content {
        #[command(subcommand)]
        command: ContentCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum StoryCommand {
    /// List the user's stories.
    List,
    Add(StoryAddArgs),
    Update(StoryUpdateArgs),
}

#[derive(Debug, Args)]
pub struct StoryAddArgs {
    #[arg(long)]
    pub title: String,
}

#[derive(Debug, Args)]
pub struct StoryUpdateArgs {
    #[arg(long)]
    pub story: String,

    #[arg(long)]
    pub title: String,

    #[arg(long, default_value = "")]
    pub description: String,
}

#[derive(Debug, Subcommand)]
pub enum ChapterCommand {
    List(ChapterListArgs),
    Add(ChapterAddArgs),
    /// Print a chapter's blocks in display order.
    Show(ChapterRef),
    /// Rename a chapter through the autosave path.
    Rename(ChapterRenameArgs),
}

#[derive(Debug, Args)]
pub struct ChapterListArgs {
    #[arg(long)]
    pub story: String,
}

#[derive(Debug, Args)]
pub struct ChapterAddArgs {
    #[arg(long)]
    pub story: String,

    #[arg(long)]
    pub title: String,
}

#[derive(Debug, Args, Clone)]
pub struct ChapterRef {
    #[arg(long)]
    pub story: String,

    #[arg(long)]
    pub chapter: String,
}

#[derive(Debug, Args)]
pub struct ChapterRenameArgs {
    #[command(flatten)]
    pub chapter: ChapterRef,

    #[arg(long)]
    pub title: String,
}

#[derive(Debug, Subcommand)]
pub enum ContentCommand {
    /// Append an empty block to the chapter.
    Add(ContentAddArgs),
    /// Replace the text of a block.
    Set(ContentSetArgs),
    /// Move a block onto another block's position.
    Move(ContentMoveArgs),
    Delete(ContentDeleteArgs),
}

#[derive(Debug, Args)]
pub struct ContentAddArgs {
    #[command(flatten)]
    pub chapter: ChapterRef,

    /// Block type: text, code or markdown.
    #[arg(long = "type", default_value = "text")]
    pub kind: String,
}

#[derive(Debug, Args)]
pub struct ContentSetArgs {
    #[command(flatten)]
    pub chapter: ChapterRef,

    #[arg(long)]
    pub content_id: String,

    #[arg(long)]
    pub text: String,
}

#[derive(Debug, Args)]
pub struct ContentMoveArgs {
    #[command(flatten)]
    pub chapter: ChapterRef,

    #[arg(long)]
    pub moved: String,

    #[arg(long)]
    pub target: String,
}

#[derive(Debug, Args)]
pub struct ContentDeleteArgs {
    #[command(flatten)]
    pub chapter: ChapterRef,

    #[arg(long)]
    pub content_id: String,
}

use std::io::Write as _;

use anyhow::Context as _;

use crate::cli::{
    ChapterAddArgs, ChapterListArgs, ChapterRef, ChapterRenameArgs, ContentAddArgs,
    ContentDeleteArgs, ContentMoveArgs, ContentSetArgs, StoreArgs, StoryAddArgs,
    StoryUpdateArgs,
};
use crate::config::{EditorConfig, StoreBackend, USER_ENV};
use crate::editor::ChapterEditor;
use crate::model::{ContentBlockType, Identity};
use crate::persistence::PersistenceClient;
use crate::session::Session;
use crate::stats::ChapterStats;

/// Everything a subcommand needs: the session over the configured store
/// and the autosave settings.
pub struct CommandContext {
    pub session: Session,
    pub editor_config: EditorConfig,
    user: Option<String>,
}

impl CommandContext {
    pub fn from_args(args: StoreArgs) -> anyhow::Result<Self> {
        let backend = StoreBackend::resolve(args.store_dir, args.store_url)?;
        let store = backend.open().context("open document store")?;
        let editor_config = EditorConfig::from_env().context("read editor config")?;
        let user = args
            .user
            .or_else(|| std::env::var(USER_ENV).ok())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        Ok(Self {
            session: Session::new(PersistenceClient::new(store)),
            editor_config,
            user,
        })
    }

    async fn sign_in(&self) -> anyhow::Result<()> {
        let uid = self
            .user
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no user given. pass --user or set {USER_ENV}"))?;
        self.session.sign_in(Identity::new(uid)).await?;
        Ok(())
    }

    async fn open_chapter(&self, chapter: &ChapterRef) -> anyhow::Result<ChapterEditor> {
        self.session.select_story(&chapter.story, false).await?;
        self.session
            .select_chapter(&chapter.chapter)
            .with_context(|| format!("in story {}", chapter.story))?;
        self.session.open_editor(self.editor_config)
    }
}

pub async fn story_list(ctx: &CommandContext) -> anyhow::Result<()> {
    ctx.sign_in().await?;
    let mut out = std::io::stdout().lock();
    for story in ctx.session.stories()? {
        writeln!(out, "{}\t{}", story.id, story.title)?;
    }
    Ok(())
}

pub async fn story_add(ctx: &CommandContext, args: StoryAddArgs) -> anyhow::Result<()> {
    ctx.sign_in().await?;
    let id = ctx.session.add_story(&args.title).await?;
    println!("{id}");
    Ok(())
}

pub async fn story_update(ctx: &CommandContext, args: StoryUpdateArgs) -> anyhow::Result<()> {
    ctx.sign_in().await?;
    if !ctx.session.stories()?.iter().any(|s| s.id == args.story) {
        anyhow::bail!("story not found: {}", args.story);
    }
    ctx.session.select_story(&args.story, false).await?;
    ctx.session
        .update_story(&args.title, &args.description)
        .await?;
    Ok(())
}

pub async fn chapter_list(ctx: &CommandContext, args: ChapterListArgs) -> anyhow::Result<()> {
    ctx.session.select_story(&args.story, false).await?;
    let mut out = std::io::stdout().lock();
    for chapter in ctx.session.chapters()? {
        let stats = ChapterStats::from_contents(&chapter.contents);
        writeln!(out, "{}\t{}\t{}", chapter.id, chapter.title, stats)?;
    }
    Ok(())
}

pub async fn chapter_add(ctx: &CommandContext, args: ChapterAddArgs) -> anyhow::Result<()> {
    ctx.session.select_story(&args.story, false).await?;
    let id = ctx.session.add_chapter(&args.title).await?;
    println!("{id}");
    Ok(())
}

pub async fn chapter_show(ctx: &CommandContext, args: ChapterRef) -> anyhow::Result<()> {
    let editor = ctx.open_chapter(&args).await?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "# {}", editor.title()?)?;
    for block in editor.sorted_blocks()? {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            block.index,
            block.id,
            block.kind,
            block.content.replace('\n', "\\n")
        )?;
    }
    writeln!(out, "-- {}", editor.stats()?)?;
    Ok(())
}

pub async fn chapter_rename(ctx: &CommandContext, args: ChapterRenameArgs) -> anyhow::Result<()> {
    let editor = ctx.open_chapter(&args.chapter).await?;
    editor.set_title(args.title)?;
    editor.flush().await.context("save chapter")?;
    Ok(())
}

pub async fn content_add(ctx: &CommandContext, args: ContentAddArgs) -> anyhow::Result<()> {
    let kind = ContentBlockType::parse(&args.kind)?;
    let editor = ctx.open_chapter(&args.chapter).await?;
    let id = editor.add_block(kind).await?;
    println!("{id}");
    Ok(())
}

pub async fn content_set(ctx: &CommandContext, args: ContentSetArgs) -> anyhow::Result<()> {
    let editor = ctx.open_chapter(&args.chapter).await?;
    editor.set_block_content(&args.content_id, args.text)?;
    editor.flush().await.context("save chapter")?;
    Ok(())
}

pub async fn content_move(ctx: &CommandContext, args: ContentMoveArgs) -> anyhow::Result<()> {
    let editor = ctx.open_chapter(&args.chapter).await?;
    editor.move_block(&args.moved, &args.target)?;
    editor.flush().await.context("save chapter")?;
    let mut out = std::io::stdout().lock();
    for id in editor.sorted_ids()? {
        writeln!(out, "{id}")?;
    }
    Ok(())
}

pub async fn content_delete(ctx: &CommandContext, args: ContentDeleteArgs) -> anyhow::Result<()> {
    let editor = ctx.open_chapter(&args.chapter).await?;
    editor.delete_block(&args.content_id).await?;
    Ok(())
}

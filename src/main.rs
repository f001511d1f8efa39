use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use whitespace::cli::{ChapterCommand, Cli, Command, ContentCommand, StoryCommand};
use whitespace::commands::{self, CommandContext};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    whitespace::logging::init("warn").context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let ctx = CommandContext::from_args(cli.store)?;
    match cli.command {
        Command::Story {
            command: StoryCommand::List,
        } => commands::story_list(&ctx).await.context("story list")?,
        Command::Story {
            command: StoryCommand::Add(args),
        } => commands::story_add(&ctx, args).await.context("story add")?,
        Command::Story {
            command: StoryCommand::Update(args),
        } => commands::story_update(&ctx, args)
            .await
            .context("story update")?,
        Command::Chapter {
            command: ChapterCommand::List(args),
        } => commands::chapter_list(&ctx, args)
            .await
            .context("chapter list")?,
        Command::Chapter {
            command: ChapterCommand::Add(args),
        } => commands::chapter_add(&ctx, args)
            .await
            .context("chapter add")?,
        Command::Chapter {
            command: ChapterCommand::Show(args),
        } => commands::chapter_show(&ctx, args)
            .await
            .context("chapter show")?,
        Command::Chapter {
            command: ChapterCommand::Rename(args),
        } => commands::chapter_rename(&ctx, args)
            .await
            .context("chapter rename")?,
        Command::Content {
            command: ContentCommand::Add(args),
        } => commands::content_add(&ctx, args)
            .await
            .context("content add")?,
        Command::Content {
            command: ContentCommand::Set(args),
        } => commands::content_set(&ctx, args)
            .await
            .context("content set")?,
        Command::Content {
            command: ContentCommand::Move(args),
        } => commands::content_move(&ctx, args)
            .await
            .context("content move")?,
        Command::Content {
            command: ContentCommand::Delete(args),
        } => commands::content_delete(&ctx, args)
            .await
            .context("content delete")?,
    }

    Ok(())
}

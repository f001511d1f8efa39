mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;
use whitespace::autosave::{SaveEvent, SavePhase};
use whitespace::config::EditorConfig;
use whitespace::editor::ChapterEditor;
use whitespace::persistence::PersistenceClient;
use whitespace::reconcile::{MergeDecision, MergePolicy};

use support::{CountingStore, seed_chapter};

const DEBOUNCE: Duration = Duration::from_millis(2000);

fn config() -> EditorConfig {
    EditorConfig {
        debounce: DEBOUNCE,
        ..Default::default()
    }
}

async fn open(
    blocks: &[&str],
    config: EditorConfig,
) -> anyhow::Result<(Arc<CountingStore>, PersistenceClient, String, ChapterEditor)> {
    let store = CountingStore::new();
    let client = PersistenceClient::new(store.clone());
    let (story, chapter) = seed_chapter(&client, blocks).await?;
    let editor = ChapterEditor::open(client.clone(), &story, &chapter, config);
    Ok((store, client, story, editor))
}

#[tokio::test(start_paused = true)]
async fn edits_within_one_window_coalesce_into_one_save() -> anyhow::Result<()> {
    let (store, client, story, editor) = open(&["draft"], config()).await?;
    let block = editor.sorted_ids()?[0].clone();
    let mut events = editor.subscribe();

    for n in 0..10 {
        editor.set_block_content(&block, format!("draft {n}"))?;
        editor.set_title(format!("Title {n}"))?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.updates(), 0);

    let event = events.recv().await?;
    assert!(matches!(event, SaveEvent::Saved { cycle: 1, writes: 2, .. }));
    assert_eq!(store.updates(), 2);

    tokio::time::sleep(DEBOUNCE * 5).await;
    assert_eq!(store.updates(), 2);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    let stored = client
        .get_chapter(&story, editor.chapter_id())
        .await?
        .unwrap();
    assert_eq!(stored.title, "Title 9");
    assert_eq!(stored.contents[&block].content, "draft 9");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn later_edits_do_not_push_the_timer_back() -> anyhow::Result<()> {
    let (_store, _client, _story, editor) = open(&["a"], config()).await?;
    let mut events = editor.subscribe();

    let started = Instant::now();
    editor.set_title("first")?;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(editor.phase(), SavePhase::PendingSave);
    editor.set_title("second")?;

    events.recv().await?;
    let elapsed = started.elapsed();
    assert!(elapsed >= DEBOUNCE, "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(3000), "{elapsed:?}");
    assert_eq!(editor.title()?, "second");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn edit_during_save_is_captured_by_next_cycle() -> anyhow::Result<()> {
    let (store, client, story, editor) = open(
        &["a"],
        EditorConfig {
            merge_policy: MergePolicy::RejectDirty,
            ..config()
        },
    )
    .await?;
    store.delay_updates(Duration::from_millis(500));
    let block = editor.sorted_ids()?[0].clone();
    let mut events = editor.subscribe();
    let mut phase = editor.watch_phase();

    editor.set_block_content(&block, "one")?;
    phase.wait_for(|p| *p == SavePhase::Saving).await?;
    editor.set_block_content(&block, "two")?;
    assert_eq!(editor.phase(), SavePhase::Saving);

    let first = events.recv().await?;
    assert!(matches!(
        first,
        SaveEvent::Saved {
            cycle: 1,
            reload: Some(MergeDecision::Keep),
            ..
        }
    ));
    assert_eq!(editor.phase(), SavePhase::PendingSave);

    let second = events.recv().await?;
    assert!(matches!(second, SaveEvent::Saved { cycle: 2, .. }));
    assert_eq!(store.updates(), 2);
    assert_eq!(store.max_in_flight_updates.load(Ordering::SeqCst), 1);

    let stored = client
        .get_chapter(&story, editor.chapter_id())
        .await?
        .unwrap();
    assert_eq!(stored.contents[&block].content, "two");
    assert_eq!(editor.sorted_blocks()?[0].content, "two");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn edit_during_save_survives_reload_under_default_policy() -> anyhow::Result<()> {
    let (store, client, story, editor) = open(&["a"], config()).await?;
    assert_eq!(config().merge_policy, MergePolicy::BlockCount);
    store.delay_updates(Duration::from_millis(500));
    let block = editor.sorted_ids()?[0].clone();
    let mut events = editor.subscribe();
    let mut phase = editor.watch_phase();

    editor.set_block_content(&block, "one")?;
    phase.wait_for(|p| *p == SavePhase::Saving).await?;
    editor.set_block_content(&block, "two")?;

    let first = events.recv().await?;
    assert!(matches!(
        first,
        SaveEvent::Saved {
            cycle: 1,
            reload: Some(MergeDecision::Keep),
            ..
        }
    ));
    assert_eq!(editor.sorted_blocks()?[0].content, "two");
    assert!(editor.is_dirty()?);
    assert_eq!(editor.phase(), SavePhase::PendingSave);

    let second = events.recv().await?;
    assert!(matches!(
        second,
        SaveEvent::Saved {
            cycle: 2,
            reload: Some(MergeDecision::Replace),
            ..
        }
    ));
    assert_eq!(store.updates(), 2);
    let stored = client
        .get_chapter(&story, editor.chapter_id())
        .await?
        .unwrap();
    assert_eq!(stored.contents[&block].content, "two");
    assert_eq!(editor.sorted_blocks()?[0].content, "two");
    assert!(!editor.is_dirty()?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reject_dirty_treats_outstanding_writes_as_pending() -> anyhow::Result<()> {
    let (store, client, story, editor) = open(
        &["a"],
        EditorConfig {
            merge_policy: MergePolicy::RejectDirty,
            ..config()
        },
    )
    .await?;
    store.delay_updates(Duration::from_millis(500));
    let block = editor.sorted_ids()?[0].clone();
    let mut events = editor.subscribe();
    let mut phase = editor.watch_phase();

    editor.set_block_content(&block, "saved text")?;
    phase.wait_for(|p| *p == SavePhase::Saving).await?;
    assert!(!editor.is_dirty()?);

    let before_write = client
        .get_chapter(&story, editor.chapter_id())
        .await?
        .unwrap();
    assert_eq!(editor.apply_remote(&before_write)?, MergeDecision::Keep);
    assert_eq!(editor.sorted_blocks()?[0].content, "saved text");

    let saved = events.recv().await?;
    assert!(matches!(
        saved,
        SaveEvent::Saved {
            reload: Some(MergeDecision::Replace),
            ..
        }
    ));
    assert_eq!(editor.phase(), SavePhase::Idle);

    let after_write = client
        .get_chapter(&story, editor.chapter_id())
        .await?
        .unwrap();
    assert_eq!(editor.apply_remote(&after_write)?, MergeDecision::Replace);
    assert_eq!(editor.sorted_blocks()?[0].content, "saved text");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn saving_identical_content_twice_writes_twice_and_keeps_shape() -> anyhow::Result<()> {
    let (store, _client, _story, editor) = open(&["same"], config()).await?;
    let block = editor.sorted_ids()?[0].clone();

    editor.set_block_content(&block, "same")?;
    editor.flush().await?;
    let title_after_first = editor.title()?;
    let keys_after_first = editor.sorted_ids()?;

    editor.set_block_content(&block, "same")?;
    editor.flush().await?;

    assert_eq!(store.updates(), 2);
    assert_eq!(editor.title()?, title_after_first);
    assert_eq!(editor.sorted_ids()?, keys_after_first);
    assert_eq!(editor.sorted_blocks()?[0].content, "same");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_save_is_reported_and_retried() -> anyhow::Result<()> {
    let (store, client, story, editor) = open(&["a"], config()).await?;
    store.fail_next_updates(1);
    let block = editor.sorted_ids()?[0].clone();
    let mut events = editor.subscribe();

    editor.set_block_content(&block, "persist me")?;

    match events.recv().await? {
        SaveEvent::Failed {
            cycle,
            errors,
            retry_scheduled,
        } => {
            assert_eq!(cycle, 1);
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("injected update failure"), "{errors:?}");
            assert!(retry_scheduled);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(editor.phase(), SavePhase::PendingSave);

    let retried = events.recv().await?;
    assert!(matches!(retried, SaveEvent::Saved { cycle: 2, .. }));
    let stored = client
        .get_chapter(&story, editor.chapter_id())
        .await?
        .unwrap();
    assert_eq!(stored.contents[&block].content, "persist me");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_wait_for_next_edit() -> anyhow::Result<()> {
    let (store, client, story, editor) = open(
        &["a"],
        EditorConfig {
            max_retries: 0,
            ..config()
        },
    )
    .await?;
    store.fail_next_updates(1);
    let block = editor.sorted_ids()?[0].clone();
    let mut events = editor.subscribe();

    editor.set_block_content(&block, "lost?")?;
    let failed = events.recv().await?;
    assert!(matches!(
        failed,
        SaveEvent::Failed {
            retry_scheduled: false,
            ..
        }
    ));
    assert_eq!(editor.phase(), SavePhase::Idle);
    assert!(editor.is_dirty()?);

    tokio::time::sleep(DEBOUNCE * 5).await;
    assert_eq!(store.updates(), 1);

    editor.set_title("Renamed")?;
    let saved = events.recv().await?;
    assert!(matches!(saved, SaveEvent::Saved { writes: 2, .. }));
    let stored = client
        .get_chapter(&story, editor.chapter_id())
        .await?
        .unwrap();
    assert_eq!(stored.title, "Renamed");
    assert_eq!(stored.contents[&block].content, "lost?");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn flush_surfaces_write_errors() -> anyhow::Result<()> {
    let (store, _client, _story, editor) = open(&[], config()).await?;
    store.fail_next_updates(1);
    editor.set_title("x")?;

    let err = editor.flush().await.unwrap_err();
    assert!(format!("{err:#}").contains("save failed"));
    assert!(editor.is_dirty()?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn remote_with_different_block_count_does_not_clobber_local_edits() -> anyhow::Result<()> {
    let (_store, client, story, editor) = open(&["a"], config()).await?;
    editor.set_title("Local title")?;

    let mut remote = client
        .get_chapter(&story, editor.chapter_id())
        .await?
        .unwrap();
    remote.title = "Remote title".to_string();
    let mut extra = remote.contents.values().next().unwrap().clone();
    extra.id = "extra".to_string();
    remote.contents.insert(extra.id.clone(), extra);

    assert_eq!(editor.apply_remote(&remote)?, MergeDecision::Keep);
    assert_eq!(editor.title()?, "Local title");
    assert_eq!(editor.sorted_ids()?.len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn remote_with_equal_block_count_replaces_working_copy() -> anyhow::Result<()> {
    let (_store, client, story, editor) = open(&["a"], config()).await?;
    let block = editor.sorted_ids()?[0].clone();
    editor.set_title("Local title")?;
    editor.set_block_content(&block, "local text")?;

    let mut remote = client
        .get_chapter(&story, editor.chapter_id())
        .await?
        .unwrap();
    remote.title = "Remote title".to_string();

    assert_eq!(editor.apply_remote(&remote)?, MergeDecision::Replace);
    assert_eq!(editor.title()?, "Remote title");
    assert_eq!(editor.sorted_blocks()?[0].content, "a");
    assert!(!editor.is_dirty()?);
    Ok(())
}

#[tokio::test]
async fn failed_delete_leaves_working_copy_unchanged() -> anyhow::Result<()> {
    let (store, _client, _story, editor) = open(&["a", "b"], config()).await?;
    store.fail_deletes(1);
    let ids = editor.sorted_ids()?;

    let err = editor.delete_block(&ids[0]).await.unwrap_err();
    assert!(format!("{err:#}").contains("injected delete failure"));
    assert_eq!(editor.sorted_ids()?, ids);

    editor.delete_block(&ids[0]).await?;
    assert_eq!(editor.sorted_ids()?, vec![ids[1].clone()]);
    Ok(())
}

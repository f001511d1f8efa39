//! Debounced persistence of one open chapter.
//!
//! ```text
//! Idle --edit--> PendingSave --timer--> Saving --settled--> Idle
//!                    ^ edits do not reset the timer    |
//!                    +-------- edits made while saving or retry
//! ```
//!
//! At most one save round-trip per chapter is in flight. Writes of one
//! cycle run concurrently and the chapter is reloaded only after all of
//! them settle.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

use crate::config::EditorConfig;
use crate::model::{Chapter, ChapterId, ContentId, StoryId};
use crate::persistence::PersistenceClient;
use crate::reconcile::{self, MergeDecision};
use crate::working_copy::{SaveBatch, WorkingCopy};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    Idle,
    PendingSave,
    Saving,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveEvent {
    Saved {
        cycle: u64,
        writes: usize,
        /// `None` when the follow-up reload failed.
        reload: Option<MergeDecision>,
        modified_at: Option<DateTime<Utc>>,
    },
    Failed {
        cycle: u64,
        errors: Vec<String>,
        retry_scheduled: bool,
    },
}

/// Result of a save cycle run through [`AutosaveCoordinator::flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    NothingToSave,
    Saved { writes: usize },
}

enum WriteTarget {
    Title,
    Block(ContentId),
}

enum CycleOutcome {
    Saved { writes: usize },
    Failed { errors: Vec<String> },
}

#[derive(Clone)]
pub struct AutosaveCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AutosaveCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutosaveCoordinator")
            .field("story_id", &self.shared.story_id)
            .field("chapter_id", &self.shared.chapter_id)
            .field("phase", &*self.shared.phase_tx.borrow())
            .finish()
    }
}

struct Shared {
    client: PersistenceClient,
    story_id: StoryId,
    chapter_id: ChapterId,
    config: EditorConfig,
    state: Mutex<State>,
    phase_tx: watch::Sender<SavePhase>,
    events: broadcast::Sender<SaveEvent>,
}

struct State {
    working: WorkingCopy,
    phase: SavePhase,
    /// Identifies the live debounce timer; stale timers compare unequal.
    timer_token: u64,
    cycle: u64,
    failed_cycles: u32,
    /// Writes of the current cycle have not settled yet.
    writes_in_flight: bool,
    edited_during_save: bool,
}

impl State {
    /// Local changes exist that the store has not confirmed: a timer is
    /// pending, writes are outstanding, or edits arrived during a save.
    fn save_pending(&self) -> bool {
        self.phase == SavePhase::PendingSave || self.writes_in_flight || self.edited_during_save
    }
}

impl AutosaveCoordinator {
    pub fn new(
        client: PersistenceClient,
        story_id: impl Into<StoryId>,
        chapter: &Chapter,
        config: EditorConfig,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SavePhase::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                client,
                story_id: story_id.into(),
                chapter_id: chapter.id.clone(),
                config,
                state: Mutex::new(State {
                    working: WorkingCopy::from_chapter(chapter),
                    phase: SavePhase::Idle,
                    timer_token: 0,
                    cycle: 0,
                    failed_cycles: 0,
                    writes_in_flight: false,
                    edited_during_save: false,
                }),
                phase_tx,
                events,
            }),
        }
    }

    pub fn story_id(&self) -> &str {
        &self.shared.story_id
    }

    pub fn chapter_id(&self) -> &str {
        &self.shared.chapter_id
    }

    pub fn config(&self) -> &EditorConfig {
        &self.shared.config
    }

    pub fn client(&self) -> &PersistenceClient {
        &self.shared.client
    }

    pub fn phase(&self) -> SavePhase {
        *self.shared.phase_tx.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SavePhase> {
        self.shared.phase_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.shared.events.subscribe()
    }

    pub fn read<R>(&self, f: impl FnOnce(&WorkingCopy) -> R) -> anyhow::Result<R> {
        let state = self.shared.lock()?;
        Ok(f(&state.working))
    }

    /// Applies a local edit. `f` marks what it touched; if anything is
    /// touched afterwards a save is scheduled.
    pub fn edit<R>(
        &self,
        f: impl FnOnce(&mut WorkingCopy) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        let mut state = self.shared.lock()?;
        let result = f(&mut state.working)?;
        if state.working.is_dirty() {
            self.shared.on_local_change(&mut state);
        }
        Ok(result)
    }

    /// Reconciles a freshly fetched chapter into the working copy.
    pub fn apply_remote(&self, remote: &Chapter) -> anyhow::Result<MergeDecision> {
        if remote.id != self.shared.chapter_id {
            anyhow::bail!(
                "chapter mismatch: editor holds {}, got {}",
                self.shared.chapter_id,
                remote.id
            );
        }
        let mut state = self.shared.lock()?;
        let save_pending = state.save_pending();
        Ok(reconcile::reconcile(
            &mut state.working,
            remote,
            self.shared.config.merge_policy,
            save_pending,
        ))
    }

    /// Saves immediately instead of waiting for the debounce timer. A save
    /// already in flight is awaited first.
    pub async fn flush(&self) -> anyhow::Result<FlushOutcome> {
        let mut phase_rx = self.shared.phase_tx.subscribe();
        loop {
            let started = {
                let mut state = self.shared.lock()?;
                match state.phase {
                    SavePhase::Saving => None,
                    SavePhase::PendingSave | SavePhase::Idle => {
                        // Invalidates a pending timer.
                        state.timer_token += 1;
                        Some(self.shared.begin_cycle(&mut state))
                    }
                }
            };
            match started {
                None => {
                    phase_rx
                        .wait_for(|phase| *phase != SavePhase::Saving)
                        .await
                        .context("wait for in-flight save")?;
                }
                Some(None) => return Ok(FlushOutcome::NothingToSave),
                Some(Some((cycle, batch))) => {
                    return match self.shared.run_cycle(cycle, batch).await {
                        CycleOutcome::Saved { writes } => Ok(FlushOutcome::Saved { writes }),
                        CycleOutcome::Failed { errors } => {
                            anyhow::bail!("save failed: {}", errors.join("; "))
                        }
                    };
                }
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> anyhow::Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("autosave state lock is poisoned"))
    }

    fn set_phase(&self, state: &mut State, phase: SavePhase) {
        state.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn on_local_change(self: &Arc<Self>, state: &mut State) {
        match state.phase {
            SavePhase::Idle => self.start_timer(state),
            SavePhase::PendingSave => {}
            SavePhase::Saving => state.edited_during_save = true,
        }
    }

    fn start_timer(self: &Arc<Self>, state: &mut State) {
        state.timer_token += 1;
        let token = state.timer_token;
        self.set_phase(state, SavePhase::PendingSave);

        let shared = Arc::clone(self);
        let delay = self.config.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.on_timer(token).await;
        });
    }

    async fn on_timer(self: &Arc<Self>, token: u64) {
        let started = match self.lock() {
            Ok(mut state) => {
                if state.phase != SavePhase::PendingSave || state.timer_token != token {
                    return;
                }
                self.begin_cycle(&mut state)
            }
            Err(err) => {
                tracing::error!(?err, "autosave timer could not read state");
                return;
            }
        };
        if let Some((cycle, batch)) = started {
            self.run_cycle(cycle, batch).await;
        }
    }

    /// Moves to `Saving` and captures the touched fields, or returns to
    /// `Idle` when nothing is touched.
    fn begin_cycle(&self, state: &mut State) -> Option<(u64, SaveBatch)> {
        let batch = state.working.take_batch();
        if batch.is_empty() {
            self.set_phase(state, SavePhase::Idle);
            return None;
        }
        state.cycle += 1;
        state.writes_in_flight = true;
        state.edited_during_save = false;
        self.set_phase(state, SavePhase::Saving);
        Some((state.cycle, batch))
    }

    async fn run_cycle(self: &Arc<Self>, cycle: u64, batch: SaveBatch) -> CycleOutcome {
        tracing::debug!(
            story_id = %self.story_id,
            chapter_id = %self.chapter_id,
            cycle,
            writes = batch.write_count(),
            "saving chapter"
        );

        let written = self.write_batch(&batch).await;
        match self.lock() {
            Ok(mut state) => state.writes_in_flight = false,
            Err(err) => tracing::error!(?err, "autosave could not record settled writes"),
        }

        let outcome = match written {
            Ok(()) => {
                let reload = self.reload().await;
                self.finish_saved(cycle, batch.write_count(), reload)
            }
            Err((failed_title, failed_blocks, errors)) => {
                self.finish_failed(cycle, failed_title, failed_blocks, errors)
            }
        };

        match self.lock() {
            Ok(mut state) => {
                let reschedule = state.edited_during_save
                    || matches!(&outcome, CycleOutcome::Failed { .. }) && state.failed_cycles > 0;
                state.edited_during_save = false;
                self.set_phase(&mut state, SavePhase::Idle);
                if reschedule && state.working.is_dirty() {
                    self.start_timer(&mut state);
                }
            }
            Err(err) => {
                tracing::error!(?err, "autosave could not settle state");
                self.phase_tx.send_replace(SavePhase::Idle);
            }
        }
        outcome
    }

    /// Issues every write of the batch concurrently and waits for all of
    /// them. On failure returns which writes failed.
    async fn write_batch(
        &self,
        batch: &SaveBatch,
    ) -> Result<(), (bool, Vec<ContentId>, Vec<String>)> {
        let mut tasks = JoinSet::new();
        if let Some(title) = batch.title.clone() {
            let client = self.client.clone();
            let story_id = self.story_id.clone();
            let chapter_id = self.chapter_id.clone();
            tasks.spawn(async move {
                let result = client.update_chapter(&story_id, &chapter_id, &title).await;
                (WriteTarget::Title, result)
            });
        }
        for (content_id, patch) in batch.blocks.clone() {
            let client = self.client.clone();
            let story_id = self.story_id.clone();
            let chapter_id = self.chapter_id.clone();
            tasks.spawn(async move {
                let result = client
                    .update_chapter_content(&story_id, &chapter_id, &content_id, &patch)
                    .await;
                (WriteTarget::Block(content_id), result)
            });
        }

        let mut failed_title = false;
        let mut failed_blocks = Vec::new();
        let mut errors = Vec::new();
        let mut lost_task = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((WriteTarget::Title, Err(err))) => {
                    failed_title = true;
                    errors.push(format!("{err:#}"));
                }
                Ok((WriteTarget::Block(id), Err(err))) => {
                    failed_blocks.push(id);
                    errors.push(format!("{err:#}"));
                }
                Err(err) => {
                    lost_task = true;
                    errors.push(format!("save task aborted: {err}"));
                }
            }
        }

        if errors.is_empty() {
            return Ok(());
        }
        if lost_task {
            failed_title = batch.title.is_some();
            failed_blocks = batch.blocks.iter().map(|(id, _)| id.clone()).collect();
        }
        Err((failed_title, failed_blocks, errors))
    }

    async fn reload(&self) -> anyhow::Result<Option<Chapter>> {
        self.client
            .get_chapter(&self.story_id, &self.chapter_id)
            .await
            .context("reload chapter after save")
    }

    fn finish_saved(
        &self,
        cycle: u64,
        writes: usize,
        reload: anyhow::Result<Option<Chapter>>,
    ) -> CycleOutcome {
        let (decision, modified_at) = match self.lock() {
            Ok(mut state) => {
                let state = &mut *state;
                state.failed_cycles = 0;
                let save_pending = state.save_pending();
                let decision = match &reload {
                    // Edits made while saving are newer than anything the
                    // reload can hold.
                    Ok(Some(remote)) if state.edited_during_save => {
                        Some(reconcile::keep_local(&mut state.working, remote))
                    }
                    Ok(Some(remote)) => Some(reconcile::reconcile(
                        &mut state.working,
                        remote,
                        self.config.merge_policy,
                        save_pending,
                    )),
                    Ok(None) => {
                        tracing::warn!(chapter_id = %self.chapter_id, "chapter vanished after save");
                        None
                    }
                    Err(err) => {
                        tracing::warn!(chapter_id = %self.chapter_id, ?err, "reload after save failed");
                        None
                    }
                };
                (decision, state.working.modified_at)
            }
            Err(err) => {
                tracing::error!(?err, "autosave could not apply reload");
                (None, None)
            }
        };

        tracing::info!(
            story_id = %self.story_id,
            chapter_id = %self.chapter_id,
            cycle,
            writes,
            "chapter saved"
        );
        let _ = self.events.send(SaveEvent::Saved {
            cycle,
            writes,
            reload: decision,
            modified_at,
        });
        CycleOutcome::Saved { writes }
    }

    fn finish_failed(
        &self,
        cycle: u64,
        failed_title: bool,
        failed_blocks: Vec<ContentId>,
        errors: Vec<String>,
    ) -> CycleOutcome {
        let retry_scheduled = match self.lock() {
            Ok(mut state) => {
                state.working.restore(failed_title, failed_blocks);
                state.failed_cycles += 1;
                if state.failed_cycles <= self.config.max_retries {
                    true
                } else {
                    state.failed_cycles = 0;
                    false
                }
            }
            Err(err) => {
                tracing::error!(?err, "autosave could not restore failed writes");
                false
            }
        };

        tracing::warn!(
            story_id = %self.story_id,
            chapter_id = %self.chapter_id,
            cycle,
            failures = errors.len(),
            retry_scheduled,
            "chapter save failed"
        );
        let _ = self.events.send(SaveEvent::Failed {
            cycle,
            errors: errors.clone(),
            retry_scheduled,
        });
        CycleOutcome::Failed { errors }
    }
}

//! Which story and chapter are open, and the lists they were picked from.
//!
//! A `Session` is a cloneable handle to one shared state container. The
//! identity is written only through [`Session::sign_in`] and
//! [`Session::sign_out`]. Every fetch takes a generation token; a response
//! arriving after a newer request was issued is discarded.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::autosave::SaveEvent;
use crate::config::EditorConfig;
use crate::editor::ChapterEditor;
use crate::model::{Chapter, ChapterId, Identity, Story, StoryId};
use crate::persistence::PersistenceClient;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub stories: Vec<Story>,
    pub chapters: Vec<Chapter>,
    pub selected_story: Option<StoryId>,
    pub selected_chapter: Option<Chapter>,
}

#[derive(Debug, Default)]
struct SessionState {
    view: SessionSnapshot,
    stories_generation: u64,
    chapters_generation: u64,
}

/// Whether a fetch result was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    Stale,
}

#[derive(Debug, Clone)]
pub struct Session {
    client: PersistenceClient,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub fn new(client: PersistenceClient) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn client(&self) -> &PersistenceClient {
        &self.client
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("session state lock is poisoned"))
    }

    pub fn snapshot(&self) -> anyhow::Result<SessionSnapshot> {
        Ok(self.lock()?.view.clone())
    }

    pub fn identity(&self) -> anyhow::Result<Option<Identity>> {
        Ok(self.lock()?.view.identity.clone())
    }

    pub fn stories(&self) -> anyhow::Result<Vec<Story>> {
        Ok(self.lock()?.view.stories.clone())
    }

    pub fn chapters(&self) -> anyhow::Result<Vec<Chapter>> {
        Ok(self.lock()?.view.chapters.clone())
    }

    pub fn selected_story(&self) -> anyhow::Result<Option<StoryId>> {
        Ok(self.lock()?.view.selected_story.clone())
    }

    pub fn selected_chapter(&self) -> anyhow::Result<Option<Chapter>> {
        Ok(self.lock()?.view.selected_chapter.clone())
    }

    /// Replaces the identity, drops everything loaded for the previous
    /// user and loads the new user's stories.
    pub async fn sign_in(&self, identity: Identity) -> anyhow::Result<FetchOutcome> {
        {
            let mut state = self.lock()?;
            tracing::info!(uid = %identity.uid, "signed in");
            state.view = SessionSnapshot {
                identity: Some(identity),
                ..SessionSnapshot::default()
            };
            state.stories_generation += 1;
            state.chapters_generation += 1;
        }
        self.load_stories().await
    }

    pub fn sign_out(&self) -> anyhow::Result<()> {
        let mut state = self.lock()?;
        state.view = SessionSnapshot::default();
        state.stories_generation += 1;
        state.chapters_generation += 1;
        tracing::info!("signed out");
        Ok(())
    }

    /// Without an identity the story list is emptied. Read failures are
    /// logged and surface as an empty list.
    pub async fn load_stories(&self) -> anyhow::Result<FetchOutcome> {
        let (generation, owner) = {
            let mut state = self.lock()?;
            state.stories_generation += 1;
            let owner = state.view.identity.as_ref().map(|i| i.uid.clone());
            (state.stories_generation, owner)
        };

        let stories = match owner {
            Some(owner) => match self.client.get_user_stories(&owner).await {
                Ok(stories) => stories,
                Err(err) => {
                    tracing::warn!(?err, "load stories failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut state = self.lock()?;
        if state.stories_generation != generation {
            tracing::debug!(generation, "discarding stale story list");
            return Ok(FetchOutcome::Stale);
        }
        state.view.stories = stories;
        Ok(FetchOutcome::Applied)
    }

    /// Loads the chapters of `story_id` with their blocks. The first chapter
    /// is selected when nothing is selected yet or `autoselect` is set;
    /// otherwise the selection is refreshed from the fetched list.
    pub async fn select_story(
        &self,
        story_id: &str,
        autoselect: bool,
    ) -> anyhow::Result<FetchOutcome> {
        let generation = {
            let mut state = self.lock()?;
            if state.view.selected_story.as_deref() != Some(story_id) {
                state.view.selected_chapter = None;
            }
            state.view.selected_story = Some(story_id.to_string());
            state.chapters_generation += 1;
            state.chapters_generation
        };

        let chapters = match self.client.load_chapters_with_contents(story_id).await {
            Ok(chapters) => chapters,
            Err(err) => {
                tracing::warn!(story_id, ?err, "load chapters failed");
                Vec::new()
            }
        };

        let mut state = self.lock()?;
        if state.chapters_generation != generation {
            tracing::debug!(story_id, generation, "discarding stale chapter list");
            return Ok(FetchOutcome::Stale);
        }
        let selected = match (&state.view.selected_chapter, autoselect) {
            (Some(current), false) => chapters
                .iter()
                .find(|c| c.id == current.id)
                .or_else(|| chapters.first())
                .cloned(),
            _ => chapters.first().cloned(),
        };
        state.view.selected_chapter = selected;
        state.view.chapters = chapters;
        Ok(FetchOutcome::Applied)
    }

    /// Re-fetches the chapters of the selected story, keeping the selection.
    pub async fn reload_chapters(&self) -> anyhow::Result<FetchOutcome> {
        let Some(story_id) = self.selected_story()? else {
            return Ok(FetchOutcome::Applied);
        };
        self.select_story(&story_id, false).await
    }

    pub fn select_chapter(&self, chapter_id: &str) -> anyhow::Result<Chapter> {
        let mut state = self.lock()?;
        let chapter = state
            .view
            .chapters
            .iter()
            .find(|c| c.id == chapter_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("chapter not found: {chapter_id}"))?;
        state.view.selected_chapter = Some(chapter.clone());
        Ok(chapter)
    }

    /// Creates a story for the signed-in user and selects it once it shows
    /// up in the reloaded story list.
    pub async fn add_story(&self, title: &str) -> anyhow::Result<StoryId> {
        let owner = self
            .identity()?
            .ok_or_else(|| anyhow::anyhow!("cannot add a story without a signed-in user"))?;
        let id = self.client.add_story(&owner.uid, title).await?;
        self.load_stories().await?;

        let listed = self.lock()?.view.stories.iter().any(|s| s.id == id);
        if listed {
            self.select_story(&id, true).await?;
        } else {
            tracing::warn!(story_id = %id, "new story missing from reloaded list");
        }
        Ok(id)
    }

    pub async fn update_story(&self, title: &str, description: &str) -> anyhow::Result<()> {
        let story_id = self
            .selected_story()?
            .ok_or_else(|| anyhow::anyhow!("no story selected"))?;
        self.client
            .update_story(&story_id, title, description)
            .await?;
        self.load_stories().await?;
        Ok(())
    }

    /// Creates a chapter in the selected story and selects it once it shows
    /// up in the reloaded chapter list.
    pub async fn add_chapter(&self, title: &str) -> anyhow::Result<ChapterId> {
        let story_id = self
            .selected_story()?
            .ok_or_else(|| anyhow::anyhow!("no story selected"))?;
        let id = self.client.add_chapter(&story_id, title).await?;
        self.select_story(&story_id, false).await?;

        if self.select_chapter(&id).is_err() {
            tracing::warn!(chapter_id = %id, "new chapter missing from reloaded list");
        }
        Ok(id)
    }

    /// Editor over the selected chapter. Every successful save of the
    /// editor reloads the chapter list so the session reflects the store.
    /// Must be called inside a Tokio runtime.
    pub fn open_editor(&self, config: EditorConfig) -> anyhow::Result<ChapterEditor> {
        let editor = {
            let state = self.lock()?;
            let story_id = state
                .view
                .selected_story
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no story selected"))?;
            let chapter = state
                .view
                .selected_chapter
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("no chapter selected"))?;
            ChapterEditor::open(self.client.clone(), story_id, chapter, config)
        };
        self.follow_saves(&editor);
        Ok(editor)
    }

    /// Runs until the editor is dropped.
    fn follow_saves(&self, editor: &ChapterEditor) {
        let mut events = editor.subscribe();
        let story_id = editor.story_id().to_string();
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SaveEvent::Saved { .. }) => {
                        if let Err(err) = session.refresh_after_save(&story_id).await {
                            tracing::warn!(story_id = %story_id, ?err, "refresh after save failed");
                        }
                    }
                    Ok(SaveEvent::Failed { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "save events lagged");
                        if let Err(err) = session.refresh_after_save(&story_id).await {
                            tracing::warn!(story_id = %story_id, ?err, "refresh after save failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Reloads the chapter list if `story_id` is still the selected story.
    async fn refresh_after_save(&self, story_id: &str) -> anyhow::Result<()> {
        if self.selected_story()?.as_deref() != Some(story_id) {
            return Ok(());
        }
        self.select_story(story_id, false).await?;
        Ok(())
    }
}

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use whitespace::model::{Chapter, ContentBlockType, NewContentBlock};
use whitespace::persistence::PersistenceClient;
use whitespace::store::{
    CollectionPath, DocumentPath, DocumentStore, FieldFilter, Fields, MemoryDocumentStore,
    Snapshot,
};

/// In-memory store that counts calls and can inject latency and failures.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryDocumentStore,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub lists: AtomicUsize,
    pub gets: AtomicUsize,
    fail_next_updates: AtomicUsize,
    fail_deletes: AtomicUsize,
    in_flight_updates: AtomicUsize,
    pub max_in_flight_updates: AtomicUsize,
    update_delay: Mutex<Option<Duration>>,
    list_delays: Mutex<HashMap<String, Duration>>,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn fail_next_updates(&self, n: usize) {
        self.fail_next_updates.store(n, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, n: usize) {
        self.fail_deletes.store(n, Ordering::SeqCst);
    }

    pub fn delay_updates(&self, delay: Duration) {
        *self.update_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_list(&self, collection: &str, delay: Duration) {
        self.list_delays
            .lock()
            .unwrap()
            .insert(collection.to_string(), delay);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn list(
        &self,
        collection: &CollectionPath,
        filter: Option<&FieldFilter>,
    ) -> anyhow::Result<Vec<Snapshot>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .list_delays
            .lock()
            .unwrap()
            .get(&collection.to_string())
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.list(collection, filter).await
    }

    async fn get(&self, doc: &DocumentPath) -> anyhow::Result<Option<Snapshot>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(doc).await
    }

    async fn create(&self, collection: &CollectionPath, fields: Fields) -> anyhow::Result<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(collection, fields).await
    }

    async fn update(&self, doc: &DocumentPath, fields: Fields) -> anyhow::Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight_updates.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight_updates.fetch_max(now, Ordering::SeqCst);

        let delay = *self.update_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = if Self::take_failure(&self.fail_next_updates) {
            Err(anyhow::anyhow!("injected update failure: {doc}"))
        } else {
            self.inner.update(doc, fields).await
        };

        self.in_flight_updates.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, doc: &DocumentPath) -> anyhow::Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_deletes) {
            anyhow::bail!("injected delete failure: {doc}");
        }
        self.inner.delete(doc).await
    }
}

/// A story with one chapter holding `blocks` text blocks, loaded back.
pub async fn seed_chapter(
    client: &PersistenceClient,
    blocks: &[&str],
) -> anyhow::Result<(String, Chapter)> {
    let story = client.add_story("alice", "Saga").await?;
    let chapter_id = client.add_chapter(&story, "One").await?;
    for (index, text) in blocks.iter().enumerate() {
        client
            .add_chapter_content(
                &story,
                &chapter_id,
                &NewContentBlock {
                    kind: ContentBlockType::Text,
                    content: text.to_string(),
                    index: index as i64,
                },
            )
            .await?;
    }
    let chapter = client
        .get_chapter(&story, &chapter_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("seeded chapter missing"))?;
    Ok((story, chapter))
}

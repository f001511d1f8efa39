use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::store::{
    CollectionPath, DocumentPath, DocumentStore, FieldFilter, Fields, Snapshot, merge_update,
    new_document_id, stamp_created,
};

/// Process-local store. Collections keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, Vec<Snapshot>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, Vec<Snapshot>>>> {
        self.collections
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock is poisoned"))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(
        &self,
        collection: &CollectionPath,
        filter: Option<&FieldFilter>,
    ) -> anyhow::Result<Vec<Snapshot>> {
        let collections = self.lock()?;
        let Some(docs) = collections.get(&collection.to_string()) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|doc| filter.is_none_or(|f| f.matches(&doc.fields)))
            .cloned()
            .collect())
    }

    async fn get(&self, doc: &DocumentPath) -> anyhow::Result<Option<Snapshot>> {
        let collections = self.lock()?;
        Ok(collections
            .get(&doc.parent().to_string())
            .and_then(|docs| docs.iter().find(|d| d.id == doc.id()))
            .cloned())
    }

    async fn create(
        &self,
        collection: &CollectionPath,
        mut fields: Fields,
    ) -> anyhow::Result<String> {
        stamp_created(&mut fields, Utc::now());
        let id = new_document_id();
        let mut collections = self.lock()?;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(Snapshot {
                id: id.clone(),
                fields,
            });
        Ok(id)
    }

    async fn update(&self, doc: &DocumentPath, fields: Fields) -> anyhow::Result<()> {
        let mut collections = self.lock()?;
        let existing = collections
            .get_mut(&doc.parent().to_string())
            .and_then(|docs| docs.iter_mut().find(|d| d.id == doc.id()))
            .ok_or_else(|| anyhow::anyhow!("document not found: {doc}"))?;
        merge_update(&mut existing.fields, fields, Utc::now());
        Ok(())
    }

    async fn delete(&self, doc: &DocumentPath) -> anyhow::Result<()> {
        let mut collections = self.lock()?;
        if let Some(docs) = collections.get_mut(&doc.parent().to_string()) {
            docs.retain(|d| d.id != doc.id());
        }
        Ok(())
    }
}

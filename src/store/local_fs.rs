use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;

use crate::store::{
    CollectionPath, DocumentPath, DocumentStore, FieldFilter, Fields, Snapshot, merge_update,
    new_document_id, stamp_created,
};

/// Stores each document as `<base>/<collection>/<id>.json`. Subcollections
/// live in a directory named after the parent document id.
#[derive(Debug, Clone)]
pub struct LocalFsDocumentStore {
    base_dir: PathBuf,
}

impl LocalFsDocumentStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn collection_dir(&self, collection: &CollectionPath) -> PathBuf {
        collection
            .segments()
            .iter()
            .fold(self.base_dir.clone(), |dir, segment| dir.join(segment))
    }

    fn document_path(&self, doc: &DocumentPath) -> PathBuf {
        self.collection_dir(doc.parent())
            .join(format!("{}.json", doc.id()))
    }
}

#[async_trait]
impl DocumentStore for LocalFsDocumentStore {
    async fn list(
        &self,
        collection: &CollectionPath,
        filter: Option<&FieldFilter>,
    ) -> anyhow::Result<Vec<Snapshot>> {
        let dir = self.collection_dir(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read collection dir: {}", dir.display()));
            }
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("read collection dir: {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let id = id.to_string();
            let Some(fields) = read_json::<Fields>(&path)
                .await
                .with_context(|| format!("read: {}", path.display()))?
            else {
                continue;
            };
            if filter.is_some_and(|f| !f.matches(&fields)) {
                continue;
            }
            docs.push(Snapshot { id, fields });
        }

        docs.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(docs)
    }

    async fn get(&self, doc: &DocumentPath) -> anyhow::Result<Option<Snapshot>> {
        let path = self.document_path(doc);
        let fields = read_json::<Fields>(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?;
        Ok(fields.map(|fields| Snapshot {
            id: doc.id().to_string(),
            fields,
        }))
    }

    async fn create(
        &self,
        collection: &CollectionPath,
        mut fields: Fields,
    ) -> anyhow::Result<String> {
        stamp_created(&mut fields, Utc::now());
        let id = new_document_id();
        let doc = collection.doc(&id)?;
        let path = self.document_path(&doc);
        write_json_atomic(&path, &fields)
            .await
            .with_context(|| format!("create document: {doc}"))?;
        tracing::debug!(%doc, "created document");
        Ok(id)
    }

    async fn update(&self, doc: &DocumentPath, fields: Fields) -> anyhow::Result<()> {
        let path = self.document_path(doc);
        let mut existing = read_json::<Fields>(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
            .ok_or_else(|| anyhow::anyhow!("document not found: {doc}"))?;
        merge_update(&mut existing, fields, Utc::now());
        write_json_atomic(&path, &existing)
            .await
            .with_context(|| format!("update document: {doc}"))?;
        Ok(())
    }

    async fn delete(&self, doc: &DocumentPath) -> anyhow::Result<()> {
        let path = self.document_path(doc);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("delete: {}", path.display())),
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

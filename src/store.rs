pub mod http;
pub mod local_fs;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use http::HttpDocumentStore;
pub use local_fs::LocalFsDocumentStore;
pub use memory::MemoryDocumentStore;

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, serde_json::Value>;

pub const CREATED_FIELD: &str = "created";
pub const MODIFIED_FIELD: &str = "modified";

/// Path of a collection: `stories`, `stories/{id}/chapters`, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    segments: Vec<String>,
}

/// Path of a single document inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

/// Either kind of path, as parsed from a slash-separated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorePath {
    Collection(CollectionPath),
    Document(DocumentPath),
}

impl CollectionPath {
    pub fn root(name: &str) -> anyhow::Result<Self> {
        validate_segment(name)?;
        Ok(Self {
            segments: vec![name.to_string()],
        })
    }

    pub fn doc(&self, id: &str) -> anyhow::Result<DocumentPath> {
        validate_segment(id)?;
        Ok(DocumentPath {
            collection: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl DocumentPath {
    pub fn collection(&self, name: &str) -> anyhow::Result<CollectionPath> {
        validate_segment(name)?;
        let mut segments = self.collection.segments.clone();
        segments.push(self.id.clone());
        segments.push(name.to_string());
        Ok(CollectionPath { segments })
    }

    pub fn parent(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl StorePath {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let raw = raw.trim_matches('/');
        if raw.is_empty() {
            anyhow::bail!("store path is empty");
        }
        let segments = raw.split('/').collect::<Vec<_>>();
        for segment in &segments {
            validate_segment(segment)?;
        }
        let segments = segments
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if segments.len() % 2 == 1 {
            return Ok(Self::Collection(CollectionPath { segments }));
        }
        let mut segments = segments;
        let id = segments.pop().unwrap_or_default();
        Ok(Self::Document(DocumentPath {
            collection: CollectionPath { segments },
            id,
        }))
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

fn validate_segment(segment: &str) -> anyhow::Result<()> {
    if segment.is_empty() {
        anyhow::bail!("store path segment must not be empty");
    }
    if segment == "." || segment == ".." {
        anyhow::bail!("store path segment must not be '.' or '..': {segment}");
    }
    if segment.contains(['/', '\\']) {
        anyhow::bail!("store path segment must not contain separators: {segment}");
    }
    Ok(())
}

/// Equality filter applied when listing a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: serde_json::Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        fields.get(&self.field) == Some(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub fields: Fields,
}

impl Snapshot {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        timestamp_field(&self.fields, CREATED_FIELD)
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        timestamp_field(&self.fields, MODIFIED_FIELD)
    }
}

fn timestamp_field(fields: &Fields, name: &str) -> Option<DateTime<Utc>> {
    let raw = fields.get(name)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Hierarchical document persistence. Implementations own the `created`
/// and `modified` fields: values supplied by callers are overwritten.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents of a collection in creation order.
    async fn list(
        &self,
        collection: &CollectionPath,
        filter: Option<&FieldFilter>,
    ) -> anyhow::Result<Vec<Snapshot>>;
    async fn get(&self, doc: &DocumentPath) -> anyhow::Result<Option<Snapshot>>;
    /// Stores a new document and returns its generated id.
    async fn create(&self, collection: &CollectionPath, fields: Fields) -> anyhow::Result<String>;
    /// Shallow-merges `fields` into an existing document.
    async fn update(&self, doc: &DocumentPath, fields: Fields) -> anyhow::Result<()>;
    /// Deleting a missing document is not an error.
    async fn delete(&self, doc: &DocumentPath) -> anyhow::Result<()>;
}

pub(crate) fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub(crate) fn stamp_created(fields: &mut Fields, now: DateTime<Utc>) {
    fields.insert(CREATED_FIELD.to_string(), now.to_rfc3339().into());
    fields.insert(MODIFIED_FIELD.to_string(), now.to_rfc3339().into());
}

pub(crate) fn merge_update(existing: &mut Fields, fields: Fields, now: DateTime<Utc>) {
    for (key, value) in fields {
        if key == CREATED_FIELD {
            continue;
        }
        existing.insert(key, value);
    }
    existing.insert(MODIFIED_FIELD.to_string(), now.to_rfc3339().into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_odd_segments_is_collection() {
        let path = StorePath::parse("stories/s1/chapters").unwrap();
        let StorePath::Collection(collection) = path else {
            panic!("expected collection path");
        };
        assert_eq!(collection.to_string(), "stories/s1/chapters");
    }

    #[test]
    fn parse_even_segments_is_document() {
        let path = StorePath::parse("/stories/s1/").unwrap();
        let StorePath::Document(doc) = path else {
            panic!("expected document path");
        };
        assert_eq!(doc.id(), "s1");
        assert_eq!(doc.parent().to_string(), "stories");
    }

    #[test]
    fn parse_rejects_traversal_and_empty_segments() {
        assert!(StorePath::parse("stories/../x").is_err());
        assert!(StorePath::parse("stories//chapters").is_err());
        assert!(StorePath::parse("").is_err());
    }

    #[test]
    fn nested_paths_build_hierarchy() {
        let contents = CollectionPath::root("stories")
            .and_then(|c| c.doc("s1"))
            .and_then(|d| d.collection("chapters"))
            .and_then(|c| c.doc("c1"))
            .and_then(|d| d.collection("contents"))
            .unwrap();
        assert_eq!(contents.to_string(), "stories/s1/chapters/c1/contents");
    }

    #[test]
    fn merge_update_keeps_created_and_restamps_modified() {
        let t0 = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let t1 = DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut fields = Fields::new();
        fields.insert("title".to_string(), "a".into());
        stamp_created(&mut fields, t0);

        let mut patch = Fields::new();
        patch.insert("title".to_string(), "b".into());
        patch.insert(CREATED_FIELD.to_string(), "bogus".into());
        merge_update(&mut fields, patch, t1);

        let snapshot = Snapshot {
            id: "x".to_string(),
            fields,
        };
        assert_eq!(snapshot.fields["title"], "b");
        assert_eq!(snapshot.created_at(), Some(t0));
        assert_eq!(snapshot.modified_at(), Some(t1));
    }
}

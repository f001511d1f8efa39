use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::store::{CollectionPath, DocumentPath, DocumentStore, FieldFilter, Fields, Snapshot};

/// Body of a collection listing on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub documents: Vec<Snapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResponse {
    pub id: String,
}

/// Client for the `whitespace-store` server.
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            anyhow::bail!("store url is empty");
        }
        let base_url = Url::parse(trimmed).with_context(|| format!("parse store url: {trimmed}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("store url must be http/https: {base_url}");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, segments: &[String]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("store url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v1", "docs"])
            .extend(segments);
        Ok(url)
    }

    fn document_endpoint(&self, doc: &DocumentPath) -> anyhow::Result<Url> {
        let mut segments = doc.parent().segments().to_vec();
        segments.push(doc.id().to_string());
        self.endpoint(&segments)
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn list(
        &self,
        collection: &CollectionPath,
        filter: Option<&FieldFilter>,
    ) -> anyhow::Result<Vec<Snapshot>> {
        let mut url = self.endpoint(collection.segments())?;
        if let Some(filter) = filter {
            let value = serde_json::to_string(&filter.value).context("encode filter value")?;
            url.query_pairs_mut()
                .append_pair("field", &filter.field)
                .append_pair("value", &value);
        }
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("send list request: {collection}"))?;
        let resp = ensure_success(resp).await?;
        let body: ListResponse = resp.json().await.context("parse list response json")?;
        Ok(body.documents)
    }

    async fn get(&self, doc: &DocumentPath) -> anyhow::Result<Option<Snapshot>> {
        let url = self.document_endpoint(doc)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("send get request: {doc}"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp).await?;
        let snapshot: Snapshot = resp.json().await.context("parse document json")?;
        Ok(Some(snapshot))
    }

    async fn create(&self, collection: &CollectionPath, fields: Fields) -> anyhow::Result<String> {
        let url = self.endpoint(collection.segments())?;
        let resp = self
            .client
            .post(url)
            .json(&fields)
            .send()
            .await
            .with_context(|| format!("send create request: {collection}"))?;
        let resp = ensure_success(resp).await?;
        let body: CreateResponse = resp.json().await.context("parse create response json")?;
        Ok(body.id)
    }

    async fn update(&self, doc: &DocumentPath, fields: Fields) -> anyhow::Result<()> {
        let url = self.document_endpoint(doc)?;
        let resp = self
            .client
            .patch(url)
            .json(&fields)
            .send()
            .await
            .with_context(|| format!("send update request: {doc}"))?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn delete(&self, doc: &DocumentPath) -> anyhow::Result<()> {
        let url = self.document_endpoint(doc)?;
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .with_context(|| format!("send delete request: {doc}"))?;
        ensure_success(resp).await?;
        Ok(())
    }
}

async fn ensure_success(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    anyhow::bail!("store request failed ({status}): {body}");
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn spawn_failing_server(
        status: u16,
        body: &'static str,
    ) -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };
                let _ = request
                    .respond(tiny_http::Response::from_string(body).with_status_code(status));
            }
        });

        (base_url, shutdown_tx, handle)
    }

    #[test]
    fn rejects_non_http_urls() {
        let err = HttpDocumentStore::new("ftp://example.com")
            .unwrap_err()
            .to_string();
        assert!(err.contains("must be http/https"));
        assert!(HttpDocumentStore::new("  ").is_err());
    }

    #[test]
    fn endpoint_encodes_segments_under_prefix() {
        let store = HttpDocumentStore::new("http://localhost:9000/base/").unwrap();
        let doc = CollectionPath::root("stories")
            .and_then(|c| c.doc("my story"))
            .unwrap();
        let url = store.document_endpoint(&doc).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/base/v1/docs/stories/my%20story"
        );
    }

    #[tokio::test]
    async fn server_error_surfaces_status_and_body() {
        let (base_url, shutdown_tx, handle) = spawn_failing_server(500, "disk full");
        let store = HttpDocumentStore::new(&base_url).unwrap();
        let stories = CollectionPath::root("stories").unwrap();

        let err = store.create(&stories, Fields::new()).await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("500"), "{msg}");
        assert!(msg.contains("disk full"), "{msg}");

        let _ = shutdown_tx.send(());
        let _ = handle.join();
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let (base_url, shutdown_tx, handle) = spawn_failing_server(404, "not found");
        let store = HttpDocumentStore::new(&base_url).unwrap();
        let doc = CollectionPath::root("stories")
            .and_then(|c| c.doc("gone"))
            .unwrap();

        assert!(store.get(&doc).await.unwrap().is_none());

        let _ = shutdown_tx.send(());
        let _ = handle.join();
    }
}

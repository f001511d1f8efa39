//! HTTP front of a [`DocumentStore`], spoken by [`HttpDocumentStore`].
//!
//! [`HttpDocumentStore`]: crate::store::HttpDocumentStore

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::store::http::{CreateResponse, ListResponse};
use crate::store::{DocumentStore, FieldFilter, Fields, StorePath};

#[derive(Clone)]
pub struct ServerState {
    store: Arc<dyn DocumentStore>,
}

impl ServerState {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route(
            "/v1/docs/*path",
            get(read_path)
                .post(create_document)
                .patch(update_document)
                .delete(delete_document),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    field: Option<String>,
    value: Option<String>,
}

type ApiError = (StatusCode, String);

fn bad_request(err: anyhow::Error) -> ApiError {
    (StatusCode::BAD_REQUEST, format!("{err:#}"))
}

fn internal(err: anyhow::Error) -> ApiError {
    tracing::error!(?err, "store operation failed");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
}

fn parse_filter(q: ListQuery) -> Result<Option<FieldFilter>, ApiError> {
    match (q.field, q.value) {
        (None, None) => Ok(None),
        (Some(field), Some(value)) => {
            let value: serde_json::Value = serde_json::from_str(&value).map_err(|err| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("filter value must be json: {err}"),
                )
            })?;
            Ok(Some(FieldFilter::eq(field, value)))
        }
        _ => Err((
            StatusCode::BAD_REQUEST,
            "field and value must be given together".to_string(),
        )),
    }
}

async fn read_path(
    State(state): State<ServerState>,
    Path(path): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Response, ApiError> {
    match StorePath::parse(&path).map_err(bad_request)? {
        StorePath::Collection(collection) => {
            let filter = parse_filter(q)?;
            let documents = state
                .store
                .list(&collection, filter.as_ref())
                .await
                .map_err(internal)?;
            Ok(Json(ListResponse { documents }).into_response())
        }
        StorePath::Document(doc) => {
            let Some(snapshot) = state.store.get(&doc).await.map_err(internal)? else {
                return Err((StatusCode::NOT_FOUND, format!("document not found: {doc}")));
            };
            Ok(Json(snapshot).into_response())
        }
    }
}

async fn create_document(
    State(state): State<ServerState>,
    Path(path): Path<String>,
    Json(fields): Json<Fields>,
) -> Result<impl IntoResponse, ApiError> {
    let StorePath::Collection(collection) = StorePath::parse(&path).map_err(bad_request)? else {
        return Err((
            StatusCode::METHOD_NOT_ALLOWED,
            "documents are created in collections".to_string(),
        ));
    };
    let id = state
        .store
        .create(&collection, fields)
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(CreateResponse { id })))
}

async fn update_document(
    State(state): State<ServerState>,
    Path(path): Path<String>,
    Json(fields): Json<Fields>,
) -> Result<StatusCode, ApiError> {
    let StorePath::Document(doc) = StorePath::parse(&path).map_err(bad_request)? else {
        return Err((
            StatusCode::METHOD_NOT_ALLOWED,
            "collections cannot be updated".to_string(),
        ));
    };
    if state.store.get(&doc).await.map_err(internal)?.is_none() {
        return Err((StatusCode::NOT_FOUND, format!("document not found: {doc}")));
    }
    state.store.update(&doc, fields).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_document(
    State(state): State<ServerState>,
    Path(path): Path<String>,
) -> Result<StatusCode, ApiError> {
    let StorePath::Document(doc) = StorePath::parse(&path).map_err(bad_request)? else {
        return Err((
            StatusCode::METHOD_NOT_ALLOWED,
            "collections cannot be deleted".to_string(),
        ));
    };
    state.store.delete(&doc).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

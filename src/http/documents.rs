use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use analyst_common::documents::Document;

use super::errors::ApiError;
use super::state::SharedState;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/documents", get(list_documents).post(create_document))
        .route("/documents/{id}", get(get_document).delete(delete_document))
}

#[derive(Deserialize)]
pub struct CreateDocumentRequest {
    pub title: String,
    pub content: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

async fn create_document(
    State(state): State<SharedState>,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<Json<Document>, ApiError> {
    let document = Document {
        document_id: Uuid::new_v4().to_string(),
        title: request.title,
        char_count: request.content.chars().count(),
        content: request.content,
        content_type: request.content_type,
        created_at: Utc::now(),
    };
    state.db.insert_document(&document)?;
    Ok(Json(document))
}

async fn list_documents(State(state): State<SharedState>) -> Result<Json<Vec<Document>>, ApiError> {
    Ok(Json(state.db.list_documents()?))
}

async fn get_document(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Document>, ApiError> {
    state
        .db
        .get_document(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("document {id} not found")))
}

async fn delete_document(State(state): State<SharedState>, Path(id): Path<String>) -> Result<(), ApiError> {
    state.db.delete_document(&id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::build_router;
    use super::super::state::test_support::in_memory_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn create_then_fetch_document_round_trips() {
        let app = build_router(in_memory_state());
        let req = Request::builder()
            .method("POST")
            .uri("/documents")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({"title": "t", "content": "hello world"}).to_string()))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let id = doc["document_id"].as_str().unwrap().to_string();

        let req = Request::builder().uri(format!("/documents/{id}")).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

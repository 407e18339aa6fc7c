//! Retrieval handler

use crate::rank::DocumentBundle;
use crate::{AppState, RetrievalRequest};
use axum::{extract::State, Json};
use kgforge_common::errors::{AppError, Result};
use kgforge_common::llm::{ChatRole, ChatTurn};
use kgforge_common::metrics::RequestMetrics;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

/// Retrieval request body
#[derive(Debug, Deserialize, Validate)]
pub struct RetrieveRequest {
    /// Conversation turns, current utterance last
    #[validate(length(min = 1, max = 50), nested)]
    pub messages: Vec<MessageInput>,

    /// Restrict to these documents
    #[serde(default)]
    #[validate(length(max = 100))]
    pub document_names: Vec<String>,

    /// Candidate chunks to retrieve
    #[validate(range(min = 1, max = 50))]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct MessageInput {
    pub role: ChatRole,

    #[validate(length(min = 1, max = 4000))]
    pub content: String,
}

/// Retrieval response
#[derive(Serialize)]
pub struct RetrieveResponse {
    pub query: String,
    pub total_documents: usize,
    pub documents: Vec<DocumentBundle>,
    pub processing_time_ms: u64,
}

/// Retrieve ranked evidence bundles for a conversation
pub async fn retrieve(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>> {
    let start = Instant::now();
    let metrics = RequestMetrics::start("POST", "/v1/retrieve");

    let result = run(&state, request).await;

    let status = match &result {
        Ok(_) => 200,
        Err(e) => e.status_code().as_u16(),
    };
    metrics.finish(status);

    let response = result?;
    let processing_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        query = %response.query,
        documents = response.documents.len(),
        latency_ms = processing_time_ms,
        "Retrieve completed"
    );

    Ok(Json(RetrieveResponse {
        query: response.query,
        total_documents: response.documents.len(),
        documents: response.documents,
        processing_time_ms,
    }))
}

async fn run(state: &AppState, request: RetrieveRequest) -> Result<crate::RetrievalResponse> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let request = RetrievalRequest {
        messages: request
            .messages
            .into_iter()
            .map(|m| ChatTurn {
                role: m.role,
                content: m.content,
            })
            .collect(),
        document_names: request.document_names,
        top_k: request.top_k,
    };

    state.engine.retrieve(&request).await
}

#[cfg(test)]
mod tests {
    use crate::orchestrator::QueryOrchestrator;
    use crate::{create_router, AppState, RetrievalEngine};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use kgforge_common::config::RetrievalConfig;
    use kgforge_common::embeddings::MockEmbedder;
    use kgforge_common::graph::{ChunkRecord, DocumentInfo, InMemoryGraphStore};
    use kgforge_common::Embedder;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> axum::Router {
        let embedder = MockEmbedder::new(8);
        let mut store = InMemoryGraphStore::new();
        store.add_document(DocumentInfo::named("notes.pdf"));
        let text = "Rust ownership and borrowing";
        store
            .add_chunk(
                ChunkRecord {
                    id: "c1".into(),
                    text: text.into(),
                    position: 0,
                    length: text.len() as i32,
                    document: "notes.pdf".into(),
                },
                embedder.embed(text).await.unwrap(),
            )
            .unwrap();

        let store = Arc::new(store);
        let engine = RetrievalEngine::new(
            store.clone(),
            Arc::new(embedder),
            QueryOrchestrator::without_reformulator(),
            Arc::new(RetrievalConfig::default()),
        )
        .unwrap();

        create_router(
            AppState {
                engine: Arc::new(engine),
                store,
                cache: None,
            },
            Duration::from_secs(5),
        )
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/retrieve")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_retrieve_returns_bundles() {
        let response = app()
            .await
            .oneshot(post(r#"{"messages":[{"role":"user","content":"rust ownership"}]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["query"], "rust ownership");
        assert_eq!(json["total_documents"], 1);
        assert_eq!(json["documents"][0]["document_name"], "notes.pdf");
        assert_eq!(json["documents"][0]["metadata"]["source"], "notes.pdf");
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let response = app()
            .await
            .oneshot(post(r#"{"messages":[]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_top_k_out_of_range_rejected() {
        let response = app()
            .await
            .oneshot(post(
                r#"{"messages":[{"role":"user","content":"rust"}],"top_k":0}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = app().await;

        let health = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let ready = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
    }
}

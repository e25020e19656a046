use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod websocket;

/// Every route of the service: player socket, health check and API docs.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(websocket::router())
        .merge(docs::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{broker::MemoryBroker, durable_store::MemoryDurableStore},
        dto::health::HealthResponse,
        state::AppState,
    };

    fn state() -> SharedState {
        AppState::new(
            AppConfig::default(),
            Arc::new(MemoryDurableStore::new()),
            Arc::new(MemoryBroker::new()),
        )
    }

    #[tokio::test]
    async fn healthcheck_reports_backends() {
        let response = router(state())
            .oneshot(Request::get("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert!(health.is_ok());
    }

    #[tokio::test]
    async fn openapi_document_lists_the_player_socket() {
        let response = router(state())
            .oneshot(Request::get(docs::OPENAPI_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let document: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let paths = &document["paths"];
        assert!(paths.get("/ws").is_some());
        assert!(paths.get("/healthcheck").is_some());
    }
}

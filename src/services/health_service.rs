use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Check the broker and the durable store, logging whichever is unreachable.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let broker = match state.broker().ping().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "broker health check failed");
            false
        }
    };
    let store = match state.store().health_check().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            false
        }
    };
    HealthResponse::from_checks(broker, store)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{broker::MemoryBroker, durable_store::MemoryDurableStore},
        state::AppState,
    };

    #[tokio::test]
    async fn reports_each_backend_separately() {
        let broker = MemoryBroker::new();
        let store = MemoryDurableStore::new();
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
        );

        assert!(health_status(&state).await.is_ok());

        store.set_offline(true);
        let report = health_status(&state).await;
        assert!(report.broker);
        assert!(!report.store);
        assert!(!report.is_ok());
    }
}

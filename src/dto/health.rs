use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" when every dependency answered, "degraded" otherwise.
    pub status: String,
    /// Whether the broker answered a ping.
    pub broker: bool,
    /// Whether the durable store answered its health check.
    pub store: bool,
}

impl HealthResponse {
    /// Build the response from the individual dependency checks.
    pub fn from_checks(broker: bool, store: bool) -> Self {
        let status = if broker && store { "ok" } else { "degraded" };
        Self {
            status: status.to_string(),
            broker,
            store,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.broker && self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_failed_check_degrades_the_status() {
        assert_eq!(HealthResponse::from_checks(true, true).status, "ok");
        assert_eq!(HealthResponse::from_checks(false, true).status, "degraded");
        assert!(!HealthResponse::from_checks(true, false).is_ok());
    }
}

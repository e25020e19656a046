use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Arena Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::ws::AddUserPayload,
            crate::dto::ws::JoinRandomGamePayload,
            crate::dto::ws::GameActionPayload,
            crate::dto::ws::PlayerScore,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "players", description = "WebSocket operations for players"),
    )
)]
pub struct ApiDoc;

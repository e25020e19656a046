//! Swagger UI and the OpenAPI document it renders.

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

pub const UI_PATH: &str = "/docs";
pub const OPENAPI_PATH: &str = "/api-doc/openapi.json";

pub fn router() -> Router<SharedState> {
    SwaggerUi::new(UI_PATH)
        .url(OPENAPI_PATH, ApiDoc::openapi())
        .into()
}

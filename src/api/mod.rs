//! HTTP surface next to the WebSocket endpoint: health and API docs.

pub mod system;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the HTTP endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    paths(system::health_handler),
    components(schemas(system::HealthResponse)),
    tags((name = "System", description = "Service health"))
)]
pub struct ApiDoc;

/// Builds the HTTP router. Swagger UI is mounted at `/swagger-ui` when the
/// `swagger-ui` feature is enabled.
pub fn build_router() -> Router<AppState> {
    let router = Router::new().merge(system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_health() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/health"));
    }
}

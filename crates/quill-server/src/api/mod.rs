//! HTTP API.
//!
//! Exposes the [`DataRouter`] over axum: parse, train, evaluate, unload and
//! status endpoints. Errors are returned as `{"error": message}` with a
//! status code derived from the [`QuillError`] variant.

pub mod handlers;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use quill_types::{QuillError, Result};

use crate::router::DataRouter;

/// Shared state accessible by all API handlers.
#[derive(Clone)]
pub struct ApiState {
    /// The request router.
    pub router: Arc<DataRouter>,
}

/// A [`QuillError`] on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub QuillError);

impl From<QuillError> for ApiError {
    fn from(e: QuillError) -> Self {
        Self(e)
    }
}

/// Status code for an error.
pub fn status_for(error: &QuillError) -> StatusCode {
    match error {
        QuillError::InvalidProject { .. } | QuillError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
        QuillError::AlreadyTraining { .. } => StatusCode::CONFLICT,
        QuillError::UnknownComponent { .. }
        | QuillError::PipelineConfiguration { .. }
        | QuillError::UnknownTemplate { .. }
        | QuillError::InvalidConfig { .. }
        | QuillError::UnknownDataFormat { .. }
        | QuillError::InvalidTrainingData { .. }
        | QuillError::Json(_)
        | QuillError::Yaml(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Handler result type.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the application router with CORS and request tracing.
pub fn build_router(state: ApiState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .merge(handlers::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `host:port` from the router's configuration and serve until the
/// process is stopped.
pub async fn serve(router: Arc<DataRouter>) -> Result<()> {
    let config = router.config().clone();
    let app = build_router(ApiState { router }, &config.cors_origins);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(addr = %listener.local_addr()?, "quill server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let not_found = QuillError::ModelNotFound {
            project: "p".into(),
            model: "m".into(),
        };
        assert_eq!(status_for(&not_found), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&QuillError::AlreadyTraining { project: "p".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&QuillError::config("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&QuillError::Training {
                project: "p".into(),
                message: "boom".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_body_names_the_problem() {
        let response = ApiError(QuillError::AlreadyTraining { project: "p1".into() }).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}

//! HTTP request handlers.

use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use quill_core::evaluate::EvaluationResult;
use quill_core::metadata::{MINIMUM_COMPATIBLE_VERSION, QUILL_VERSION};
use quill_core::training_data::{load_data_from_str, load_data_from_value};
use quill_types::QuillError;
use quill_types::config::ModelConfig;

use super::{ApiResult, ApiState};
use crate::router::RouterStatus;

/// Build all API routes.
pub fn api_routes() -> Router<ApiState> {
    Router::new()
        .route("/", get(hello))
        .route("/version", get(version))
        .route("/status", get(status))
        .route("/parse", get(parse_get).post(parse_post))
        .route("/train", post(train))
        .route("/evaluate", post(evaluate))
        .route("/models", delete(unload_model))
}

/// Query parameters of `/train`.
#[derive(Debug, Default, Deserialize)]
pub struct TrainParams {
    pub project: Option<String>,
    pub fixed_model_name: Option<String>,
}

/// Query parameters selecting a project and model.
#[derive(Debug, Default, Deserialize)]
pub struct ModelParams {
    pub project: Option<String>,
    pub model: Option<String>,
}

pub async fn hello() -> String {
    format!("hello from quill: {QUILL_VERSION}")
}

pub async fn version() -> Json<Value> {
    Json(json!({
        "version": QUILL_VERSION,
        "minimum_compatible_version": MINIMUM_COMPATIBLE_VERSION,
    }))
}

pub async fn status(State(state): State<ApiState>) -> Json<RouterStatus> {
    Json(state.router.status().await)
}

pub async fn parse_get(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let data: serde_json::Map<String, Value> = params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    Ok(Json(state.router.parse_json(&Value::Object(data)).await?))
}

pub async fn parse_post(State(state): State<ApiState>, Json(body): Json<Value>) -> ApiResult<Json<Value>> {
    Ok(Json(state.router.parse_json(&body).await?))
}

/// Train a model from a config document carrying its data under `data`.
/// Responds once training has finished.
pub async fn train(
    State(state): State<ApiState>,
    Query(params): Query<TrainParams>,
    body: String,
) -> ApiResult<Json<Value>> {
    let mut config = ModelConfig::from_body(&body)?;
    let data = config
        .data
        .take()
        .ok_or_else(|| QuillError::training_data("request body carries no 'data' section"))?;
    let data = load_data_from_value(&data)?;
    let project = params.project.unwrap_or_default();

    let handle = state
        .router
        .start_train_process(&data, &project, config, params.fixed_model_name)
        .await?;
    let model = handle.wait().await?;
    Ok(Json(json!({
        "info": format!("new model trained: {model}"),
        "project": project,
        "model": model,
    })))
}

/// Evaluate a model against training data sent as the body.
pub async fn evaluate(
    State(state): State<ApiState>,
    Query(params): Query<ModelParams>,
    body: String,
) -> ApiResult<Json<EvaluationResult>> {
    let data = load_data_from_str(&body, "request body")?;
    let report = state
        .router
        .evaluate(&data, params.project.as_deref(), params.model.as_deref())
        .await?;
    Ok(Json(report))
}

pub async fn unload_model(
    State(state): State<ApiState>,
    Query(params): Query<ModelParams>,
) -> ApiResult<Json<Value>> {
    let model = state
        .router
        .unload_model(params.project.as_deref(), params.model.as_deref())
        .await?;
    Ok(Json(Value::String(model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn version_reports_compatibility() {
        let Json(v) = version().await;
        assert_eq!(v["version"], QUILL_VERSION);
        assert_eq!(v["minimum_compatible_version"], MINIMUM_COMPATIBLE_VERSION);
        assert!(hello().await.contains(QUILL_VERSION));
    }
}

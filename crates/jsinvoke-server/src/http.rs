//! HTTP surface
//!
//! `POST /js/invoke` accepts either a JSON body or a multipart form and maps
//! execution outcomes onto status codes; `GET /health` is a liveness probe.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use jsinvoke::{
    ErrorBody, ExecuteError, ExecutionOutcome, ExecutionRequest, InputData, InvokeRequest, Runner,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

const SCRIPT_FIELD: &str = "script";
const DATA_FIELD: &str = "data";

pub fn create_router(runner: Runner) -> Router {
    Router::new()
        .route("/js/invoke", post(invoke))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(runner)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn invoke(State(runner): State<Runner>, request: Request) -> Response {
    let request = match read_request(request).await {
        Ok(request) => request,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    match runner.execute(request).await {
        Ok(outcome) => {
            let status = outcome_status(&outcome);
            if let ExecutionOutcome::ScriptError { message, .. } = &outcome {
                debug!(%message, "script error");
            }
            (status, Json(outcome.into_body())).into_response()
        }
        Err(error) => {
            let status = match error {
                ExecuteError::Validation(_) => StatusCode::BAD_REQUEST,
                ExecuteError::ShuttingDown | ExecuteError::Timeout(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            };
            error_response(status, error.to_string())
        }
    }
}

fn outcome_status(outcome: &ExecutionOutcome) -> StatusCode {
    match outcome {
        ExecutionOutcome::Value(_) | ExecutionOutcome::Object(_) => StatusCode::OK,
        ExecutionOutcome::EmptyResult | ExecutionOutcome::ScriptError { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ExecutionOutcome::InternalError { message } => {
            warn!(%message, "internal error while executing script");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
}

/// JSON bodies by content type, everything else as a multipart form
async fn read_request(request: Request) -> Result<ExecutionRequest, String> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("application/json"));

    if is_json {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|rejection| rejection.body_text())?;
        let invoke: InvokeRequest =
            serde_json::from_slice(&body).map_err(|error| error.to_string())?;
        Ok(invoke.into())
    } else {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| rejection.body_text())?;
        read_form(multipart).await
    }
}

/// Text fields and uploaded files are both read as UTF-8 text
async fn read_form(mut multipart: Multipart) -> Result<ExecutionRequest, String> {
    let mut script = None;
    let mut data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| error.body_text())?
    {
        let target = match field.name() {
            Some(SCRIPT_FIELD) => &mut script,
            Some(DATA_FIELD) => &mut data,
            _ => continue,
        };
        let text = field.text().await.map_err(|error| error.body_text())?;
        *target = Some(text);
    }

    let script = script.ok_or_else(|| format!("missing form field '{SCRIPT_FIELD}'"))?;
    Ok(ExecutionRequest {
        script,
        data: data.map(InputData::Text),
    })
}

use std::{collections::HashMap, time::Instant};

use axum::{
    body::{to_bytes, Body},
    extract::{Json, State},
    http::{header::CONTENT_TYPE, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{cache::WindowStore, rate_limit::Decision, state::AppState};

const APPLICATION_JSON: &str = "application/json";
const X_REASON: &str = "x-reason";

#[derive(Debug, Serialize)]
struct BlockedBody {
    block: bool,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    #[serde(rename = "trackedEntries")]
    tracked_entries: usize,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("non-post method")]
    MethodNotAllowed,
    #[error("wrong content type")]
    WrongContentType,
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("{0}")]
    MalformedJson(String),
    #[error("wrong payload")]
    WrongPayload,
}

impl ReportError {
    fn status(&self) -> StatusCode {
        match self {
            ReportError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ReportError::WrongContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ReportError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ReportError::MalformedJson(_) | ReportError::WrongPayload => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        }
    }
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        let reason = self.to_string();
        let mut response = self.status().into_response();
        // header values cannot carry control characters
        let value = HeaderValue::from_str(&reason.replace(['\r', '\n'], " "))
            .unwrap_or_else(|_| HeaderValue::from_static("invalid request"));
        response.headers_mut().insert(X_REASON, value);
        response
    }
}

pub async fn report(State(state): State<AppState>, request: Request<Body>) -> Response {
    let url = match extract_url(request, state.config.max_body_bytes).await {
        Ok(url) => url,
        Err(error) => {
            tracing::warn!(error = %error, "rejected report");
            return error.into_response();
        }
    };

    match state.limiter.decide(&url, Instant::now()) {
        Decision::Allow => StatusCode::NO_CONTENT.into_response(),
        Decision::Block => (StatusCode::OK, Json(BlockedBody { block: true })).into_response(),
    }
}

async fn extract_url(
    request: Request<Body>,
    max_body_bytes: usize,
) -> Result<String, ReportError> {
    if request.method() != Method::POST {
        return Err(ReportError::MethodNotAllowed);
    }

    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    if content_type != Some(APPLICATION_JSON) {
        return Err(ReportError::WrongContentType);
    }

    let body = to_bytes(request.into_body(), max_body_bytes)
        .await
        .map_err(|_| ReportError::PayloadTooLarge(max_body_bytes))?;

    parse_payload(&body)
}

fn parse_payload(body: &[u8]) -> Result<String, ReportError> {
    let mut payload: HashMap<String, String> = serde_json::from_slice(body)
        .map_err(|error| ReportError::MalformedJson(error.to_string()))?;

    if payload.len() != 1 {
        return Err(ReportError::WrongPayload);
    }

    match payload.remove("url") {
        Some(url) if !url.is_empty() => Ok(url),
        _ => Err(ReportError::WrongPayload),
    }
}

pub async fn health(State(state): State<AppState>) -> Response {
    Json(HealthBody {
        status: "healthy",
        tracked_entries: state.limiter.store().len(),
        timestamp: Utc::now(),
    })
    .into_response()
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

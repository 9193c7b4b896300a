//! `GET /?key=resize/<W>x<H>/<filename>`
//!
//! Runs the resize pipeline and turns its outcome into the redirect /
//! not-found contract. Pipeline failures go through [`AppError`].

use crate::{
    errors::AppError,
    services::resize_service::{ResizeOutcome, ResizeService},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use std::fmt::Write as _;

#[derive(Debug, Deserialize)]
pub struct ResizeQuery {
    pub key: Option<String>,
}

pub async fn resize_image(
    State(service): State<ResizeService>,
    Query(query): Query<ResizeQuery>,
) -> Result<Response, AppError> {
    let outcome = match query.key.as_deref() {
        Some(key) => service.handle_key(key).await?,
        None => {
            tracing::info!("request without key parameter");
            ResizeOutcome::NotFound
        }
    };

    build_response(outcome)
}

/// 404 with an empty body, or 301 with a `location` header and an empty body.
pub fn build_response(outcome: ResizeOutcome) -> Result<Response, AppError> {
    let mut response = Response::new(Body::empty());

    match outcome {
        ResizeOutcome::NotFound => {
            *response.status_mut() = StatusCode::NOT_FOUND;
        }
        ResizeOutcome::Redirect { location } => {
            let value = HeaderValue::from_str(&encode_location(&location))
                .map_err(|e| AppError::internal(format!("invalid redirect location: {e}")))?;
            *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
            response.headers_mut().insert(header::LOCATION, value);
        }
    }

    Ok(response)
}

/// Percent-encode every byte that is not visible ASCII so arbitrary keys
/// still make a valid header value. Visible ASCII passes through unchanged.
fn encode_location(location: &str) -> String {
    let mut out = String::with_capacity(location.len());
    for byte in location.bytes() {
        if byte.is_ascii_graphic() {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

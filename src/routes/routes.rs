//! Defines the gateway's routes.
//!
//! - `GET /?key=resize/<W>x<H>/<filename>`: derive the image and redirect to it
//! - `GET /healthz`: liveness
//! - `GET /readyz`: storage readiness

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        resize_handlers::resize_image,
    },
    services::resize_service::ResizeService,
};
use axum::{Router, routing::get};

/// Build the router. Every handler shares the `ResizeService` state.
pub fn routes() -> Router<ResizeService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(resize_image))
}

//! On-demand image resizing gateway.
//!
//! Given `?key=resize/<W>x<H>/<filename>`, fetches `original/<filename>`
//! from object storage, resizes it, stores the result under the requested
//! key and redirects the client there.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

//! Core data models for the resize gateway.
//!
//! A [`request::ResizeRequest`] is decoded from the inbound key, an
//! [`object::OriginalObject`] is fetched for it, and a
//! [`object::DerivedArtifact`] is written back.

pub mod object;
pub mod request;

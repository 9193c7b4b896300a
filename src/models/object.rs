//! Objects read from and written to the storage backend.

use bytes::Bytes;

/// Cache directive attached to every derived artifact (one year, public).
pub const DERIVED_CACHE_CONTROL: &str = "max-age=31536000, public";

/// Storage tier hint for derived artifacts. They can always be rebuilt from
/// the original, so reduced durability is acceptable.
pub const DEFAULT_STORAGE_CLASS: &str = "REDUCED_REDUNDANCY";

/// An original image as returned by the storage backend.
#[derive(Debug, Clone)]
pub struct OriginalObject {
    /// Content type declared on the stored object, if any.
    pub content_type: Option<String>,

    /// Raw payload bytes.
    pub body: Bytes,
}

/// A resized image ready to be written back to storage.
#[derive(Debug, Clone)]
pub struct DerivedArtifact {
    /// Storage key; always the raw key of the request that produced it.
    pub key: String,

    /// Encoded image bytes.
    pub body: Bytes,

    /// MIME type of `body` (`image/<encoding>`).
    pub content_type: String,

    /// Storage class hint passed to the backend.
    pub storage_class: String,

    /// `Cache-Control` value stored alongside the object.
    pub cache_control: String,
}

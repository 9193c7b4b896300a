//! The resize pipeline: key → original → transform → derived artifact.
//!
//! Each call is independent. The three I/O steps run strictly in sequence,
//! each is attempted once, and the artifact is written only after the
//! transform has fully succeeded.

use crate::models::object::{DERIVED_CACHE_CONTROL, DerivedArtifact, OriginalObject};
use crate::models::request::ResizeRequest;
use crate::services::format_service::{FormatMode, OutputFormat};
use crate::services::image_service::{TransformError, Transformer};
use crate::services::storage_service::{ObjectStore, StorageError};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Terminal outcome of a request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Bad key, or no original to derive from.
    NotFound,
    /// The artifact was written; send the client to it.
    Redirect { location: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("original `{key}` does not exist")]
    OriginalNotFound { key: String },
    #[error("upstream storage failure: {0}")]
    Upstream(#[source] StorageError),
    #[error("image transform failed: {0}")]
    Transform(#[from] TransformError),
}

/// Deployment settings the pipeline needs on every request.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Bucket holding both `original/*` and `resize/*`.
    pub bucket: String,
    /// Redirect base, without a trailing slash.
    pub base_url: String,
    pub format_mode: FormatMode,
    pub storage_class: String,
}

#[derive(Clone)]
pub struct ResizeService {
    store: Arc<dyn ObjectStore>,
    transformer: Arc<dyn Transformer>,
    settings: Arc<PipelineSettings>,
}

impl ResizeService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transformer: Arc<dyn Transformer>,
        mut settings: PipelineSettings,
    ) -> Self {
        settings.base_url = settings.base_url.trim_end_matches('/').to_string();
        Self {
            store,
            transformer,
            settings: Arc::new(settings),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the full pipeline for an inbound key.
    ///
    /// Bad keys and missing originals resolve to [`ResizeOutcome::NotFound`];
    /// storage and transform failures are returned as errors.
    pub async fn handle_key(&self, key: &str) -> Result<ResizeOutcome, PipelineError> {
        let Some(request) = ResizeRequest::parse(key) else {
            info!(key = %key, "key does not name a resize");
            return Ok(ResizeOutcome::NotFound);
        };

        match self.materialize(&request).await {
            Ok(artifact) => Ok(ResizeOutcome::Redirect {
                location: self.location_for(&artifact.key),
            }),
            Err(PipelineError::OriginalNotFound { key: original }) => {
                info!(key = %key, original = %original, "original not found");
                Ok(ResizeOutcome::NotFound)
            }
            Err(err) => Err(err),
        }
    }

    /// Fetch the original, resize it and write the derived artifact.
    pub async fn materialize(
        &self,
        request: &ResizeRequest,
    ) -> Result<DerivedArtifact, PipelineError> {
        let bucket = &self.settings.bucket;
        let original_key = request.original_key();

        debug!(bucket = %bucket, key = %original_key, "fetching original");
        let original: OriginalObject = self
            .store
            .get_object(bucket, &original_key)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    PipelineError::OriginalNotFound {
                        key: original_key.clone(),
                    }
                } else {
                    PipelineError::Upstream(err)
                }
            })?;

        let format = self
            .settings
            .format_mode
            .resolve(original.content_type.as_deref());
        info!(
            key = %request.raw_key,
            width = request.width,
            height = request.height,
            source_type = ?original.content_type,
            format = %format,
            "resizing image"
        );
        let body = self
            .transform(original.body, request.width, request.height, format)
            .await?;

        let artifact = DerivedArtifact {
            key: request.raw_key.clone(),
            body: Bytes::from(body),
            content_type: format.content_type().to_string(),
            storage_class: self.settings.storage_class.clone(),
            cache_control: DERIVED_CACHE_CONTROL.to_string(),
        };

        self.store
            .put_object(bucket, &artifact)
            .await
            .map_err(PipelineError::Upstream)?;
        info!(key = %artifact.key, size = artifact.body.len(), "stored derived artifact");

        Ok(artifact)
    }

    /// Image work is CPU-bound, so it runs on the blocking pool.
    async fn transform(
        &self,
        input: Bytes,
        width: u32,
        height: u32,
        format: OutputFormat,
    ) -> Result<Vec<u8>, TransformError> {
        let transformer = Arc::clone(&self.transformer);
        tokio::task::spawn_blocking(move || transformer.transform(&input, width, height, format))
            .await
            .map_err(|e| TransformError::Task(e.to_string()))?
    }

    fn location_for(&self, key: &str) -> String {
        format!("{}/{}", self.settings.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::DEFAULT_STORAGE_CLASS;
    use crate::services::image_service::{ImageTransformer, TransformResult};
    use crate::services::memory_storage::MemoryStorageService;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BUCKET: &str = "images";
    const BASE_URL: &str = "https://cdn.example.com";

    /// Wraps the real transformer and counts invocations.
    #[derive(Default)]
    struct CountingTransformer {
        inner: ImageTransformer,
        calls: AtomicUsize,
    }

    impl Transformer for CountingTransformer {
        fn transform(
            &self,
            input: &[u8],
            width: u32,
            height: u32,
            format: OutputFormat,
        ) -> TransformResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.transform(input, width, height, format)
        }
    }

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut buf, format)
            .unwrap();
        buf.into_inner()
    }

    fn service(
        mode: FormatMode,
    ) -> (ResizeService, Arc<MemoryStorageService>, Arc<CountingTransformer>) {
        let store = Arc::new(MemoryStorageService::new());
        let transformer = Arc::new(CountingTransformer::default());
        let service = ResizeService::new(
            store.clone(),
            transformer.clone(),
            PipelineSettings {
                bucket: BUCKET.to_string(),
                base_url: format!("{BASE_URL}/"),
                format_mode: mode,
                storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            },
        );
        (service, store, transformer)
    }

    #[tokio::test]
    async fn test_bad_key_skips_storage() {
        let (service, store, transformer) = service(FormatMode::Adaptive);

        for key in ["thumbnails/100x200/photo.jpg", "resize/axb/photo.jpg", "resize/1x1/"] {
            let outcome = service.handle_key(key).await.unwrap();
            assert_eq!(outcome, ResizeOutcome::NotFound);
        }
        assert_eq!(store.get_calls(), 0);
        assert_eq!(store.put_calls(), 0);
        assert_eq!(transformer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_original_is_not_found_without_write() {
        let (service, store, transformer) = service(FormatMode::Adaptive);

        let outcome = service.handle_key("resize/50x50/missing.jpg").await.unwrap();

        assert_eq!(outcome, ResizeOutcome::NotFound);
        assert_eq!(store.get_calls(), 1);
        assert_eq!(store.put_calls(), 0);
        assert_eq!(transformer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_writes_once_and_redirects() {
        let (service, store, transformer) = service(FormatMode::Adaptive);
        store.insert(
            BUCKET,
            "original/photo.jpg",
            Some("image/jpeg"),
            encoded(400, 300, ImageFormat::Jpeg),
        );

        let outcome = service.handle_key("resize/100x200/photo.jpg").await.unwrap();

        assert_eq!(
            outcome,
            ResizeOutcome::Redirect {
                location: format!("{BASE_URL}/resize/100x200/photo.jpg"),
            }
        );
        assert_eq!(store.get_calls(), 1);
        assert_eq!(store.put_calls(), 1);
        assert_eq!(transformer.calls.load(Ordering::SeqCst), 1);

        let derived = store.object(BUCKET, "resize/100x200/photo.jpg").unwrap();
        assert_eq!(derived.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(derived.storage_class.as_deref(), Some(DEFAULT_STORAGE_CLASS));
        assert_eq!(derived.cache_control.as_deref(), Some(DERIVED_CACHE_CONTROL));
        let img = image::load_from_memory(&derived.body).unwrap();
        assert_eq!((img.width(), img.height()), (100, 200));
    }

    #[tokio::test]
    async fn test_repeat_request_is_idempotent() {
        let (service, store, _) = service(FormatMode::Adaptive);
        store.insert(
            BUCKET,
            "original/a/b.png",
            Some("image/png"),
            encoded(80, 80, ImageFormat::Png),
        );

        let first = service.handle_key("resize/20x10/a/b.png").await.unwrap();
        let first_body = store.object(BUCKET, "resize/20x10/a/b.png").unwrap();
        let second = service.handle_key("resize/20x10/a/b.png").await.unwrap();
        let second_body = store.object(BUCKET, "resize/20x10/a/b.png").unwrap();

        assert_eq!(first, second);
        assert_eq!(first_body, second_body);
        assert_eq!(store.put_calls(), 2);
    }

    #[tokio::test]
    async fn test_adaptive_mode_content_types() {
        let (service, store, _) = service(FormatMode::Adaptive);
        let cases = [
            ("a.jpg", Some("image/jpeg"), ImageFormat::Jpeg, "image/jpeg"),
            ("b.jpg", Some("image/pjpeg"), ImageFormat::Jpeg, "image/jpeg"),
            ("c.png", Some("image/png"), ImageFormat::Png, "image/png"),
            ("d.gif", Some("image/gif"), ImageFormat::Png, "image/png"),
            ("e.bin", None, ImageFormat::Png, "image/png"),
        ];

        for (name, source_type, source_format, expected) in cases {
            store.insert(
                BUCKET,
                &format!("original/{name}"),
                source_type,
                encoded(16, 16, source_format),
            );
            let key = format!("resize/8x8/{name}");
            service.handle_key(&key).await.unwrap();

            let derived = store.object(BUCKET, &key).unwrap();
            assert_eq!(derived.content_type.as_deref(), Some(expected), "{name}");
        }
    }

    #[tokio::test]
    async fn test_fixed_mode_always_png() {
        let (service, store, _) = service(FormatMode::FixedPng);
        store.insert(
            BUCKET,
            "original/photo.jpg",
            Some("image/jpeg"),
            encoded(32, 32, ImageFormat::Jpeg),
        );

        service.handle_key("resize/10x10/photo.jpg").await.unwrap();

        let derived = store.object(BUCKET, "resize/10x10/photo.jpg").unwrap();
        assert_eq!(derived.content_type.as_deref(), Some("image/png"));
        assert_eq!(&derived.body[1..4], b"PNG");
    }

    #[tokio::test]
    async fn test_fetch_failure_is_upstream_error() {
        let (service, store, _) = service(FormatMode::Adaptive);
        store.fail_gets(true);

        let err = service.handle_key("resize/10x10/photo.jpg").await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream(_)));
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_upstream_error() {
        let (service, store, _) = service(FormatMode::Adaptive);
        store.insert(
            BUCKET,
            "original/photo.png",
            Some("image/png"),
            encoded(32, 32, ImageFormat::Png),
        );
        store.fail_puts(true);

        let err = service.handle_key("resize/10x10/photo.png").await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream(_)));
        assert!(store.object(BUCKET, "resize/10x10/photo.png").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_original_is_transform_error_without_write() {
        let (service, store, _) = service(FormatMode::Adaptive);
        store.insert(BUCKET, "original/bad.jpg", Some("image/jpeg"), &b"garbage"[..]);

        let err = service.handle_key("resize/10x10/bad.jpg").await.unwrap_err();
        assert!(matches!(err, PipelineError::Transform(_)));
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_dimensions_fail_in_transform() {
        let (service, store, _) = service(FormatMode::Adaptive);
        store.insert(
            BUCKET,
            "original/photo.png",
            Some("image/png"),
            encoded(8, 8, ImageFormat::Png),
        );

        let err = service.handle_key("resize/0x10/photo.png").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Transform(TransformError::InvalidDimensions { .. })
        ));
    }

    #[tokio::test]
    async fn test_unstorable_original_key_on_local_backend_is_not_found() {
        use crate::services::storage_service::LocalStorageService;
        use sqlx::sqlite::SqlitePoolOptions;

        let dir = tempfile::TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        LocalStorageService::run_migrations(&pool).await.unwrap();
        let store = Arc::new(LocalStorageService::new(Arc::new(pool), dir.path()));
        let service = ResizeService::new(
            store,
            Arc::new(CountingTransformer::default()),
            PipelineSettings {
                bucket: BUCKET.to_string(),
                base_url: BASE_URL.to_string(),
                format_mode: FormatMode::Adaptive,
                storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            },
        );

        for key in [
            "resize/10x10/missing.jpg",
            "resize/10x10/my..photo.jpg",
            "resize/10x10/a\\b.jpg",
        ] {
            let outcome = service.handle_key(key).await.unwrap();
            assert_eq!(outcome, ResizeOutcome::NotFound, "key {key:?}");
        }
    }
}

//! src/services/storage_service.rs
//!
//! The [`ObjectStore`] seam between the resize pipeline and object storage,
//! plus [`LocalStorageService`]: SQLite for metadata and local disk for
//! payloads, sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! The S3 and in-memory backends live in sibling modules.

use crate::models::object::{DerivedArtifact, OriginalObject};
use crate::models::request::ORIGINAL_PREFIX;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::ImageFormat;
use sqlx::{FromRow, SqlitePool};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Object storage as seen by the resize pipeline.
///
/// Implementations must report a missing object as
/// [`StorageError::ObjectNotFound`]; every other failure is treated as an
/// upstream outage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's content type and payload.
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<OriginalObject>;

    /// Write a derived artifact, replacing any object already at its key.
    async fn put_object(&self, bucket: &str, artifact: &DerivedArtifact) -> StorageResult<()>;

    /// Cheap connectivity probe used by `/readyz`.
    async fn check_ready(&self, bucket: &str) -> StorageResult<()>;
}

/// Metadata row kept for each stored object.
#[derive(Debug, Clone, FromRow)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub etag: String,
    pub storage_class: String,
    pub cache_control: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// Disk + SQLite object store for running the gateway without S3.
#[derive(Clone)]
pub struct LocalStorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const IMPORT_STORAGE_CLASS: &str = "STANDARD";

impl LocalStorageService {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Create the metadata schema if it does not exist yet.
    pub async fn run_migrations(db: &SqlitePool) -> StorageResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(db).await?;
        }

        Ok(())
    }

    /// Rejects keys that could escape the bucket directory.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Bucket names become directory names: 3–63 characters of lowercase
    /// letters, digits, dots and hyphens, starting and ending alphanumeric.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard directories from MD5(bucket/key), keeping the number
    /// of entries per directory small.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Fetch the metadata row for an object.
    pub async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectMetadata> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)?;

        sqlx::query_as::<_, ObjectMetadata>(
            "SELECT bucket, key, content_type, size_bytes, etag, storage_class,
                    cache_control, last_modified
             FROM objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Write an object payload and upsert its metadata.
    ///
    /// - Writes to a temporary file, fsyncs, then renames into place.
    /// - Upserts the metadata row (whole-object replace semantics).
    /// - Cleans up temp files on errors.
    pub async fn store_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: Option<&str>,
        storage_class: &str,
        cache_control: Option<&str>,
    ) -> StorageResult<ObjectMetadata> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, body).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let etag = format!("{:x}", md5::compute(body));

        let upsert = sqlx::query_as::<_, ObjectMetadata>(
            r#"
            INSERT INTO objects (
                bucket, key, content_type, size_bytes, etag,
                storage_class, cache_control, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                storage_class = excluded.storage_class,
                cache_control = excluded.cache_control,
                last_modified = excluded.last_modified
            RETURNING bucket, key, content_type, size_bytes, etag,
                      storage_class, cache_control, last_modified
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(body.len() as i64)
        .bind(&etag)
        .bind(storage_class)
        .bind(cache_control)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match upsert {
            Ok(meta) => Ok(meta),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Store a file from disk as `original/<file name>`, with a content
    /// type guessed from its extension and storage class `STANDARD`.
    pub async fn import_original(&self, bucket: &str, path: &Path) -> StorageResult<ObjectMetadata> {
        let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} has no usable file name", path.display()),
            ))
        })?;
        let body = fs::read(path).await?;
        let content_type = ImageFormat::from_path(path).ok().map(|f| f.to_mime_type());
        let key = format!("{ORIGINAL_PREFIX}/{name}");

        self.store_object(bucket, &key, &body, content_type, IMPORT_STORAGE_CLASS, None)
            .await
    }
}

async fn write_synced(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(body).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl ObjectStore for LocalStorageService {
    /// A key this store refuses to write can never be present, so reads of
    /// one report [`StorageError::ObjectNotFound`].
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<OriginalObject> {
        if self.ensure_key_safe(key).is_err() {
            debug!(bucket = %bucket, key = ?key, "unstorable key read as missing");
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let meta = self.head_object(bucket, key).await?;

        let body = fs::read(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StorageError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Io(err)
                }
            })?;

        Ok(OriginalObject {
            content_type: meta.content_type,
            body: Bytes::from(body),
        })
    }

    async fn put_object(&self, bucket: &str, artifact: &DerivedArtifact) -> StorageResult<()> {
        let meta = self
            .store_object(
                bucket,
                &artifact.key,
                &artifact.body,
                Some(artifact.content_type.as_str()),
                &artifact.storage_class,
                Some(artifact.cache_control.as_str()),
            )
            .await?;
        debug!(key = %meta.key, etag = %meta.etag, size = meta.size_bytes, "stored object");
        Ok(())
    }

    /// Runs `SELECT 1` and a write/read/delete round trip under `base_path`.
    async fn check_ready(&self, bucket: &str) -> StorageResult<()> {
        self.ensure_bucket_name_safe(bucket)?;

        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if one != 1 {
            return Err(StorageError::Backend(format!(
                "unexpected SELECT 1 result: {one}"
            )));
        }

        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Backend("file content mismatch".into()));
        }

        Ok(())
    }
}

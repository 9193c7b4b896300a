//! In-process [`ObjectStore`] that records every call.
//!
//! Used by the test suites to assert how many fetches and writes a request
//! performed, and to inject storage failures.

use crate::models::object::{DerivedArtifact, OriginalObject};
use crate::services::storage_service::{ObjectStore, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// An object held by [`MemoryStorageService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    pub content_type: Option<String>,
    pub body: Bytes,
    pub storage_class: Option<String>,
    pub cache_control: Option<String>,
}

#[derive(Default)]
pub struct MemoryStorageService {
    objects: Mutex<HashMap<(String, String), MemoryObject>>,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
    fail_gets: AtomicBool,
    fail_puts: AtomicBool,
    fail_ready: AtomicBool,
}

impl MemoryStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing the call counters.
    pub fn insert(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        body: impl Into<Bytes>,
    ) {
        let object = MemoryObject {
            content_type: content_type.map(str::to_owned),
            body: body.into(),
            storage_class: None,
            cache_control: None,
        };
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((bucket.to_string(), key.to_string()), object);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<MemoryObject> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent `get_object` fail with a backend error.
    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `put_object` fail with a backend error.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `check_ready` fail, leaving reads and writes alone.
    pub fn fail_ready(&self, fail: bool) {
        self.fail_ready.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStorageService {
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<OriginalObject> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected get failure".into()));
        }

        self.object(bucket, key)
            .map(|obj| OriginalObject {
                content_type: obj.content_type,
                body: obj.body,
            })
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object(&self, bucket: &str, artifact: &DerivedArtifact) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected put failure".into()));
        }

        let object = MemoryObject {
            content_type: Some(artifact.content_type.clone()),
            body: artifact.body.clone(),
            storage_class: Some(artifact.storage_class.clone()),
            cache_control: Some(artifact.cache_control.clone()),
        };
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((bucket.to_string(), artifact.key.clone()), object);
        Ok(())
    }

    async fn check_ready(&self, _bucket: &str) -> StorageResult<()> {
        if self.fail_ready.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected readiness failure".into()));
        }
        Ok(())
    }
}

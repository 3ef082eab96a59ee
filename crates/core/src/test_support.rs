//! Test doubles for the object store, cache and dispatcher.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use notes_common::{AppError, AppResult, Cache, CacheError, ObjectStore};
use notes_db::entities::{file, note};

use crate::services::dispatch::ProcessingDispatcher;

/// Object store backed by a map.
#[derive(Default)]
pub struct MemoryObjectStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    /// `exists` returns an error for these keys.
    pub broken: Mutex<HashSet<String>>,
    /// `delete` fails for these keys.
    pub undeletable: Mutex<HashSet<String>>,
    pub fail_presign: Mutex<bool>,
    pub deleted: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn with_objects<'a>(keys: impl IntoIterator<Item = (&'a str, Vec<u8>)>) -> Self {
        let store = Self::default();
        {
            let mut objects = store.objects.lock().unwrap();
            for (key, data) in keys {
                objects.insert(key.to_string(), data);
            }
        }
        store
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, key: &str) -> AppResult<bool> {
        if self.broken.lock().unwrap().contains(key) {
            return Err(AppError::Storage(format!("timeout checking {key}")));
        }
        Ok(self.contains(key))
    }

    async fn get(&self, key: &str, dest: &Path) -> AppResult<()> {
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::Storage(format!("no such object {key}")))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(dest, data).await.unwrap();
        Ok(())
    }

    async fn put(&self, key: &str, path: &Path) -> AppResult<()> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        if self.undeletable.lock().unwrap().contains(key) {
            return Err(AppError::Storage(format!("access denied for {key}")));
        }
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn presigned_get(&self, key: &str, ttl: Duration) -> AppResult<String> {
        if *self.fail_presign.lock().unwrap() {
            return Err(AppError::Presign("signer unavailable".to_string()));
        }
        Ok(format!("memory://{key}?method=GET&ttl={}", ttl.as_secs()))
    }

    async fn presigned_put(&self, key: &str, ttl: Duration) -> AppResult<String> {
        if *self.fail_presign.lock().unwrap() {
            return Err(AppError::Presign("signer unavailable".to_string()));
        }
        Ok(format!("memory://{key}?method=PUT&ttl={}", ttl.as_secs()))
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Cache that records every call.
#[derive(Default)]
pub struct RecordingCache {
    pub entries: Mutex<HashMap<String, String>>,
    pub gets: Mutex<Vec<String>>,
    pub sets: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
    /// Every operation fails when set.
    pub unavailable: bool,
}

impl RecordingCache {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn insert<T: serde::Serialize>(&self, key: &str, value: &T) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), serde_json::to_string(value).unwrap());
    }

    pub fn set_count(&self) -> usize {
        self.sets.lock().unwrap().len()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Cache for RecordingCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gets.lock().unwrap().push(key.to_string());
        if self.unavailable {
            return Err(CacheError::Redis("connection refused".to_string()));
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String, _ttl: Duration) -> Result<(), CacheError> {
        self.sets.lock().unwrap().push(key.to_string());
        if self.unavailable {
            return Err(CacheError::Redis("connection refused".to_string()));
        }
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.deletes.lock().unwrap().push(key.to_string());
        if self.unavailable {
            return Err(CacheError::Redis("connection refused".to_string()));
        }
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Dispatcher that records what it was asked to process.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
    pub fail: bool,
}

#[async_trait::async_trait]
impl ProcessingDispatcher for RecordingDispatcher {
    async fn dispatch(&self, note_id: &str, object_keys: &[String]) -> AppResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((note_id.to_string(), object_keys.to_vec()));
        if self.fail {
            return Err(AppError::Dispatch("cluster API unreachable".to_string()));
        }
        Ok(())
    }
}

pub fn note_model(id: &str, user_id: &str) -> note::Model {
    let now = Utc::now();
    note::Model {
        id: id.to_string(),
        user_id: user_id.to_string(),
        title: format!("title {id}"),
        content: "content".to_string(),
        created_at: now.into(),
        updated_at: now.into(),
        deleted_at: None,
    }
}

pub fn file_model(id: &str, note_id: &str, key: &str) -> file::Model {
    let now = Utc::now();
    file::Model {
        id: id.to_string(),
        note_id: note_id.to_string(),
        original_object_key: key.to_string(),
        processed_object_key: None,
        created_at: now.into(),
        updated_at: now.into(),
        deleted_at: None,
    }
}

/// A small valid JPEG.
pub fn jpeg_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_fn(16, 16, |x, y| image::Rgb([(x * 16) as u8, (y * 16) as u8, 64]));
    let mut out = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

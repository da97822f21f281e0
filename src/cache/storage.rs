use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CacheError;
use crate::search::{MapState, Place, SearchParams};

/// File name of the persisted cache record, inside the data folder
pub const CACHE_FILE_NAME: &str = "search_cache.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub results: Vec<Place>,
    pub params: SearchParams,
    #[serde(default)]
    pub map_state: Option<MapState>,
    pub timestamp: DateTime<Utc>,
}

/// Everything the cache keeps across sessions
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedCache {
    pub entries: HashMap<String, CacheEntry>,
    pub last_key: Option<String>,
    pub restore: bool,
    pub radius_by_place: HashMap<String, f64>,
    pub category_by_place: HashMap<String, String>,
    pub scroll_y: Option<f64>,
}

/// Durable home of the cache record
pub trait CacheStorage: Send + Sync {
    fn load(&self) -> Result<Option<PersistedCache>, CacheError>;
    fn save(&self, record: &PersistedCache) -> Result<(), CacheError>;
}

impl<T: CacheStorage + ?Sized> CacheStorage for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<PersistedCache>, CacheError> {
        (**self).load()
    }

    fn save(&self, record: &PersistedCache) -> Result<(), CacheError> {
        (**self).save(record)
    }
}

/// Stores the record as a single json file
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at the default location inside the data folder
    pub fn in_data_path(data_path: &Path) -> Self {
        Self::new(data_path.join(CACHE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStorage for FileStorage {
    fn load(&self) -> Result<Option<PersistedCache>, CacheError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save(&self, record: &PersistedCache) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec(record)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

/// Keeps the record in memory, for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryStorage {
    record: Mutex<Option<PersistedCache>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: PersistedCache) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    /// Last record that was saved
    pub fn snapshot(&self) -> Option<PersistedCache> {
        self.record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CacheStorage for MemoryStorage {
    fn load(&self) -> Result<Option<PersistedCache>, CacheError> {
        Ok(self.snapshot())
    }

    fn save(&self, record: &PersistedCache) -> Result<(), CacheError> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_data_path(dir.path());
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn test_file_storage_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested").join(CACHE_FILE_NAME));

        let mut record = PersistedCache {
            last_key: Some("text:norfolk".into()),
            restore: true,
            scroll_y: Some(420.0),
            ..Default::default()
        };
        record.entries.insert(
            "text:norfolk".into(),
            CacheEntry {
                results: vec![Place {
                    id: "p1".into(),
                    ..Default::default()
                }],
                params: SearchParams::text("Norfolk"),
                map_state: None,
                timestamp: Utc::now(),
            },
        );
        record.radius_by_place.insert("p1".into(), 1500.0);

        storage.save(&record).unwrap();
        assert_eq!(storage.load().unwrap(), Some(record));
    }

    #[test]
    fn test_file_storage_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_data_path(dir.path());
        std::fs::write(storage.path(), "not json").unwrap();
        assert!(matches!(storage.load(), Err(CacheError::Json(_))));
    }
}

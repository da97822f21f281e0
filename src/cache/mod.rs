pub mod key;
pub mod storage;
pub mod store;

use thiserror::Error;

pub use self::{
    key::build_key,
    storage::{CacheEntry, CacheStorage, FileStorage, MemoryStorage, PersistedCache},
    store::{CacheStore, Clock, SystemClock, MAX_KEYS, TTL},
};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("json error")]
    Json(#[from] serde_json::Error),
}

/// Clock that only moves when told to
#[cfg(test)]
pub(crate) struct ManualClock(std::sync::Mutex<chrono::DateTime<chrono::Utc>>);

#[cfg(test)]
impl Default for ManualClock {
    fn default() -> Self {
        Self(std::sync::Mutex::new(chrono::Utc::now()))
    }
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn advance(&self, by: std::time::Duration) {
        let mut now = self.0.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        *self.0.lock().unwrap()
    }
}

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::{
    key::build_key,
    storage::{CacheEntry, CacheStorage, PersistedCache},
};
use crate::search::{MapState, Place, SearchParams};

/// Maximum number of search entries kept after a write
pub const MAX_KEYS: usize = 10;

/// Age after which an entry counts as absent
pub const TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Search results and viewport state, keyed by normalized search params.
///
/// Every mutation sweeps expired entries, trims the oldest entries down to
/// [`MAX_KEYS`], and writes the whole record to storage before returning.
/// Reads never clean anything up, they just treat expired entries as absent.
pub struct CacheStore {
    state: Mutex<PersistedCache>,
    storage: Box<dyn CacheStorage>,
    clock: Arc<dyn Clock>,
    revision: watch::Sender<u64>,
}

impl CacheStore {
    /// Loads the persisted record, starting empty if there is none or it can't be read
    pub fn open(storage: impl CacheStorage + 'static, clock: Arc<dyn Clock>) -> Self {
        let state = match storage.load() {
            Ok(Some(record)) => {
                tracing::debug!(entries = record.entries.len(), "loaded persisted cache");
                record
            }
            Ok(None) => PersistedCache::default(),
            Err(error) => {
                tracing::warn!(%error, "couldn't load persisted cache, starting empty");
                PersistedCache::default()
            }
        };

        let (revision, _) = watch::channel(0);

        Self {
            state: Mutex::new(state),
            storage: Box::new(storage),
            clock,
            revision,
        }
    }

    /// Notified with a new revision number after every mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn save_results(
        &self,
        params: &SearchParams,
        results: Vec<Place>,
        map_state: Option<MapState>,
    ) -> String {
        let key = build_key(params);
        let count = results.len();

        self.mutate(|state, now| {
            state.entries.insert(
                key.clone(),
                CacheEntry {
                    results,
                    params: params.clone(),
                    map_state,
                    timestamp: now,
                },
            );
            state.last_key = Some(key.clone());
            state.restore = true;
        });

        tracing::debug!(%key, count, "cached search results");
        key
    }

    pub fn get_results(&self, params: &SearchParams) -> Option<CacheEntry> {
        let key = build_key(params);
        let state = self.lock();
        let entry = self.live_entry(&state, &key);

        if entry.is_some() {
            tracing::debug!(%key, "cache hit");
        } else {
            tracing::debug!(%key, "cache miss");
        }
        entry
    }

    /// Exact match if there is one, otherwise whatever the last saved search was
    pub fn get_results_or_last(&self, params: &SearchParams) -> Option<CacheEntry> {
        self.get_results(params).or_else(|| self.get_last())
    }

    pub fn get_last(&self) -> Option<CacheEntry> {
        let state = self.lock();
        let key = state.last_key.as_deref()?;
        self.live_entry(&state, key)
    }

    /// Updates the viewport of an existing entry, or of the last one when `params` is `None`.
    ///
    /// Does nothing if that entry doesn't exist.
    pub fn save_map_state(&self, params: Option<&SearchParams>, map_state: MapState) {
        let key = params.map(build_key);

        let saved = self.mutate_if(|state, now| {
            let Some(key) = key.as_deref().or(state.last_key.as_deref()) else {
                return false;
            };
            let Some(entry) = state.entries.get_mut(key).filter(|e| !is_expired(e, now)) else {
                return false;
            };
            entry.map_state = Some(map_state);
            entry.timestamp = now;
            true
        });

        if !saved {
            tracing::debug!(key = ?key, "no entry to save map state into");
        }
    }

    pub fn save_radius_for_place(&self, place_id: &str, radius: f64) {
        self.mutate(|state, _| {
            state.radius_by_place.insert(place_id.to_string(), radius);
        });
    }

    pub fn radius_for_place(&self, place_id: &str) -> Option<f64> {
        self.lock().radius_by_place.get(place_id).copied()
    }

    pub fn save_category_for_place(&self, place_id: &str, category: &str) {
        self.mutate(|state, _| {
            state
                .category_by_place
                .insert(place_id.to_string(), category.to_string());
        });
    }

    pub fn category_for_place(&self, place_id: &str) -> Option<String> {
        self.lock().category_by_place.get(place_id).cloned()
    }

    /// Remembers where the results list was scrolled to
    pub fn save_scroll_hint(&self, scroll_y: f64) {
        self.mutate(|state, _| state.scroll_y = Some(scroll_y));
    }

    pub fn scroll_hint(&self) -> Option<f64> {
        self.lock().scroll_y
    }

    /// Whether there's a previous session worth restoring
    pub fn should_restore(&self) -> bool {
        self.lock().restore
    }

    /// Drops every search entry and the last key. Per-place preferences stay.
    pub fn clear_all(&self) {
        self.mutate(|state, _| {
            state.entries.clear();
            state.last_key = None;
            state.restore = false;
        });
        tracing::info!("cleared search cache");
    }

    /// Number of entries that haven't expired
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .entries
            .values()
            .filter(|e| !is_expired(e, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys physically stored, expired or not
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, PersistedCache> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live_entry(&self, state: &PersistedCache, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        state
            .entries
            .get(key)
            .filter(|e| !is_expired(e, now))
            .cloned()
    }

    fn mutate(&self, f: impl FnOnce(&mut PersistedCache, DateTime<Utc>)) {
        self.mutate_if(|state, now| {
            f(state, now);
            true
        });
    }

    /// Applies a write, then evicts and persists while still holding the lock.
    ///
    /// When `f` returns false nothing was changed, so nothing is evicted,
    /// persisted, or announced.
    fn mutate_if(&self, f: impl FnOnce(&mut PersistedCache, DateTime<Utc>) -> bool) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();

        if !f(&mut state, now) {
            return false;
        }
        evict(&mut state, now);

        if let Err(error) = self.storage.save(&state) {
            tracing::warn!(%error, "couldn't persist search cache");
        }
        drop(state);

        self.revision.send_modify(|rev| *rev += 1);
        true
    }
}

fn is_expired(entry: &CacheEntry, now: DateTime<Utc>) -> bool {
    // negative ages (clock went backwards) fail to convert and count as fresh
    (now - entry.timestamp)
        .to_std()
        .map(|age| age > TTL)
        .unwrap_or(false)
}

/// Removes expired entries first, then the oldest ones until at most [`MAX_KEYS`] remain.
fn evict(state: &mut PersistedCache, now: DateTime<Utc>) {
    let before = state.entries.len();
    state.entries.retain(|_, e| !is_expired(e, now));
    let expired = before - state.entries.len();

    let mut trimmed = 0;
    if state.entries.len() > MAX_KEYS {
        let mut by_age: Vec<(DateTime<Utc>, String)> = state
            .entries
            .iter()
            .map(|(k, e)| (e.timestamp, k.clone()))
            .collect();
        // ties are broken by key so the order is stable
        by_age.sort();

        let excess = state.entries.len() - MAX_KEYS;
        for (_, key) in by_age.into_iter().take(excess) {
            state.entries.remove(&key);
            trimmed += 1;
        }
    }

    if let Some(last) = &state.last_key {
        if !state.entries.contains_key(last) {
            tracing::debug!(key = %last, "last search was evicted");
            state.last_key = None;
        }
    }

    if expired + trimmed > 0 {
        tracing::debug!(expired, trimmed, "evicted cache entries");
    }
}

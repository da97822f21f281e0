use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::{
    cache::{CacheEntry, CacheStore},
    events::{EventBus, UiEvent},
    places::SearchApi,
    search::{MapState, SearchParams, SearchSource},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// served from the cache, no request was made
    Cached,
    Fetched,
    /// the request failed and an empty result set was published
    Failed,
    /// a newer search started before this one finished, nothing was published
    Superseded,
}

/// Runs searches through the cache, letting only the latest one publish.
///
/// Starting a search cancels the one in flight. A search whose request
/// completes after it was superseded is dropped without touching the cache
/// or the event bus.
#[derive(Clone)]
pub struct SearchOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn SearchApi>,
    cache: Arc<CacheStore>,
    events: EventBus,
    flight: Mutex<Flight>,
    map_state: Mutex<Option<MapState>>,
}

#[derive(Default)]
struct Flight {
    generation: u64,
    cancel: Option<CancellationToken>,
}

impl SearchOrchestrator {
    pub fn new(api: Arc<dyn SearchApi>, cache: Arc<CacheStore>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                cache,
                events,
                flight: Default::default(),
                map_state: Default::default(),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub async fn run(&self, params: SearchParams, source: SearchSource) -> RunOutcome {
        self.begin(params, source).execute().await
    }

    /// Supersedes whatever search is in flight and claims the next slot.
    ///
    /// Nothing is awaited here, so callers can order searches by when they
    /// call this rather than by when the returned search gets polled.
    pub fn begin(&self, params: SearchParams, source: SearchSource) -> PendingSearch {
        let mut flight = self.flight();
        if let Some(previous) = flight.cancel.take() {
            previous.cancel();
        }
        flight.generation += 1;

        let cancel = CancellationToken::new();
        flight.cancel = Some(cancel.clone());

        PendingSearch {
            orchestrator: self.clone(),
            params,
            source,
            generation: flight.generation,
            cancel,
        }
    }

    /// Cancels the search in flight, if any, without starting another
    pub fn cancel(&self) {
        let mut flight = self.flight();
        if let Some(previous) = flight.cancel.take() {
            previous.cancel();
        }
        flight.generation += 1;
    }

    /// Records the current viewport, and stores it on the last cached search
    pub fn set_map_state(&self, map_state: MapState) {
        *self
            .inner
            .map_state
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(map_state);
        self.inner.cache.save_map_state(None, map_state);
    }

    pub fn map_state(&self) -> Option<MapState> {
        *self
            .inner
            .map_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Publishes the cached results for `params`, or the last session if
    /// there's no match. No request is made.
    pub fn restore_session(&self, params: Option<&SearchParams>) -> Option<CacheEntry> {
        let cache = &self.inner.cache;
        let entry = match params {
            Some(params) => cache.get_results_or_last(params),
            None if cache.should_restore() => cache.get_last(),
            None => None,
        }?;

        tracing::info!(count = entry.results.len(), "restoring last session");

        if let Some(map_state) = entry.map_state {
            *self
                .inner
                .map_state
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(map_state);
        }
        self.inner.events.publish(UiEvent::Results {
            params: entry.params.clone(),
            results: Arc::new(entry.results.clone()),
            source: SearchSource::User,
            from_cache: true,
        });

        Some(entry)
    }

    fn flight(&self) -> MutexGuard<'_, Flight> {
        self.inner.flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A search that has claimed its slot but hasn't run yet
pub struct PendingSearch {
    orchestrator: SearchOrchestrator,
    params: SearchParams,
    source: SearchSource,
    generation: u64,
    cancel: CancellationToken,
}

impl PendingSearch {
    #[tracing::instrument(skip(self), fields(params = ?self.params, source = ?self.source))]
    pub async fn execute(self) -> RunOutcome {
        let inner = &self.orchestrator.inner;

        if let Some(entry) = inner.cache.get_results(&self.params) {
            let published = self.settle(|| {
                inner.events.publish(UiEvent::Results {
                    params: self.params.clone(),
                    results: Arc::new(entry.results),
                    source: self.source,
                    from_cache: true,
                });
            });
            return if published {
                RunOutcome::Cached
            } else {
                RunOutcome::Superseded
            };
        }

        let started = self.settle(|| {
            inner.events.publish(UiEvent::SearchStarted {
                params: self.params.clone(),
                source: self.source,
            });
        });
        if !started {
            return RunOutcome::Superseded;
        }

        let res = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            res = inner.api.search(&self.params) => Some(res),
        };

        let outcome = match res {
            None => None,
            Some(Err(e)) if e.is_cancelled() => None,
            Some(Ok(results)) => {
                let count = results.len();
                let published = self.settle(|| {
                    let map_state = self.orchestrator.map_state();
                    let results = Arc::new(results);
                    inner.events.publish(UiEvent::Results {
                        params: self.params.clone(),
                        results: results.clone(),
                        source: self.source,
                        from_cache: false,
                    });
                    inner
                        .cache
                        .save_results(&self.params, results.to_vec(), map_state);
                });
                published.then(|| {
                    tracing::info!(count, "search finished");
                    RunOutcome::Fetched
                })
            }
            Some(Err(error)) => {
                let published = self.settle(|| {
                    inner.events.publish(UiEvent::Results {
                        params: self.params.clone(),
                        results: Default::default(),
                        source: self.source,
                        from_cache: false,
                    });
                    inner.events.publish(UiEvent::SearchFailed {
                        params: self.params.clone(),
                        source: self.source,
                        message: error.to_string(),
                    });
                });
                published.then(|| {
                    tracing::warn!(%error, "search failed");
                    RunOutcome::Failed
                })
            }
        };

        outcome.unwrap_or_else(|| {
            tracing::debug!("search superseded");
            RunOutcome::Superseded
        })
    }

    /// Runs `f` only if this is still the newest search, holding the slot while it runs
    fn settle(&self, f: impl FnOnce()) -> bool {
        let flight = self.orchestrator.flight();
        if flight.generation != self.generation || self.cancel.is_cancelled() {
            return false;
        }
        f();
        true
    }
}

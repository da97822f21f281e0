use std::sync::Arc;

use tokio::sync::broadcast;

use crate::search::{LatLng, Place, SearchParams, SearchSource};

/// Things the ui layer reacts to
#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    SearchStarted {
        params: SearchParams,
        source: SearchSource,
    },
    Results {
        params: SearchParams,
        results: Arc<Vec<Place>>,
        source: SearchSource,
        /// served from the cache instead of the network
        from_cache: bool,
    },
    /// sent after an empty `Results` for the same search
    SearchFailed {
        params: SearchParams,
        source: SearchSource,
        message: String,
    },
    Navigate {
        url: String,
    },
    OpenListing {
        id: String,
    },
    SelectListing {
        id: String,
    },
    FocusMap {
        center: LatLng,
        zoom: Option<f64>,
    },
    Banner {
        text: String,
        level: Option<String>,
    },
}

const CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: UiEvent) {
        // nobody listening is fine
        let _ = self.tx.send(event);
    }
}

use std::sync::Arc;

use crate::{
    agent::{Dispatcher, Strategy, TransportError, UiBridge},
    cache::{CacheStore, FileStorage, SystemClock},
    config::Config,
    events::EventBus,
    orchestrator::SearchOrchestrator,
    places::{HttpSearchApi, SearchApi},
    search::SearchError,
};

#[derive(thiserror::Error, Debug)]
pub enum AppStateError {
    #[error("failed to build the search client: {0}")]
    Search(#[from] SearchError),
    #[error("failed to build the agent client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid agent endpoint: {0}")]
    Transport(#[from] TransportError),
}

/// Everything a session shares, wired together
pub struct AppState {
    pub config: Config,
    pub api: Arc<dyn SearchApi>,
    pub cache: Arc<CacheStore>,
    pub events: EventBus,
    pub orchestrator: SearchOrchestrator,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, AppStateError> {
        let api: Arc<dyn SearchApi> = Arc::new(HttpSearchApi::new(&config.search)?);
        let cache = Arc::new(CacheStore::open(
            FileStorage::in_data_path(&config.data_path),
            Arc::new(SystemClock),
        ));

        Ok(Self::with_parts(config, api, cache))
    }

    pub fn with_parts(config: Config, api: Arc<dyn SearchApi>, cache: Arc<CacheStore>) -> Self {
        let events = EventBus::new();
        let orchestrator = SearchOrchestrator::new(api.clone(), cache.clone(), events.clone());

        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.subscribe(Arc::new(UiBridge::new(orchestrator.clone())));

        AppState {
            config,
            api,
            cache,
            events,
            orchestrator,
            dispatcher,
        }
    }

    /// The transport strategy the config asks for
    pub fn agent_strategy(&self) -> Result<Strategy, AppStateError> {
        let client = reqwest::Client::builder()
            .timeout(self.config.search.timeout)
            .build()?;
        Ok(Strategy::from_config(&self.config.agent, client)?)
    }
}

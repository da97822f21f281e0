use std::sync::Arc;

use super::{
    dispatch::{AgentSubscriber, SubscriberError},
    message::{AgentMessage, UiCommand},
};
use crate::{
    events::UiEvent,
    orchestrator::SearchOrchestrator,
    search::{LatLng, MapState, SearchParams, SearchSource},
};

/// Turns agent messages into the same actions the user can take.
///
/// Searches go through the orchestrator, so they share the cache and the
/// single-flight rules with user searches.
pub struct UiBridge {
    orchestrator: SearchOrchestrator,
}

impl UiBridge {
    pub fn new(orchestrator: SearchOrchestrator) -> Self {
        Self { orchestrator }
    }

    fn search(&self, params: SearchParams) {
        // claim the slot now so searches run in the order they arrived
        let pending = self.orchestrator.begin(params, SearchSource::Agent);
        tokio::spawn(pending.execute());
    }

    fn publish(&self, event: UiEvent) {
        self.orchestrator.events().publish(event);
    }

    fn handle_ui(&self, command: &UiCommand) -> Result<(), SubscriberError> {
        match command {
            UiCommand::OpenListing { id } => self.publish(UiEvent::OpenListing { id: id.clone() }),
            UiCommand::SelectId { id } => self.publish(UiEvent::SelectListing { id: id.clone() }),
            UiCommand::FocusMap { lat, lng, zoom } => {
                let center = LatLng {
                    lat: *lat,
                    lng: *lng,
                };
                if let Some(zoom) = zoom {
                    self.orchestrator.set_map_state(MapState {
                        center,
                        zoom: *zoom,
                    });
                }
                self.publish(UiEvent::FocusMap {
                    center,
                    zoom: *zoom,
                });
            }
            UiCommand::Search { query } => {
                let query = query.trim();
                let params = match SearchParams::from_query_string(query) {
                    Some(params) => params,
                    // plain words, treat them as a text search
                    None if !query.is_empty() && !query.contains('=') => SearchParams::text(query),
                    None => {
                        return Err(SubscriberError::new(format!(
                            "can't search for {query:?}"
                        )))
                    }
                };
                self.search(params);
            }
            UiCommand::Banner { text, level } => self.publish(UiEvent::Banner {
                text: text.clone(),
                level: level.clone(),
            }),
        }
        Ok(())
    }
}

impl AgentSubscriber for UiBridge {
    fn on_message(&self, message: &AgentMessage) -> Result<(), SubscriberError> {
        match message {
            AgentMessage::Navigate { url } => match SearchParams::from_query_string(url) {
                Some(params) => self.search(params),
                None => self.publish(UiEvent::Navigate { url: url.clone() }),
            },
            AgentMessage::Ui(command) => self.handle_ui(command)?,
            AgentMessage::Results { results, params } => {
                // the agent already searched, anything in flight is stale now
                self.orchestrator.cancel();

                if let Some(params) = params {
                    self.orchestrator.cache().save_results(
                        params,
                        results.clone(),
                        self.orchestrator.map_state(),
                    );
                }
                self.publish(UiEvent::Results {
                    params: params
                        .clone()
                        .unwrap_or_else(|| SearchParams::Other(Default::default())),
                    results: Arc::new(results.clone()),
                    source: SearchSource::Agent,
                    from_cache: false,
                });
            }
            AgentMessage::Search { params } => self.search(params.clone()),
            AgentMessage::Ping { ts } => tracing::trace!(?ts, "agent ping"),
            AgentMessage::Log { level, message } => match level.as_deref() {
                Some("error") => tracing::error!(target: "agent", "{message}"),
                Some("warn") | Some("warning") => tracing::warn!(target: "agent", "{message}"),
                Some("debug") => tracing::debug!(target: "agent", "{message}"),
                _ => tracing::info!(target: "agent", "{message}"),
            },
        }
        Ok(())
    }
}

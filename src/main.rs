use std::sync::Arc;

use aptsearch::{
    agent::AgentTransport,
    app_state::AppState,
    config::Config,
    events::UiEvent,
    places::SearchApi,
    search::{SearchParams, SearchSource},
    tracing::setup_tracing,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("invalid configuration");
    let guard = setup_tracing(&config.log);

    let state = AppState::new(config).expect("failed to set up the session");
    tokio::spawn(log_events(state.events.subscribe(), state.api.clone()));

    state.orchestrator.restore_session(None);

    let strategy = state
        .agent_strategy()
        .expect("failed to set up the agent transport");
    let transport = AgentTransport::spawn(strategy, state.dispatcher.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => handle_line(&state, line.trim()),
            Ok(None) => break,
            Err(error) => {
                tracing::error!(%error, "failed to read stdin");
                break;
            }
        }
    }

    tracing::info!("shutting down");
    transport.shutdown().await;

    // a pending stdin read would keep the runtime from shutting down
    drop(guard);
    std::process::exit(0);
}

fn handle_line(state: &AppState, line: &str) {
    let params = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
        [] => return,
        ["clear"] => {
            state.cache.clear_all();
            tracing::info!("cache cleared");
            return;
        }
        ["nearby", sw, ne] => SearchParams::nearby(*sw, *ne),
        _ => SearchParams::text(line),
    };

    let pending = state.orchestrator.begin(params, SearchSource::User);
    tokio::spawn(pending.execute());
}

async fn log_events(mut events: broadcast::Receiver<UiEvent>, api: Arc<dyn SearchApi>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "ui events were dropped");
                continue;
            }
            Err(RecvError::Closed) => return,
        };

        match event {
            UiEvent::SearchStarted { params, source } => {
                tracing::info!(?params, ?source, "searching")
            }
            UiEvent::Results {
                params,
                results,
                source,
                from_cache,
            } => {
                tracing::info!(?params, ?source, from_cache, count = results.len(), "results");
                for place in results.iter() {
                    tracing::info!(
                        id = %place.id,
                        name = place.name.as_deref().unwrap_or("-"),
                        address = place.address.as_deref().unwrap_or("-"),
                    );
                }
            }
            UiEvent::SearchFailed {
                params, message, ..
            } => tracing::warn!(?params, error = %message, "search failed"),
            UiEvent::OpenListing { id } => {
                let api = api.clone();
                tokio::spawn(async move {
                    match api.details(&id).await {
                        Ok(details) => tracing::info!(
                            id = %id,
                            name = details.place.name.as_deref().unwrap_or("-"),
                            photos = details.photos.len(),
                            "listing"
                        ),
                        Err(error) => tracing::warn!(%error, id = %id, "failed to load listing"),
                    }
                });
            }
            other => tracing::info!(event = ?other, "ui event"),
        }
    }
}

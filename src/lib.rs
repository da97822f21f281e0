pub mod agent;
pub mod app_state;
pub mod cache;
pub mod config;
pub mod events;
pub mod orchestrator;
pub mod places;
pub mod search;
pub mod tracing;

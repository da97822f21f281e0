//! The bridge between an external agent and the search ui.
//!
//! [`AgentTransport`] keeps a connection to the agent service open, the
//! [`Dispatcher`] drops anything that isn't a known [`AgentMessage`], and
//! [`UiBridge`] turns what's left into searches and ui events.

pub mod bridge;
pub mod dispatch;
pub mod message;
pub mod outbound;
pub mod transport;

pub use bridge::UiBridge;
pub use dispatch::{AgentSubscriber, Dispatcher, SubscriberError, SubscriptionId};
pub use message::{AgentMessage, UiCommand};
pub use outbound::{send_once, DEFAULT_GRACE};
pub use transport::{AgentTransport, ConnectionState, Strategy, TransportError};

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::dispatch::Dispatcher;
use crate::config::{AgentConfig, TransportMode};

mod poll;
mod push;

pub use poll::{CommandSource, HttpCommandSource, PollStrategy};
pub use push::{Connector, FrameStream, PushStrategy, WsConnector};

#[cfg(test)]
pub use poll::MockCommandSource;

pub const SOCKET_PATH: &str = "/ws/agent/";
pub const POLL_PATH: &str = "/api/agent/command/";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid agent url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported url scheme {0:?}")]
    Scheme(String),
    #[error("failed to connect: {0}")]
    Connect(tungstenite::Error),
    #[error("socket error: {0}")]
    Socket(#[from] tungstenite::Error),
    #[error("poll request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("poll endpoint responded with {0}")]
    Status(u16),
    #[error("poll response isn't json: {0}")]
    Json(serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// torn down, nothing will be retried
    Stopped,
}

/// Socket url for the agent service, `ws(s)://<origin>/ws/agent/[?token=..]`
pub fn socket_url(origin: &str, token: Option<&str>) -> Result<Url, TransportError> {
    let mut url = endpoint(origin, SOCKET_PATH, token)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::Scheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Scheme(scheme.to_string()))?;
    Ok(url)
}

/// Pending command url, `http(s)://<origin>/api/agent/command/[?token=..]`
pub fn poll_url(origin: &str, token: Option<&str>) -> Result<Url, TransportError> {
    let mut url = endpoint(origin, POLL_PATH, token)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        other => return Err(TransportError::Scheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Scheme(scheme.to_string()))?;
    Ok(url)
}

fn endpoint(origin: &str, path: &str, token: Option<&str>) -> Result<Url, TransportError> {
    let mut url = Url::parse(origin)?;
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}{path}"));
    url.set_query(None);
    url.set_fragment(None);
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// How the transport reaches the agent service
pub enum Strategy {
    Push(PushStrategy),
    Poll(PollStrategy),
    /// push until `fallback_after` connects in a row fail, then poll for good
    Auto {
        push: PushStrategy,
        poll: PollStrategy,
        fallback_after: u32,
    },
}

impl Strategy {
    pub fn from_config(config: &AgentConfig, client: reqwest::Client) -> Result<Self, TransportError> {
        let token = config.token.as_deref();
        let push = || -> Result<PushStrategy, TransportError> {
            Ok(PushStrategy::new(
                socket_url(&config.base_origin, token)?,
                Arc::new(WsConnector),
                config.reconnect_delay,
            ))
        };
        let poll = || -> Result<PollStrategy, TransportError> {
            Ok(PollStrategy::new(
                Arc::new(HttpCommandSource::new(
                    client.clone(),
                    poll_url(&config.base_origin, token)?,
                )),
                config.poll_interval,
            ))
        };

        Ok(match config.mode {
            TransportMode::Push => Strategy::Push(push()?),
            TransportMode::Poll => Strategy::Poll(poll()?),
            TransportMode::Auto => Strategy::Auto {
                push: push()?,
                poll: poll()?,
                fallback_after: config.fallback_after.max(1),
            },
        })
    }
}

/// Context shared by the strategies while they run
pub(crate) struct Link {
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
}

impl Link {
    pub(crate) fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            tracing::info!(?state, "agent transport state changed");
        }
    }

    /// Sleeps for `delay`. Returns false if torn down meanwhile.
    pub(crate) async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// A single connection to the agent service, feeding every inbound message
/// to the [`Dispatcher`].
///
/// Dropping it without calling [`AgentTransport::shutdown`] still stops the
/// background task.
pub struct AgentTransport {
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AgentTransport {
    pub fn spawn(strategy: Strategy, dispatcher: Arc<Dispatcher>) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let link = Link {
            dispatcher,
            cancel: cancel.clone(),
            state: tx,
        };

        let task = tokio::spawn(async move {
            run(strategy, &link).await;
            link.set_state(ConnectionState::Stopped);
        });

        Self {
            cancel,
            state: rx,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops reconnecting/polling and closes the connection.
    /// Calling it again, or after the transport stopped, does nothing.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(error) = task.await {
                tracing::warn!(%error, "agent transport task failed");
            }
        }
    }
}

impl Drop for AgentTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(strategy: Strategy, link: &Link) {
    match strategy {
        Strategy::Push(push) => {
            push.run(link, None).await;
        }
        Strategy::Poll(poll) => poll.run(link).await,
        Strategy::Auto {
            push,
            poll,
            fallback_after,
        } => {
            if push.run(link, Some(fallback_after)).await {
                tracing::warn!(
                    attempts = fallback_after,
                    "agent socket keeps failing, falling back to polling"
                );
                poll.run(link).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use futures::{stream, StreamExt};
    use serde_json::json;

    use super::*;
    use crate::agent::{dispatch::SubscriberError, message::AgentMessage};

    fn recorder(dispatcher: &Dispatcher) -> Arc<Mutex<Vec<AgentMessage>>> {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        dispatcher.subscribe(Arc::new(move |m: &AgentMessage| -> Result<(), SubscriberError> {
            sink.lock().unwrap().push(m.clone());
            Ok(())
        }));
        seen
    }

    /// Plays back a script of connection attempts, then connects to a
    /// socket that stays open without sending anything.
    ///
    /// Connecting takes 10ms and scripted sockets close 100ms after their
    /// last frame.
    struct ScriptedConnector {
        script: Mutex<VecDeque<Option<Vec<&'static str>>>>,
        attempts: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(script: Vec<Option<Vec<&'static str>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                attempts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _url: &Url) -> Result<FrameStream, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Some(frames)) => {
                    let close = stream::once(tokio::time::sleep(Duration::from_millis(100)))
                        .filter_map(|_| async { None });
                    Ok(stream::iter(frames.into_iter().map(|f| Ok(f.to_string())))
                        .chain(close)
                        .boxed())
                }
                Some(None) => Err(TransportError::Scheme("refused".into())),
                None => Ok(stream::pending().boxed()),
            }
        }
    }

    fn push(connector: Arc<ScriptedConnector>) -> PushStrategy {
        PushStrategy::new(
            socket_url("http://agent.test", None).unwrap(),
            connector,
            Duration::from_millis(2000),
        )
    }

    #[test]
    fn test_endpoint_urls() {
        assert_eq!(
            socket_url("http://127.0.0.1:8000", None).unwrap().as_str(),
            "ws://127.0.0.1:8000/ws/agent/"
        );
        assert_eq!(
            socket_url("https://apts.example.com/", Some("s3cret")).unwrap().as_str(),
            "wss://apts.example.com/ws/agent/?token=s3cret"
        );
        assert_eq!(
            socket_url("https://apts.example.com/app", None).unwrap().as_str(),
            "wss://apts.example.com/app/ws/agent/"
        );
        assert_eq!(
            poll_url("wss://apts.example.com", Some("a b")).unwrap().as_str(),
            "https://apts.example.com/api/agent/command/?token=a+b"
        );
        assert!(matches!(
            socket_url("ftp://apts.example.com", None),
            Err(TransportError::Scheme(_))
        ));
        assert!(matches!(
            socket_url("not a url", None),
            Err(TransportError::Url(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_reconnects_after_close_and_failure() {
        let dispatcher = Arc::new(Dispatcher::new());
        let seen = recorder(&dispatcher);
        let connector = ScriptedConnector::new(vec![
            Some(vec![r#"{"type":"ping","ts":1}"#]),
            None,
            Some(vec![r#"{"type":"bogus"}"#, r#"{"type":"ping","ts":2}"#]),
        ]);

        let transport = AgentTransport::spawn(Strategy::Push(push(connector.clone())), dispatcher);

        let mut state = transport.subscribe_state();
        let history = Arc::new(Mutex::new(vec![*state.borrow()]));
        let log = history.clone();
        let watcher = tokio::spawn(async move {
            while state.changed().await.is_ok() {
                log.lock().unwrap().push(*state.borrow_and_update());
            }
        });

        // three scripted attempts, two delays, then the quiet socket
        tokio::time::sleep(Duration::from_millis(6300)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(transport.state(), ConnectionState::Connected);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                AgentMessage::Ping { ts: Some(1.0) },
                AgentMessage::Ping { ts: Some(2.0) }
            ]
        );

        transport.shutdown().await;
        assert_eq!(transport.state(), ConnectionState::Stopped);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);

        watcher.await.unwrap();
        use ConnectionState::*;
        assert_eq!(
            *history.lock().unwrap(),
            vec![
                Disconnected,
                Connecting,
                Connected,
                // socket closed
                Disconnected,
                Connecting,
                // connect refused
                Disconnected,
                Connecting,
                Connected,
                Disconnected,
                Connecting,
                Connected,
                Stopped,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_falls_back_to_polling() {
        let dispatcher = Arc::new(Dispatcher::new());
        let seen = recorder(&dispatcher);
        let connector = ScriptedConnector::new(vec![None, None, None, Some(vec![])]);

        let polls = Arc::new(AtomicUsize::new(0));
        let mut source = MockCommandSource::new();
        let counter = polls.clone();
        source.expect_fetch().returning(move || {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(Some(json!({
                    "pending": true,
                    "message": {"type": "navigate", "url": "/listing/p1"}
                }))),
                1 => Err(TransportError::Status(503)),
                _ => Ok(None),
            }
        });

        let transport = AgentTransport::spawn(
            Strategy::Auto {
                push: push(connector.clone()),
                poll: PollStrategy::new(Arc::new(source), Duration::from_millis(1500)),
                fallback_after: 3,
            },
            dispatcher,
        );

        tokio::time::sleep(Duration::from_millis(7000)).await;
        transport.shutdown().await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert!(polls.load(Ordering::SeqCst) >= 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![AgentMessage::Navigate {
                url: "/listing/p1".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_dispatches_every_shape() {
        let dispatcher = Arc::new(Dispatcher::new());
        let seen = recorder(&dispatcher);

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut source = MockCommandSource::new();
        source.expect_fetch().returning(move || {
            Ok(match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Some(json!([{"type": "ping"}, {"type": "log", "message": "hi"}])),
                1 => Some(json!({"type": "ping", "ts": 5})),
                2 => Some(json!({"pending": false})),
                _ => None,
            })
        });

        let transport = AgentTransport::spawn(
            Strategy::Poll(PollStrategy::new(Arc::new(source), Duration::from_millis(1500))),
            dispatcher,
        );
        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(transport.state(), ConnectionState::Connected);

        transport.shutdown().await;
        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);

        let kinds: Vec<_> = seen.lock().unwrap().iter().map(|m| m.kind()).collect();
        assert_eq!(kinds, ["ping", "log", "ping"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let connector = ScriptedConnector::new(vec![]);
        let transport = AgentTransport::spawn(
            Strategy::Push(push(connector)),
            Arc::new(Dispatcher::new()),
        );

        transport.shutdown().await;
        transport.shutdown().await;
        assert!(transport.is_stopped());
        assert_eq!(transport.state(), ConnectionState::Stopped);
        drop(transport);
    }

    #[test]
    fn test_strategy_from_config() {
        let config = AgentConfig {
            mode: TransportMode::Poll,
            ..Default::default()
        };
        assert!(matches!(
            Strategy::from_config(&config, reqwest::Client::new()),
            Ok(Strategy::Poll(_))
        ));

        let config = AgentConfig {
            base_origin: "mailto:someone@example.com".into(),
            ..Default::default()
        };
        assert!(Strategy::from_config(&config, reqwest::Client::new()).is_err());
    }
}

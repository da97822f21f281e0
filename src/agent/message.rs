use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::search::{Place, SearchParams};

/// Commands an agent can send to the ui. Anything else is dropped at the boundary.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum AgentMessage {
    #[serde(rename = "navigate")]
    Navigate { url: String },
    #[serde(rename = "AGENT_UI")]
    Ui(UiCommand),
    #[serde(rename = "AGENT_RESULTS")]
    Results {
        results: Vec<Place>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<SearchParams>,
    },
    #[serde(rename = "AGENT_SEARCH")]
    Search { params: SearchParams },
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<f64>,
    },
    #[serde(rename = "log")]
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
        message: String,
    },
}

impl AgentMessage {
    /// Every `type` an agent message can have
    pub const KINDS: [&'static str; 6] = [
        "navigate",
        "AGENT_UI",
        "AGENT_RESULTS",
        "AGENT_SEARCH",
        "ping",
        "log",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            AgentMessage::Navigate { .. } => "navigate",
            AgentMessage::Ui(_) => "AGENT_UI",
            AgentMessage::Results { .. } => "AGENT_RESULTS",
            AgentMessage::Search { .. } => "AGENT_SEARCH",
            AgentMessage::Ping { .. } => "ping",
            AgentMessage::Log { .. } => "log",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "action", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiCommand {
    OpenListing {
        id: String,
    },
    SelectId {
        id: String,
    },
    FocusMap {
        lat: f64,
        lng: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zoom: Option<f64>,
    },
    /// `query` holds url-style search params, like `mode=text&q=norfolk`
    Search {
        query: String,
    },
    Banner {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
    },
}

/// Validates a single payload, returning `None` for anything that isn't a known message
pub fn accept(raw: Value) -> Option<AgentMessage> {
    let Some(obj) = raw.as_object() else {
        tracing::debug!("dropping agent payload that isn't an object");
        return None;
    };
    let Some(kind) = obj.get("type").and_then(Value::as_str) else {
        tracing::debug!("dropping agent payload without a type");
        return None;
    };
    if !AgentMessage::KINDS.contains(&kind) {
        tracing::debug!(kind, "dropping agent payload of unknown type");
        return None;
    }

    match serde_json::from_value(raw) {
        Ok(message) => Some(message),
        Err(error) => {
            tracing::debug!(%error, "dropping malformed agent message");
            None
        }
    }
}

/// Splits whatever a transport received into individual payloads.
///
/// Handles `{pending, message}` envelopes, bare arrays, and single messages.
pub fn unwrap_envelope(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut obj) if obj.contains_key("pending") && !obj.contains_key("type") => {
            match (obj.get("pending").and_then(Value::as_bool), obj.remove("message")) {
                (Some(true), Some(message)) => vec![message],
                _ => vec![],
            }
        }
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_accepts_every_kind() {
        let cases = [
            json!({"type": "navigate", "url": "/dashboard?mode=text&q=24060"}),
            json!({"type": "AGENT_UI", "action": "OPEN_LISTING", "payload": {"id": "p1"}}),
            json!({"type": "AGENT_UI", "action": "SELECT_ID", "payload": {"id": "p1"}}),
            json!({"type": "AGENT_UI", "action": "FOCUS_MAP", "payload": {"lat": 1, "lng": 2}}),
            json!({"type": "AGENT_UI", "action": "SEARCH", "payload": {"query": "mode=text&q=norfolk"}}),
            json!({"type": "AGENT_UI", "action": "BANNER", "payload": {"text": "hi"}}),
            json!({"type": "AGENT_RESULTS", "results": [{"id": "p1"}], "params": {"mode": "text", "q": "x"}}),
            json!({"type": "AGENT_SEARCH", "params": {"mode": "text", "q": "norfolk"}}),
            json!({"type": "ping"}),
            json!({"type": "log", "level": "warn", "message": "slow"}),
        ];
        for case in cases {
            assert!(accept(case.clone()).is_some(), "{case} was rejected");
        }
    }

    #[test]
    fn test_focus_map_payload() {
        let message = accept(json!({
            "type": "AGENT_UI",
            "action": "FOCUS_MAP",
            "payload": {"lat": 1, "lng": 2}
        }));
        assert_eq!(
            message,
            Some(AgentMessage::Ui(UiCommand::FocusMap {
                lat: 1.0,
                lng: 2.0,
                zoom: None
            }))
        );
    }

    #[test]
    fn test_ping_timestamps() {
        assert_eq!(
            accept(json!({"type": "ping", "ts": 1712345678.5})),
            Some(AgentMessage::Ping {
                ts: Some(1712345678.5)
            })
        );
        assert_eq!(
            accept(json!({"type": "ping", "ts": 1712345678})),
            Some(AgentMessage::Ping {
                ts: Some(1712345678.0)
            })
        );
    }

    #[test]
    fn test_rejects_malformed() {
        let cases = [
            json!({"foo": "bar"}),
            json!("AGENT_SEARCH"),
            json!(42),
            json!({"type": "welcome", "message": "connected"}),
            json!({"type": 7}),
            json!({"type": "AGENT_SEARCH"}),
            json!({"type": "AGENT_SEARCH", "params": "norfolk"}),
            json!({"type": "AGENT_UI", "action": "SELF_DESTRUCT", "payload": {}}),
            json!({"type": "AGENT_UI", "action": "FOCUS_MAP", "payload": {"lat": "north"}}),
            json!({"type": "navigate"}),
        ];
        for case in cases {
            assert!(accept(case.clone()).is_none(), "{case} was accepted");
        }
    }

    #[test]
    fn test_messages_keep_their_wire_shape() {
        let raw = json!({"type": "AGENT_UI", "action": "BANNER", "payload": {"text": "Showing 4 places"}});
        let message = accept(raw.clone()).unwrap();
        assert_eq!(message.kind(), "AGENT_UI");
        assert_eq!(serde_json::to_value(&message).unwrap(), raw);
    }

    #[test]
    fn test_unwrap_envelope() {
        let message = json!({"type": "ping"});

        assert_eq!(
            unwrap_envelope(json!({"pending": true, "message": message})),
            vec![message.clone()]
        );
        assert!(unwrap_envelope(json!({"pending": false})).is_empty());
        assert_eq!(
            unwrap_envelope(json!([message.clone(), {"type": "log", "message": "x"}])).len(),
            2
        );
        assert_eq!(unwrap_envelope(message.clone()), vec![message]);
    }
}

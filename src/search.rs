use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Parameters of a single search, as sent to the search endpoint.
///
/// Any JSON object converts into one of these; objects that are neither a
/// text nor a nearby search are kept verbatim in `Other`. Fields beyond the
/// ones a search is recognized by are kept in `extra`, so converting back
/// gives the original object. They don't take part in the cache key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum SearchParams {
    Text {
        q: String,
        extra: Map<String, Value>,
    },
    /// `sw` and `ne` are `"lat,lng"` strings, kept exactly as provided
    Nearby {
        sw: String,
        ne: String,
        extra: Map<String, Value>,
    },
    Other(Map<String, Value>),
}

impl SearchParams {
    pub fn text(q: impl Into<String>) -> Self {
        Self::Text {
            q: q.into(),
            extra: Map::new(),
        }
    }

    pub fn nearby(sw: impl Into<String>, ne: impl Into<String>) -> Self {
        Self::Nearby {
            sw: sw.into(),
            ne: ne.into(),
            extra: Map::new(),
        }
    }

    /// Parses url-style params, like `mode=text&q=norfolk`.
    ///
    /// Full paths are accepted too (`/dashboard?mode=text&q=norfolk`), in
    /// which case only the part after `?` is looked at.
    /// Returns `None` when no `mode` is present.
    pub fn from_query_string(query: &str) -> Option<Self> {
        let query = match query.split_once('?') {
            Some((_, q)) => q,
            None if query.contains('=') => query,
            None => return None,
        };

        let map: Map<String, Value> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();

        if !map.contains_key("mode") {
            return None;
        }

        Some(map.into())
    }

    /// Key/value pairs to send as the query string of a search request
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let (mut pairs, rest): (Vec<(String, String)>, _) = match self {
            SearchParams::Text { q, extra } => (
                vec![("mode".into(), "text".into()), ("q".into(), q.clone())],
                extra,
            ),
            SearchParams::Nearby { sw, ne, extra } => (
                vec![
                    ("mode".into(), "nearby".into()),
                    ("sw".into(), sw.clone()),
                    ("ne".into(), ne.clone()),
                ],
                extra,
            ),
            SearchParams::Other(map) => (vec![], map),
        };

        pairs.extend(rest.iter().filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            Value::Number(n) => Some((k.clone(), n.to_string())),
            Value::Bool(b) => Some((k.clone(), b.to_string())),
            _ => None,
        }));
        pairs
    }
}

impl TryFrom<Value> for SearchParams {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(map.into()),
            other => Err(format!("search params must be an object, got {other}")),
        }
    }
}

impl From<Map<String, Value>> for SearchParams {
    fn from(mut map: Map<String, Value>) -> Self {
        let field = |map: &Map<String, Value>, name: &str| {
            map.get(name).and_then(Value::as_str).map(str::to_owned)
        };

        match field(&map, "mode").as_deref() {
            Some("text") => {
                if let Some(q) = field(&map, "q") {
                    map.remove("mode");
                    map.remove("q");
                    return Self::Text { q, extra: map };
                }
            }
            Some("nearby") => {
                if let (Some(sw), Some(ne)) = (field(&map, "sw"), field(&map, "ne")) {
                    map.remove("mode");
                    map.remove("sw");
                    map.remove("ne");
                    return Self::Nearby { sw, ne, extra: map };
                }
            }
            _ => {}
        }

        Self::Other(map)
    }
}

impl From<SearchParams> for Value {
    fn from(params: SearchParams) -> Self {
        let map = match params {
            SearchParams::Text { q, mut extra } => {
                extra.insert("mode".into(), "text".into());
                extra.insert("q".into(), q.into());
                extra
            }
            SearchParams::Nearby { sw, ne, mut extra } => {
                extra.insert("mode".into(), "nearby".into());
                extra.insert("sw".into(), sw.into());
                extra.insert("ne".into(), ne.into());
                extra
            }
            SearchParams::Other(map) => map,
        };
        Value::Object(map)
    }
}

/// A listing returned by the search endpoint.
///
/// Only `id` is ever looked at; everything else is passed through.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_maps_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_rating_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Detail view of a single listing
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PlaceDetails {
    #[serde(flatten)]
    pub place: Place,
    #[serde(default)]
    pub photos: Vec<String>,
}

/// Body of a search response
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SearchResults {
    #[serde(default)]
    pub results: Vec<Place>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Snapshot of the map viewport
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct MapState {
    pub center: LatLng,
    pub zoom: f64,
}

/// Who asked for a search. Only used for ui feedback.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    User,
    Agent,
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("network error")]
    Network(#[from] reqwest::Error),
    #[error("search endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("json parse error")]
    JsonParse(reqwest::Error),
    #[error("search was cancelled")]
    Cancelled,
}

impl SearchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

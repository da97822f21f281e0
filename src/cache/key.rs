use crate::search::SearchParams;

/// Builds the cache key for a set of search params.
///
/// Text queries are trimmed and lowercased so that equivalent phrasing
/// shares a slot. Nearby bounds are used exactly as given.
pub fn build_key(params: &SearchParams) -> String {
    match params {
        SearchParams::Text { q, .. } => format!("text:{}", q.trim().to_lowercase()),
        SearchParams::Nearby { sw, ne, .. } => format!("nearby:{sw}|{ne}"),
        // serde_json::Map is ordered by key, so this doesn't depend on insertion order
        SearchParams::Other(map) => serde_json::Value::Object(map.clone()).to_string(),
    }
}

use std::time::Duration;

use ahash::RandomState;
use moka::future::Cache;

use crate::{
    config::SearchApiConfig,
    search::{Place, PlaceDetails, SearchError, SearchParams, SearchResults},
};

#[cfg(test)]
use mockall::{automock, predicate::*};

/// The property search backend
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, params: &SearchParams) -> Result<Vec<Place>, SearchError>;
    async fn details(&self, place_id: &str) -> Result<PlaceDetails, SearchError>;
}

pub type DetailsCache = Cache<String, PlaceDetails, RandomState>;

/// [`SearchApi`] over http, authenticated with a bearer token when one is configured
pub struct HttpSearchApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    details: DetailsCache,
}

impl HttpSearchApi {
    pub fn new(config: &SearchApiConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let details = Cache::builder()
            .max_capacity(200)
            .time_to_live(Duration::from_secs(30 * 60))
            .build_with_hasher(RandomState::default());

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            details,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait::async_trait]
impl SearchApi for HttpSearchApi {
    async fn search(&self, params: &SearchParams) -> Result<Vec<Place>, SearchError> {
        let res = self
            .get("/api/properties/search/")
            .query(&params.query_pairs())
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: SearchResults = res.json().await.map_err(SearchError::JsonParse)?;
        tracing::debug!(count = body.results.len(), "search endpoint responded");
        Ok(body.results)
    }

    async fn details(&self, place_id: &str) -> Result<PlaceDetails, SearchError> {
        if let Some(details) = self.details.get(place_id).await {
            return Ok(details);
        }

        let res = self
            .get(&format!("/api/properties/{place_id}/"))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let details: PlaceDetails = res.json().await.map_err(SearchError::JsonParse)?;
        self.details
            .insert(place_id.to_string(), details.clone())
            .await;
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    use super::*;

    fn api(server: &Server, token: Option<&str>) -> HttpSearchApi {
        HttpSearchApi::new(&SearchApiConfig {
            base_url: server.url_str("/"),
            token: token.map(str::to_string),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_text_search() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/properties/search/"),
                request::query(url_decoded(contains(("mode", "text")))),
                request::query(url_decoded(contains(("q", "Norfolk, VA")))),
                request::headers(contains(("authorization", "Bearer secret"))),
            ])
            .respond_with(json_encoded(json!({
                "results": [
                    {"id": "p1", "name": "Harbor Flats", "lat": 36.8, "lng": -76.3},
                    {"id": "p2"}
                ]
            }))),
        );

        let results = api(&server, Some("secret"))
            .search(&SearchParams::text("Norfolk, VA"))
            .await
            .unwrap();

        let ids: Vec<_> = results.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2"]);
        assert_eq!(results[0].name.as_deref(), Some("Harbor Flats"));
    }

    #[tokio::test]
    async fn test_nearby_search_sends_bounds_verbatim() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/properties/search/"),
                request::query(url_decoded(contains(("mode", "nearby")))),
                request::query(url_decoded(contains(("sw", "36.85,-76.33")))),
                request::query(url_decoded(contains(("ne", "36.90,-76.20")))),
            ])
            .respond_with(json_encoded(json!({ "results": [] }))),
        );

        let results = api(&server, None)
            .search(&SearchParams::nearby("36.85,-76.33", "36.90,-76.20"))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_error_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/properties/search/"))
                .respond_with(status_code(502).body("places down")),
        );

        let err = api(&server, None)
            .search(&SearchParams::text("norfolk"))
            .await
            .unwrap_err();

        match err {
            SearchError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "places down");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_details_are_memoized() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/properties/p1/"))
                .times(1)
                .respond_with(json_encoded(json!({
                    "id": "p1",
                    "name": "Harbor Flats",
                    "photos": ["places/p1/photos/a", "places/p1/photos/b"]
                }))),
        );

        let api = api(&server, None);
        let first = api.details("p1").await.unwrap();
        let second = api.details("p1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.place.id, "p1");
        assert_eq!(first.photos.len(), 2);
    }
}

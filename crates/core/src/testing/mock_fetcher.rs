//! Mock page fetcher for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::upstream::{FetchError, PageFetcher};

/// A canned upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Successful response with this body.
    Body(String),
    /// Non-success HTTP status.
    Status(u16),
    /// Ban notice with this message.
    Banned(String),
}

impl MockResponse {
    fn into_result(self) -> Result<String, FetchError> {
        match self {
            MockResponse::Body(body) => Ok(body),
            MockResponse::Status(status) => Err(FetchError::Status {
                status,
                body: String::new(),
            }),
            MockResponse::Banned(message) => Err(FetchError::Banned(message)),
        }
    }
}

/// A request seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// "GET" or "POST".
    pub method: &'static str,
    pub url: String,
    /// JSON body of POST requests.
    pub body: Option<serde_json::Value>,
}

/// Produces a response for a request, or `None` to fall through to routes.
type Handler = Box<dyn Fn(&RecordedRequest) -> Option<MockResponse> + Send + Sync>;

struct Route {
    pattern: String,
    responses: VecDeque<MockResponse>,
}

/// Mock implementation of the PageFetcher trait.
///
/// Responses are chosen by URL substring: the longest matching route wins.
/// A route serves its responses in order and keeps repeating the last one.
/// An optional handler sees every request first. Unrouted requests get a 404.
///
/// # Example
///
/// ```rust,ignore
/// let fetcher = MockFetcher::new();
/// fetcher.route("torrents.php", "<html>...</html>").await;
/// fetcher
///     .route_sequence("api.php", vec![MockResponse::Status(503), MockResponse::Body(json)])
///     .await;
///
/// let client = EhClient::new(Arc::new(fetcher), "e-hentai.org", "https://api.e-hentai.org/api.php");
/// ```
pub struct MockFetcher {
    routes: Arc<RwLock<Vec<Route>>>,
    handler: Arc<RwLock<Option<Handler>>>,
    requests: Arc<RwLock<Vec<RecordedRequest>>>,
}

impl std::fmt::Debug for MockFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFetcher")
            .field("routes", &"<routes>")
            .field("handler", &"<handler>")
            .field("requests", &"<requests>")
            .finish()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(RwLock::new(Vec::new())),
            handler: Arc::new(RwLock::new(None)),
            requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Answer every URL containing `pattern` with `body`.
    pub async fn route(&self, pattern: &str, body: impl Into<String>) {
        self.route_sequence(pattern, vec![MockResponse::Body(body.into())])
            .await;
    }

    /// Answer URLs containing `pattern` with `responses`, in order.
    pub async fn route_sequence(&self, pattern: &str, responses: Vec<MockResponse>) {
        let mut routes = self.routes.write().await;
        routes.retain(|route| route.pattern != pattern);
        routes.push(Route {
            pattern: pattern.to_string(),
            responses: responses.into(),
        });
    }

    /// Install a handler consulted before the routes.
    pub async fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&RecordedRequest) -> Option<MockResponse> + Send + Sync + 'static,
    {
        *self.handler.write().await = Some(Box::new(handler));
    }

    /// All requests so far, oldest first.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.read().await.clone()
    }

    /// Number of requests whose URL contains `pattern`.
    pub async fn request_count(&self, pattern: &str) -> usize {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.url.contains(pattern))
            .count()
    }

    async fn respond(&self, request: RecordedRequest) -> Result<String, FetchError> {
        self.requests.write().await.push(request.clone());

        if let Some(handler) = self.handler.read().await.as_ref() {
            if let Some(response) = handler(&request) {
                return response.into_result();
            }
        }

        let mut routes = self.routes.write().await;
        let route = routes
            .iter_mut()
            .filter(|route| request.url.contains(&route.pattern))
            .max_by_key(|route| route.pattern.len());

        let response = match route {
            Some(route) if route.responses.len() > 1 => route.responses.pop_front(),
            Some(route) => route.responses.front().cloned(),
            None => None,
        };
        response.unwrap_or(MockResponse::Status(404)).into_result()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        self.respond(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            body: None,
        })
        .await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<String, FetchError> {
        self.respond(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            body: Some(body.clone()),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_longest_route_wins_and_sequence_sticks() {
        let fetcher = MockFetcher::new();
        fetcher.route("e-hentai.org", "front").await;
        fetcher
            .route_sequence(
                "torrents.php",
                vec![MockResponse::Status(503), MockResponse::Body("list".into())],
            )
            .await;

        assert_eq!(fetcher.get("https://e-hentai.org/").await.unwrap(), "front");
        let url = "https://e-hentai.org/torrents.php";
        assert!(matches!(
            fetcher.get(url).await,
            Err(FetchError::Status { status: 503, .. })
        ));
        assert_eq!(fetcher.get(url).await.unwrap(), "list");
        assert_eq!(fetcher.get(url).await.unwrap(), "list");
        assert_eq!(fetcher.request_count("torrents.php").await, 3);
    }

    #[tokio::test]
    async fn test_unrouted_is_404_and_handler_goes_first() {
        let fetcher = MockFetcher::new();
        assert!(matches!(
            fetcher.get("https://nowhere/").await,
            Err(FetchError::Status { status: 404, .. })
        ));

        fetcher.route("api", "routed").await;
        fetcher
            .set_handler(|request| {
                (request.method == "POST").then(|| MockResponse::Banned("temporarily banned".into()))
            })
            .await;
        assert!(matches!(
            fetcher.post_json("https://api/", &serde_json::json!({})).await,
            Err(FetchError::Banned(_))
        ));
        assert_eq!(fetcher.get("https://api/").await.unwrap(), "routed");
    }
}

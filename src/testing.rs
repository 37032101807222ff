//! Test doubles for exercising the cache without real network traffic.

use async_trait::async_trait;
use bytes::Bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

use crate::error::{BoxError, TransportError, TransportErrorKind};
use crate::transport::{FetchRequest, ResponseHead, Transport, TransportResponse};

#[derive(Debug, Clone)]
enum MockReply {
    Response(TransportResponse),
    Network(TransportError),
    Unknown(String),
}

#[derive(Debug, Default)]
struct MockState {
    replies: HashMap<String, MockReply>,
    calls: HashMap<String, usize>,
    requests: Vec<FetchRequest>,
    delay: Duration,
}

/// Transport that answers from canned per-URL replies and counts calls.
///
/// URLs without a reply fail with a `BadServerResponse` transport error.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: RwLock<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn setup_mock(&self, url: &str, body: impl Into<Bytes>, status_code: u16) {
        self.setup_mock_with_headers(url, body, status_code, Vec::new())
            .await;
    }

    pub async fn setup_mock_with_headers(
        &self,
        url: &str,
        body: impl Into<Bytes>,
        status_code: u16,
        headers: Vec<(String, String)>,
    ) {
        let reply = MockReply::Response(TransportResponse {
            body: body.into(),
            head: ResponseHead::Http {
                status_code,
                headers,
            },
        });
        self.set_reply(url, reply).await;
    }

    /// Replies with a body that has no HTTP status.
    pub async fn setup_unclassified(&self, url: &str, body: impl Into<Bytes>) {
        let reply = MockReply::Response(TransportResponse {
            body: body.into(),
            head: ResponseHead::Unclassified,
        });
        self.set_reply(url, reply).await;
    }

    pub async fn setup_error(&self, url: &str, error: TransportError) {
        self.set_reply(url, MockReply::Network(error)).await;
    }

    /// Fails with an error type the cache does not recognise.
    pub async fn setup_unknown_error(&self, url: &str, message: &str) {
        self.set_reply(url, MockReply::Unknown(message.to_string()))
            .await;
    }

    pub async fn set_delay(&self, delay: Duration) {
        self.state.write().await.delay = delay;
    }

    pub async fn clear_mocks(&self) {
        let mut state = self.state.write().await;
        state.replies.clear();
        state.delay = Duration::ZERO;
    }

    pub async fn call_count(&self) -> usize {
        self.state.read().await.calls.values().sum()
    }

    pub async fn calls_for(&self, url: &str) -> usize {
        self.state
            .read()
            .await
            .calls
            .get(&normalize(url))
            .copied()
            .unwrap_or(0)
    }

    pub async fn requests(&self) -> Vec<FetchRequest> {
        self.state.read().await.requests.clone()
    }

    async fn set_reply(&self, url: &str, reply: MockReply) {
        self.state
            .write()
            .await
            .replies
            .insert(normalize(url), reply);
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<TransportResponse, BoxError> {
        let (reply, delay) = {
            let mut state = self.state.write().await;
            *state.calls.entry(request.url.to_string()).or_insert(0) += 1;
            state.requests.push(request.clone());
            (state.replies.get(request.url.as_str()).cloned(), state.delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Network(error)) => Err(error.into()),
            Some(MockReply::Unknown(message)) => {
                Err(std::io::Error::new(std::io::ErrorKind::Other, message).into())
            }
            None => Err(TransportError::new(
                TransportErrorKind::BadServerResponse,
                format!("no mock for {}", request.url),
            )
            .into()),
        }
    }
}

/// Serves `handler` on an ephemeral localhost port until the runtime shuts down.
pub async fn spawn_http_server(handler: fn(Request<Body>) -> Response<Body>) -> SocketAddr {
    let make_svc = make_service_fn(move |_conn| async move {
        Ok::<_, Infallible>(service_fn(move |req| async move {
            Ok::<_, Infallible>(handler(req))
        }))
    });

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

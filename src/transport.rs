use async_trait::async_trait;
use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, CACHE_CONTROL, LOCATION};
use hyper::{Body, Client, Method, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{BoxError, TransportError, TransportErrorKind};
use crate::policy::CachePolicy;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub policy: CachePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseHead {
    Http {
        status_code: u16,
        headers: Vec<(String, String)>,
    },
    /// The response carries no HTTP status line.
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub body: Bytes,
    pub head: ResponseHead,
}

/// Performs the network fetch behind the cache.
///
/// Implementations report recognised network failures as [`TransportError`];
/// any other error type is surfaced to callers as an unknown failure.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<TransportResponse, BoxError>;
}

/// HTTP(S) transport over a hyper client.
#[derive(Debug, Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    timeout: Duration,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: Client::builder().build(HttpsConnector::new()),
            timeout,
        }
    }

    /// Follows redirects up to [`MAX_REDIRECTS`] hops and returns the final response.
    async fn send(&self, request: &FetchRequest) -> Result<TransportResponse, TransportError> {
        let mut current = request.url.clone();
        let mut hops = 0;

        let resp = loop {
            let resp = self.send_once(&current, &request.policy).await?;
            let Some(next) = redirect_target(&current, &resp)? else {
                break resp;
            };

            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(TransportError::new(
                    TransportErrorKind::BadServerResponse,
                    format!("too many redirects from {}", request.url),
                ));
            }
            if !matches!(next.scheme(), "http" | "https") {
                return Err(TransportError::new(
                    TransportErrorKind::UnsupportedUrl,
                    format!("redirect to unsupported scheme: {}", next.scheme()),
                ));
            }
            debug!("Following {} redirect from {} to {}", resp.status(), current, next);
            current = next;
        };

        let status_code = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let body = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| TransportError::new(TransportErrorKind::ConnectionLost, e.to_string()))?;

        debug!(
            "Received {} bytes with status {} from {}",
            body.len(),
            status_code,
            current
        );
        Ok(TransportResponse {
            body,
            head: ResponseHead::Http {
                status_code,
                headers,
            },
        })
    }

    async fn send_once(
        &self,
        url: &Url,
        policy: &CachePolicy,
    ) -> Result<Response<Body>, TransportError> {
        let mut builder = Request::builder().method(Method::GET).uri(url.as_str());
        if *policy == CachePolicy::ReloadIgnoringLocalAndRemoteCacheData {
            builder = builder.header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
        let req = builder
            .body(Body::empty())
            .map_err(|e| TransportError::new(TransportErrorKind::BadUrl, e.to_string()))?;

        self.client.request(req).await.map_err(classify_hyper_error)
    }
}

/// Where a redirect response points, resolved against `current`. `None` if `resp` is final.
fn redirect_target(current: &Url, resp: &Response<Body>) -> Result<Option<Url>, TransportError> {
    match resp.status() {
        StatusCode::MOVED_PERMANENTLY
        | StatusCode::FOUND
        | StatusCode::SEE_OTHER
        | StatusCode::TEMPORARY_REDIRECT
        | StatusCode::PERMANENT_REDIRECT => {}
        _ => return Ok(None),
    }
    let Some(location) = resp.headers().get(LOCATION) else {
        return Ok(None);
    };

    let location = location.to_str().map_err(|e| {
        TransportError::new(TransportErrorKind::BadServerResponse, e.to_string())
    })?;
    current.join(location).map(Some).map_err(|e| {
        TransportError::new(
            TransportErrorKind::BadServerResponse,
            format!("invalid redirect location {:?}: {}", location, e),
        )
    })
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<TransportResponse, BoxError> {
        match request.url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(TransportError::new(
                    TransportErrorKind::UnsupportedUrl,
                    format!("unsupported scheme: {}", scheme),
                )
                .into())
            }
        }

        match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(TransportError::new(
                TransportErrorKind::TimedOut,
                format!("no response from {} within {:?}", request.url, self.timeout),
            )
            .into()),
        }
    }
}

fn classify_hyper_error(error: hyper::Error) -> TransportError {
    let kind = if error.is_connect() {
        TransportErrorKind::CannotConnect
    } else if error.is_timeout() {
        TransportErrorKind::TimedOut
    } else if error.is_canceled() {
        TransportErrorKind::Cancelled
    } else if error.is_parse() {
        TransportErrorKind::BadServerResponse
    } else {
        TransportErrorKind::ConnectionLost
    };
    TransportError::new(kind, error.to_string())
}

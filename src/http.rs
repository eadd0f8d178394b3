use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{ACCEPT_ENCODING, HeaderValue, USER_AGENT};
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to build HTTP request: {0}")]
    BuildRequest(#[from] http::Error),
    #[error("failed to make HTTP request: {0}")]
    CallRequest(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read response body: {0}")]
    ReadIncoming(#[from] hyper::Error),
}

/// A plain HTTP client for backends reachable without TLS, which is all the
/// query endpoints this tool talks to.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    user_agent: HeaderValue,
}

impl HttpClient {
    pub fn new() -> HttpClient {
        let client = Client::builder(TokioExecutor::new()).build_http();
        let user_agent =
            HeaderValue::from_static(concat!("promsd/", env!("CARGO_PKG_VERSION")));

        HttpClient { client, user_agent }
    }

    pub fn send(
        &self,
        mut req: Request<Full<Bytes>>,
    ) -> BoxFuture<'static, Result<Response<Incoming>, HttpError>> {
        default_request_headers(&mut req, &self.user_agent);

        let resp = self.client.request(req);

        Box::pin(async move {
            let resp = resp.await?;

            debug!(
                message = "HTTP response received",
                status = %resp.status(),
                version = ?resp.version(),
            );

            Ok(resp)
        })
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn default_request_headers(request: &mut Request<Full<Bytes>>, user_agent: &HeaderValue) {
    if !request.headers().contains_key(USER_AGENT) {
        request.headers_mut().insert(USER_AGENT, user_agent.clone());
    }

    if !request.headers().contains_key(ACCEPT_ENCODING) {
        // compressed responses are not supported
        request
            .headers_mut()
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
}

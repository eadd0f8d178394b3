use std::convert::Infallible;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// The registry backing the `/metrics` endpoint, plus the counters every
/// discovery instance reports into.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Refresh cycles that emitted a batch, by (address, role).
    pub refresh_cycles: IntCounterVec,
    /// Refresh cycles aborted by a query failure, by (address, role).
    pub refresh_errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> crate::Result<Metrics> {
        let registry = Registry::new();

        let refresh_cycles = IntCounterVec::new(
            Opts::new(
                "promsd_refresh_cycles_total",
                "Refresh cycles that emitted a batch.",
            ),
            &["address", "role"],
        )?;
        let refresh_errors = IntCounterVec::new(
            Opts::new(
                "promsd_refresh_errors_total",
                "Refresh cycles aborted by a query failure.",
            ),
            &["address", "role"],
        )?;

        registry.register(Box::new(refresh_cycles.clone()))?;
        registry.register(Box::new(refresh_errors.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Metrics {
            registry,
            refresh_cycles,
            refresh_errors,
        })
    }
}

/// Serve the text exposition on `/metrics` until the shutdown token trips.
pub async fn serve(listener: TcpListener, metrics: Metrics, shutdown: CancellationToken) {
    loop {
        let (conn, peer) = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok(conn) => conn,
                Err(err) => {
                    error!(message = "accept new connection failed", %err);
                    continue;
                }
            }
        };

        let metrics = metrics.clone();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(handle(&req, &metrics)) }
            });

            let conn = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(conn), service);
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(err) = result {
                            debug!(message = "failed to serve http connection", %peer, %err);
                        }

                        break;
                    }
                    _ = shutdown.cancelled(), if !draining => {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        });
    }

    debug!("metrics endpoint finished");
}

fn handle(req: &Request<Incoming>, metrics: &Metrics) -> Response<Full<Bytes>> {
    if req.uri().path() != "/metrics" {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new("Not Found".into()))
            .unwrap();
    }

    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(err) = encoder.encode(&metrics.registry.gather(), &mut buf) {
        error!(message = "encode metrics failed", ?err);

        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::default())
            .unwrap();
    }

    Response::builder()
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Full::new(Bytes::from(buf)))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use http::Method;
    use http_body_util::BodyExt;

    use super::*;
    use crate::http::HttpClient;

    #[test]
    fn counters_are_registered() {
        let metrics = Metrics::new().unwrap();
        metrics
            .refresh_cycles
            .with_label_values(&["prom-1:9090", "jmx_exporter"])
            .inc();

        let families = metrics.registry.gather();
        assert!(
            families
                .iter()
                .any(|family| family.get_name() == "promsd_refresh_cycles_total")
        );
        assert!(
            families
                .iter()
                .any(|family| family.get_name() == "promsd_refresh_errors_total")
        );
    }

    #[tokio::test]
    async fn serve_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics
            .refresh_cycles
            .with_label_values(&["prom-1:9090", "jmx_exporter"])
            .inc();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(listener, metrics, shutdown.clone()));

        let client = HttpClient::new();
        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("http://{addr}/metrics"))
            .body(Full::default())
            .unwrap();
        let resp = client.send(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("promsd_refresh_cycles_total"));

        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("http://{addr}/"))
            .body(Full::default())
            .unwrap();
        let resp = client.send(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        shutdown.cancel();
        task.await.unwrap();
    }
}

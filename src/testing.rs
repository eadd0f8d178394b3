use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

/// Serve canned responses on a loopback port, one per request in script
/// order; the last response repeats once the script is exhausted.
pub async fn mock_backend(responses: Vec<(StatusCode, String)>) -> SocketAddr {
    assert!(!responses.is_empty());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let responses = Arc::new(responses);
    let served = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        loop {
            let (conn, _peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_err) => break,
            };

            let responses = Arc::clone(&responses);
            let served = Arc::clone(&served);

            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<Incoming>| {
                    let responses = Arc::clone(&responses);
                    let served = Arc::clone(&served);

                    async move {
                        let index = served
                            .fetch_add(1, Ordering::SeqCst)
                            .min(responses.len() - 1);
                        let (status, body) = &responses[index];

                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(*status)
                                .body(Full::new(Bytes::from(body.clone())))
                                .unwrap(),
                        )
                    }
                });

                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(conn), service)
                    .await;
            });
        }
    });

    addr
}

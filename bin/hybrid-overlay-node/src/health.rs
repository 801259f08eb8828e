//! Health and metrics endpoint

use http_body_util::Full;
use hyper::{body::Bytes, server::conn::http1, service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use overlay_flows::FlowMetrics;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Readiness source for `/healthz`
pub type ReadyFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Serve `/healthz` and `/metrics` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    ready: ReadyFn,
    metrics: FlowMetrics,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Health server listening on {}", addr);
    }

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Error accepting health connection: {}", e);
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let ready = ready.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = route(req.method(), req.uri().path(), ready(), &metrics);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving health connection from {}: {}", peer_addr, e);
            }
        });
    }
    info!("Health server stopped");
}

fn route(method: &Method, path: &str, ready: bool, metrics: &FlowMetrics) -> Response<Full<Bytes>> {
    debug!("{} {}", method, path);

    match (method, path) {
        (&Method::GET, "/healthz") if ready => text(StatusCode::OK, "OK\n".to_string()),
        (&Method::GET, "/healthz") => text(StatusCode::SERVICE_UNAVAILABLE, "not ready\n".to_string()),
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(body) => {
                let mut response = text(StatusCode::OK, body);
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "failed to gather metrics\n".to_string())
            }
        },
        _ => text(StatusCode::NOT_FOUND, "not found\n".to_string()),
    }
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

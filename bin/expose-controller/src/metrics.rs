//! Prometheus metrics and health endpoints

use anyhow::Result;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{body::Bytes, server::conn::http1, service::service_fn, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Reconciliation counters
pub struct Metrics {
    /// Strategy operations by operation and outcome
    pub reconcile_total: IntCounterVec,
    /// Completed sync epochs
    pub syncs_total: IntCounter,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("expose_reconcile_total", "Strategy operations by outcome"),
            &["op", "result"],
        )?;
        let syncs_total = IntCounter::new("expose_syncs_total", "Sync epochs started")?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(syncs_total.clone()))?;

        Ok(Self {
            reconcile_total,
            syncs_total,
            registry,
        })
    }

    /// Count one strategy operation
    pub fn record(&self, op: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.reconcile_total.with_label_values(&[op, result]).inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Serve `/metrics`, `/healthz` and `/readyz` until the listener fails
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>, ready: Arc<AtomicBool>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        let ready = ready.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                let ready = ready.clone();
                async move { Ok::<_, hyper::Error>(handle(req, &metrics, &ready)) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Connection from {} closed: {}", peer_addr, e);
            }
        });
    }
}

fn handle<B>(req: Request<B>, metrics: &Metrics, ready: &AtomicBool) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/metrics" => match metrics.gather() {
            Ok(body) => {
                let mut response = text(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                warn!("Failed to encode metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        },
        "/healthz" => text(StatusCode::OK, "ok".to_string()),
        "/readyz" if ready.load(Ordering::Relaxed) => text(StatusCode::OK, "ready".to_string()),
        "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "not synced".to_string()),
        _ => text(StatusCode::NOT_FOUND, "not found".to_string()),
    }
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[test]
    fn test_record_and_gather() {
        let metrics = Metrics::new().unwrap();
        metrics.record("add", true);
        metrics.record("add", false);
        metrics.syncs_total.inc();

        let body = metrics.gather().unwrap();
        assert!(body.contains(r#"expose_reconcile_total{op="add",result="ok"} 1"#));
        assert!(body.contains(r#"expose_reconcile_total{op="add",result="error"} 1"#));
        assert!(body.contains("expose_syncs_total 1"));
    }

    #[test]
    fn test_routes() {
        let metrics = Metrics::new().unwrap();
        let ready = AtomicBool::new(false);

        assert_eq!(handle(get("/healthz"), &metrics, &ready).status(), StatusCode::OK);
        assert_eq!(
            handle(get("/readyz"), &metrics, &ready).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        ready.store(true, Ordering::Relaxed);
        assert_eq!(handle(get("/readyz"), &metrics, &ready).status(), StatusCode::OK);

        let response = handle(get("/metrics"), &metrics, &ready);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
        assert_eq!(handle(get("/nope"), &metrics, &ready).status(), StatusCode::NOT_FOUND);
    }
}

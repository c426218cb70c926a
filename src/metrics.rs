//! Prometheus metrics for monitoring slurp.
//!
//! All metrics use the default Prometheus registry and follow naming conventions:
//! - Histograms: *_seconds (for latency)
//! - Counters: *_total (for counts)

use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

lazy_static! {
    // ==================== TAILING ====================
    pub static ref RECORDS_READ_TOTAL: IntCounter = register_int_counter!(
        "slurp_records_read_total",
        "Records decoded from tailed log files"
    )
    .unwrap();
    pub static ref DECODE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "slurp_decode_errors_total",
        "Log lines skipped because they could not be decoded",
        &["kind"]
    )
    .unwrap();
    pub static ref OFFSET_COMMITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "slurp_offset_commits_total",
        "Offset commits by persistence result",
        &["status"]
    )
    .unwrap();
    pub static ref ACTIVE_TAILERS: IntGauge = register_int_gauge!(
        "slurp_active_tailers",
        "Tailing tasks currently running"
    )
    .unwrap();
    pub static ref SCANS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "slurp_directory_scans_total",
        "Directory reconcile passes by result",
        &["status"]
    )
    .unwrap();

    // ==================== DELIVERY ====================
    pub static ref FLUSHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "slurp_flushes_total",
        "Batch writes to the sink by result",
        &["status"]
    )
    .unwrap();
    pub static ref FLUSH_DURATION: Histogram = register_histogram!(
        "slurp_flush_duration_seconds",
        "Time spent writing one batch to the sink",
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();
    pub static ref POINTS_WRITTEN_TOTAL: IntCounter = register_int_counter!(
        "slurp_points_written_total",
        "Points accepted by the sink"
    )
    .unwrap();
    pub static ref POINTS_DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "slurp_points_dropped_total",
        "Readings that never reached the sink",
        &["reason"]
    )
    .unwrap();
    pub static ref PENDING_POINTS: IntGauge = register_int_gauge!(
        "slurp_pending_points",
        "Points buffered in the current batch"
    )
    .unwrap();
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind metrics server to {addr}"))?;
    info!(%addr, "prometheus metrics server listening");
    Ok(listener)
}

/// Serve the default registry at `GET /metrics` until `cancel` fires.
pub async fn serve(listener: TcpListener, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("metrics server shutting down");
                break;
            }
            accept_result = listener.accept() => {
                let (stream, _) = match accept_result {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "failed to accept metrics connection");
                        continue;
                    }
                };

                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                        Ok::<_, hyper::Error>(respond(req.uri().path()))
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(error = %err, "error serving metrics connection");
                    }
                });
            }
        }
    }
}

fn respond(path: &str) -> Response<Full<Bytes>> {
    if path != "/metrics" {
        return plain(StatusCode::NOT_FOUND, "Not Found".into());
    }

    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return plain(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(value) = hyper::header::HeaderValue::from_str(encoder.format_type()) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

fn plain(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

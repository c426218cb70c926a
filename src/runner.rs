//! Wiring of the slurp service: sink, dumper, filer and metrics endpoint.

use crate::config::{Config, InfluxConfig};
use crate::devices::Decoder;
use crate::dumper::{Dumper, DumperConfig, RetryPolicy};
use crate::filer::{Filer, FilerConfig};
use crate::metadata::MetadataStore;
use crate::metrics;
use crate::point::Precision;
use crate::sink::{InfluxSink, MetricSink};
use crate::tailer::TailOptions;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub fn build_sink(config: &InfluxConfig) -> Result<Arc<dyn MetricSink>> {
    let base_url = config.base_url();
    let sink = InfluxSink::new(&base_url, &config.username, &config.password)
        .context("failed to build influxdb client")?;
    info!(url = %base_url, database = %config.database, "configured influxdb sink");
    Ok(Arc::new(sink))
}

pub fn dumper_config(config: &InfluxConfig) -> DumperConfig {
    DumperConfig {
        database: config.database.clone(),
        precision: Precision::Seconds,
        flush_point_count: config.flush_point_count.max(1),
        flush_after: Duration::from_secs(config.flush_time_trigger_secs),
        flush_tick: Duration::from_secs(config.flush_tick_secs.max(1)),
        retry: RetryPolicy {
            initial_wait: Duration::from_secs(config.retry_initial_wait_secs),
            step: Duration::from_secs(config.retry_step_secs),
            step_every: config.retry_step_every.max(1),
            max_wait: Duration::from_secs(config.retry_max_wait_secs),
        },
    }
}

pub fn filer_config(config: &Config) -> Result<FilerConfig> {
    let (dir, file_name) = config.watch_target()?;
    Ok(FilerConfig {
        dir,
        file_name,
        scan_interval: config.scan_interval(),
        watch_events: config.watch_events,
        tail: TailOptions {
            tail_interval: config.tail_interval(),
            read_chunk_bytes: config.read_chunk_bytes.max(1),
            max_line_bytes: config.max_line_bytes.max(1),
        },
        tailer_shutdown_wait: config.tailer_shutdown_wait(),
        shutdown_wait: config.filer_shutdown_wait(),
    })
}

/// Run until SIGINT or SIGTERM, then stop the filer before the dumper so
/// every reading already read gets a chance to reach the sink.
pub async fn run(config: Config) -> Result<()> {
    run_until(config, wait_for_shutdown()).await
}

/// Like [`run`], but stops when `shutdown` resolves. Everything that can
/// fail is set up before the filer starts, so no offset is ever committed
/// for a reading the dumper will not get to flush.
pub async fn run_until<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = &'static str>,
{
    info!("slurp starting");

    let metrics_listener = match config.metrics_addr()? {
        Some(addr) => Some(metrics::bind(addr).await?),
        None => None,
    };
    let filer_config = filer_config(&config)?;

    let sink = build_sink(&config.influxdb)?;
    let (reading_tx, reading_rx) = mpsc::channel(config.channel_capacity.max(1));
    let dumper = Dumper::start(
        sink,
        dumper_config(&config.influxdb),
        config.meta.clone(),
        reading_rx,
        CancellationToken::new(),
    )
    .await
    .context("influxdb is not reachable")?;

    let store = match MetadataStore::open(config.metadata_dir_path()).await {
        Ok(store) => store,
        Err(err) => {
            dumper.stop(config.influxdb.shutdown_wait()).await;
            return Err(err).context("failed to open metadata directory");
        }
    };
    let decoder = Arc::new(Decoder::with_builtin_devices());
    let filer = Filer::new(filer_config, store, decoder, reading_tx);

    if let Err(err) = filer.start().await {
        filer.stop().await;
        dumper.stop(config.influxdb.shutdown_wait()).await;
        return Err(err).context("failed to start filer");
    }

    let metrics_cancel = CancellationToken::new();
    let metrics_task = metrics_listener
        .map(|listener| tokio::spawn(metrics::serve(listener, metrics_cancel.clone())));

    info!("slurp started; awaiting shutdown signal");
    let reason = shutdown.await;
    info!(reason, "initiating shutdown");

    filer.stop().await;
    let stats = dumper.stop(config.influxdb.shutdown_wait()).await;
    info!(
        received = stats.received,
        written = stats.points_written,
        dropped = stats.dropped,
        lost = stats.points_lost,
        "dumper stopped"
    );

    metrics_cancel.cancel();
    if let Some(task) = metrics_task {
        if let Err(err) = task.await {
            warn!(error = %err, "metrics server task failed");
        }
    }

    info!("slurp stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGTERM; only ctrl-c stops slurp");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        reason = wait_for_ctrl_c() => reason,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed while waiting for shutdown signal");
        // Without a signal handler there is no way to stop cleanly later.
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    const LINE: &str = r#"{"time" : "2018-03-04 17:02:15", "model" : "Acurite Rain Gauge", "id" : 1, "rain" : 0.5}"#;

    /// Answers every request with 204 and keeps the bodies sent to `/write`.
    async fn fake_influx() -> (u16, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let writes = Arc::new(Mutex::new(Vec::new()));
        let writes_server = writes.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let writes = writes_server.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let writes = writes.clone();
                        async move {
                            let is_write = req.uri().path() == "/write";
                            let body = req.into_body().collect().await?.to_bytes();
                            if is_write {
                                writes
                                    .lock()
                                    .unwrap()
                                    .push(String::from_utf8_lossy(&body).into_owned());
                            }
                            let mut response = Response::new(Full::new(Bytes::new()));
                            *response.status_mut() = StatusCode::NO_CONTENT;
                            Ok::<_, hyper::Error>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        (port, writes)
    }

    fn service_config(root: &Path, influx_port: u16) -> Config {
        let logs = root.join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        let mut file = std::fs::File::create(logs.join("rtl_433.log")).unwrap();
        writeln!(file, "{LINE}").unwrap();

        let mut config = Config {
            data_location: logs.join("rtl_433.log").display().to_string(),
            metadata_dir: root.join("meta").display().to_string(),
            tail_interval_secs: 1,
            watch_events: false,
            ..Config::default()
        };
        config.influxdb.fqdn = "127.0.0.1".to_string();
        config.influxdb.port = influx_port;
        config.influxdb.flush_point_count = 1;
        config.influxdb.shutdown_wait_secs = 5;
        config
    }

    #[tokio::test]
    async fn taken_metrics_port_fails_before_any_offset_is_committed() {
        let root = TempDir::new().unwrap();
        let (influx_port, writes) = fake_influx().await;
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = service_config(root.path(), influx_port);
        config.metrics_addr = taken.local_addr().unwrap().to_string();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run_until(config, std::future::pending()),
        )
        .await
        .expect("run_until must fail instead of waiting for shutdown");

        assert!(result.is_err());
        assert!(!root.path().join("meta").exists());
        assert!(writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_metrics_addr_fails_before_any_offset_is_committed() {
        let root = TempDir::new().unwrap();
        let (influx_port, _writes) = fake_influx().await;
        let mut config = service_config(root.path(), influx_port);
        config.metrics_addr = "9090".to_string();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run_until(config, std::future::pending()),
        )
        .await
        .unwrap();

        assert!(format!("{:#}", result.unwrap_err()).contains("metrics_addr"));
        assert!(!root.path().join("meta").exists());
    }

    #[tokio::test]
    async fn shutdown_flushes_readings_and_keeps_their_offsets() {
        let root = TempDir::new().unwrap();
        let (influx_port, writes) = fake_influx().await;
        let mut config = service_config(root.path(), influx_port);
        config.metrics_addr = "127.0.0.1:0".to_string();

        let seen = writes.clone();
        let shutdown = async move {
            while seen.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            "test"
        };
        tokio::time::timeout(Duration::from_secs(10), run_until(config, shutdown))
            .await
            .unwrap()
            .unwrap();

        let bodies = writes.lock().unwrap().join("\n");
        assert!(bodies.contains("AcuRiteRainGauge"));

        let store = MetadataStore::open(root.path().join("meta")).await.unwrap();
        let known = store.load_all().await.unwrap();
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].offset, LINE.len() as u64 + 1);
    }

    #[test]
    fn dumper_config_follows_influx_section() {
        let influx = InfluxConfig {
            database: "weather".to_string(),
            flush_point_count: 50,
            flush_time_trigger_secs: 7,
            retry_step_every: 0,
            ..InfluxConfig::default()
        };
        let config = dumper_config(&influx);
        assert_eq!(config.database, "weather");
        assert_eq!(config.flush_point_count, 50);
        assert_eq!(config.flush_after, Duration::from_secs(7));
        assert_eq!(config.retry.step_every, 1);
        assert_eq!(config.precision, Precision::Seconds);
    }

    #[test]
    fn filer_config_splits_data_location() {
        let config = Config {
            data_location: "/var/log/rtl/rtl_433.log".to_string(),
            tail_interval_secs: 2,
            ..Config::default()
        };
        let filer = filer_config(&config).unwrap();
        assert_eq!(filer.dir, PathBuf::from("/var/log/rtl"));
        assert_eq!(filer.file_name, "rtl_433.log");
        assert_eq!(filer.tail.tail_interval, Duration::from_secs(2));
    }

    #[test]
    fn filer_config_rejects_directory_location() {
        let config = Config {
            data_location: "/var/log/rtl/".to_string(),
            ..Config::default()
        };
        assert!(filer_config(&config).is_err());
    }
}

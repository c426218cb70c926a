use crate::splitter::DEFAULT_MAX_LINE_BYTES;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process configuration, loaded from TOML and overridden from the command line.
///
/// Every key is optional; a missing file section falls back to the defaults
/// below.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Path of the log file rtl_433 writes. Its directory is watched and its
    /// name is the base for rotation matching.
    pub data_location: String,
    pub metadata_dir: String,
    /// Empty logs to stdout.
    pub log_file: String,
    pub log_level: String,
    pub tail_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub read_chunk_bytes: usize,
    /// Lines longer than this are skipped.
    pub max_line_bytes: usize,
    pub watch_events: bool,
    pub tailer_shutdown_wait_secs: u64,
    pub filer_shutdown_wait_secs: u64,
    pub channel_capacity: usize,
    /// Address of the Prometheus endpoint. Empty disables it.
    pub metrics_addr: String,
    pub influxdb: InfluxConfig,
    /// Tag enrichment, keyed by device model then by set name.
    pub meta: BTreeMap<String, BTreeMap<String, MetadataFieldSet>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InfluxConfig {
    pub fqdn: String,
    pub port: u16,
    pub https: bool,
    pub username: String,
    pub password: String,
    pub database: String,
    pub flush_point_count: usize,
    pub flush_time_trigger_secs: u64,
    pub flush_tick_secs: u64,
    pub retry_initial_wait_secs: u64,
    pub retry_step_secs: u64,
    pub retry_step_every: u32,
    pub retry_max_wait_secs: u64,
    pub shutdown_wait_secs: u64,
}

/// Tags injected into a point when every `comp_equal_tags` entry matches.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct MetadataFieldSet {
    pub comp_equal_tags: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl MetadataFieldSet {
    /// A predicate on a tag the point does not carry is ignored.
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        self.comp_equal_tags
            .iter()
            .all(|(key, expected)| tags.get(key).map_or(true, |actual| actual == expected))
    }
}

const DEFAULT_DATA_LOCATION: &str = "rtl_433.log";
const DEFAULT_METADATA_DIR: &str = "./meta/";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_TAIL_INTERVAL_SECS: u64 = 5;
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;
const DEFAULT_READ_CHUNK_BYTES: usize = 4096;
const DEFAULT_TAILER_SHUTDOWN_WAIT_SECS: u64 = 5;
const DEFAULT_FILER_SHUTDOWN_WAIT_SECS: u64 = 20;
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

const DEFAULT_INFLUX_FQDN: &str = "localhost";
const DEFAULT_INFLUX_PORT: u16 = 8086;
const DEFAULT_INFLUX_DATABASE: &str = "slurp-rtl_433";
const DEFAULT_FLUSH_POINT_COUNT: usize = 200;
const DEFAULT_FLUSH_TIME_TRIGGER_SECS: u64 = 10;
const DEFAULT_FLUSH_TICK_SECS: u64 = 10;
const DEFAULT_RETRY_INITIAL_WAIT_SECS: u64 = 1;
const DEFAULT_RETRY_STEP_SECS: u64 = 1;
const DEFAULT_RETRY_STEP_EVERY: u32 = 10;
const DEFAULT_RETRY_MAX_WAIT_SECS: u64 = 30;
const DEFAULT_DUMPER_SHUTDOWN_WAIT_SECS: u64 = 10;

impl Default for Config {
    fn default() -> Self {
        Self {
            data_location: DEFAULT_DATA_LOCATION.to_string(),
            metadata_dir: DEFAULT_METADATA_DIR.to_string(),
            log_file: String::new(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            tail_interval_secs: DEFAULT_TAIL_INTERVAL_SECS,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            watch_events: true,
            tailer_shutdown_wait_secs: DEFAULT_TAILER_SHUTDOWN_WAIT_SECS,
            filer_shutdown_wait_secs: DEFAULT_FILER_SHUTDOWN_WAIT_SECS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            metrics_addr: String::new(),
            influxdb: InfluxConfig::default(),
            meta: BTreeMap::new(),
        }
    }
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            fqdn: DEFAULT_INFLUX_FQDN.to_string(),
            port: DEFAULT_INFLUX_PORT,
            https: false,
            username: String::new(),
            password: String::new(),
            database: DEFAULT_INFLUX_DATABASE.to_string(),
            flush_point_count: DEFAULT_FLUSH_POINT_COUNT,
            flush_time_trigger_secs: DEFAULT_FLUSH_TIME_TRIGGER_SECS,
            flush_tick_secs: DEFAULT_FLUSH_TICK_SECS,
            retry_initial_wait_secs: DEFAULT_RETRY_INITIAL_WAIT_SECS,
            retry_step_secs: DEFAULT_RETRY_STEP_SECS,
            retry_step_every: DEFAULT_RETRY_STEP_EVERY,
            retry_max_wait_secs: DEFAULT_RETRY_MAX_WAIT_SECS,
            shutdown_wait_secs: DEFAULT_DUMPER_SHUTDOWN_WAIT_SECS,
        }
    }
}

/// Values given on the command line. `None` keeps the file value.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub data_location: Option<String>,
    pub metadata_dir: Option<String>,
    pub fqdn: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&raw)
            .with_context(|| format!("failed to decode config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(value) = overrides.data_location {
            self.data_location = value;
        }
        if let Some(value) = overrides.metadata_dir {
            self.metadata_dir = value;
        }
        if let Some(value) = overrides.fqdn {
            self.influxdb.fqdn = value;
        }
        if let Some(value) = overrides.port {
            self.influxdb.port = value;
        }
        if let Some(value) = overrides.username {
            self.influxdb.username = value;
        }
        if let Some(value) = overrides.password {
            self.influxdb.password = value;
        }
        if let Some(value) = overrides.database {
            self.influxdb.database = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.watch_target()?;
        if self.influxdb.flush_point_count == 0 {
            anyhow::bail!("influxdb.flush_point_count must be at least 1");
        }
        if self.read_chunk_bytes == 0 {
            anyhow::bail!("read_chunk_bytes must be at least 1");
        }
        if self.max_line_bytes == 0 {
            anyhow::bail!("max_line_bytes must be at least 1");
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be at least 1");
        }
        if self.influxdb.retry_step_every == 0 {
            anyhow::bail!("influxdb.retry_step_every must be at least 1");
        }
        if self.influxdb.database.trim().is_empty() {
            anyhow::bail!("influxdb.database cannot be empty");
        }
        self.metrics_addr()?;
        Ok(())
    }

    /// Directory to watch and the base file name to match in it.
    pub fn watch_target(&self) -> Result<(PathBuf, String)> {
        let expanded = expand_path(&self.data_location);
        split_log_path(&expanded).with_context(|| {
            format!(
                "data_location {:?} does not name a file",
                self.data_location
            )
        })
    }

    pub fn metadata_dir_path(&self) -> PathBuf {
        expand_path(&self.metadata_dir)
    }

    pub fn log_file_path(&self) -> Option<PathBuf> {
        if self.log_file.trim().is_empty() {
            None
        } else {
            Some(expand_path(&self.log_file))
        }
    }

    /// `None` when the metrics endpoint is disabled.
    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>> {
        let raw = self.metrics_addr.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse()
            .map(Some)
            .with_context(|| format!("metrics_addr {raw:?} is not a socket address"))
    }

    pub fn tail_interval(&self) -> Duration {
        Duration::from_secs(self.tail_interval_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn tailer_shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.tailer_shutdown_wait_secs)
    }

    pub fn filer_shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.filer_shutdown_wait_secs)
    }
}

impl InfluxConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.fqdn, self.port)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.shutdown_wait_secs)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Split a log path into its directory and file name. A bare name lives in
/// the current directory. Returns `None` when the path names no file.
pub fn split_log_path(path: &Path) -> Option<(PathBuf, String)> {
    if path.as_os_str().to_string_lossy().ends_with('/') {
        return None;
    }
    let name = path.file_name()?.to_str()?.to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.data_location, "rtl_433.log");
        assert_eq!(config.metadata_dir, "./meta/");
        assert_eq!(config.tail_interval(), Duration::from_secs(5));
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert_eq!(config.filer_shutdown_wait(), Duration::from_secs(20));
        assert_eq!(config.influxdb.base_url(), "http://localhost:8086");
        assert_eq!(config.influxdb.database, "slurp-rtl_433");
        assert_eq!(config.influxdb.flush_point_count, 200);
        assert!(config.log_file_path().is_none());
        assert!(config.metrics_addr().unwrap().is_none());
    }

    #[test]
    fn parses_sections_and_field_sets() {
        let raw = r#"
            data_location = "/var/log/rtl_433/rtl_433.log"
            metrics_addr = "127.0.0.1:9090"

            [influxdb]
            fqdn = "influx.lan"
            https = true
            port = 8443
            flush_point_count = 50

            [meta."Acurite tower sensor".garage]
            comp_equal_tags = { channel = "A" }
            tags = { room = "garage" }
        "#;
        let config = Config::from_toml(raw).unwrap();

        assert_eq!(config.influxdb.base_url(), "https://influx.lan:8443");
        assert_eq!(config.influxdb.flush_point_count, 50);
        assert_eq!(config.influxdb.flush_time_trigger_secs, 10);
        assert_eq!(
            config.metrics_addr().unwrap(),
            Some("127.0.0.1:9090".parse().unwrap())
        );

        let (dir, name) = config.watch_target().unwrap();
        assert_eq!(dir, PathBuf::from("/var/log/rtl_433"));
        assert_eq!(name, "rtl_433.log");

        let garage = &config.meta["Acurite tower sensor"]["garage"];
        assert_eq!(garage.comp_equal_tags["channel"], "A");
        assert_eq!(garage.tags["room"], "garage");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(Config::from_toml("data_location = \"/var/log/\"").is_err());
        assert!(Config::from_toml("[influxdb]\nflush_point_count = 0").is_err());
        assert!(Config::from_toml("read_chunk_bytes = 0").is_err());
        assert!(Config::from_toml("tail_interval_secs = \"soon\"").is_err());
        assert!(Config::from_toml("max_line_bytes = 0").is_err());
    }

    #[test]
    fn rejects_unparseable_metrics_addr() {
        let err = Config::from_toml("metrics_addr = \"9090\"").unwrap_err();
        assert!(format!("{err:#}").contains("metrics_addr"));
        assert!(Config::from_toml("metrics_addr = \"localhost:9090\"").is_err());
        assert!(Config::from_toml("metrics_addr = \"[::1]:9090\"").is_ok());
    }

    #[test]
    fn overrides_replace_only_given_values() {
        let mut config = Config::default();
        config.apply_overrides(Overrides {
            fqdn: Some("db.example".to_string()),
            port: Some(9999),
            data_location: Some("/tmp/logs/rtl_433.log".to_string()),
            ..Overrides::default()
        });

        assert_eq!(config.influxdb.base_url(), "http://db.example:9999");
        assert_eq!(config.influxdb.database, "slurp-rtl_433");
        assert_eq!(config.data_location, "/tmp/logs/rtl_433.log");
    }

    #[test]
    fn split_log_path_handles_bare_names() {
        assert_eq!(
            split_log_path(Path::new("rtl_433.log")),
            Some((PathBuf::from("."), "rtl_433.log".to_string()))
        );
        assert_eq!(
            split_log_path(Path::new("logs/rtl_433.log")),
            Some((PathBuf::from("logs"), "rtl_433.log".to_string()))
        );
        assert_eq!(split_log_path(Path::new("logs/")), None);
        assert_eq!(split_log_path(Path::new("")), None);
    }

    #[test]
    fn field_set_predicates() {
        let set = MetadataFieldSet {
            comp_equal_tags: BTreeMap::from([("channel".to_string(), "A".to_string())]),
            tags: BTreeMap::new(),
        };
        let a = BTreeMap::from([("channel".to_string(), "A".to_string())]);
        let b = BTreeMap::from([("channel".to_string(), "B".to_string())]);
        let none = BTreeMap::new();

        assert!(set.matches(&a));
        assert!(!set.matches(&b));
        assert!(set.matches(&none));
    }

    #[test]
    fn example_config_parses() {
        let config = Config::from_toml(include_str!("../slurp.example.toml")).unwrap();
        assert_eq!(
            config.metrics_addr().unwrap(),
            Some("127.0.0.1:9090".parse().unwrap())
        );
        assert_eq!(
            config.watch_target().unwrap(),
            (PathBuf::from("/var/log/rtl_433"), "rtl_433.log".to_string())
        );
        let sets = &config.meta["Acurite tower sensor"];
        assert_eq!(sets.len(), 2);
        assert_eq!(sets["attic"].tags["room"], "attic");
    }
}

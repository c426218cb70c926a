//! Tails rotating rtl_433 JSON log files and ships the decoded sensor
//! readings to InfluxDB.

pub mod config;
pub mod devices;
pub mod dumper;
pub mod file_id;
pub mod filer;
pub mod metadata;
pub mod metrics;
pub mod point;
pub mod runner;
pub mod sink;
pub mod splitter;
pub mod tailer;
pub mod watcher;

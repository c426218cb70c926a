//! slurp - tails rtl_433 JSON logs and ships sensor readings to InfluxDB.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use rtl433_slurp::config::{Config, Overrides};
use rtl433_slurp::runner;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Ship rtl_433 JSON logs to InfluxDB")]
struct Args {
    #[arg(short, long, env = "SLURP_CONFIG", help = "TOML configuration file")]
    config: Option<String>,
    #[arg(short = 'd', long, help = "rtl_433 log file to follow, rotations included")]
    data_location: Option<String>,
    #[arg(short = 'm', long, help = "Directory holding per-file offsets")]
    meta_data_location: Option<String>,
    #[arg(short = 'f', long, help = "InfluxDB host name")]
    fqdn: Option<String>,
    #[arg(short = 'P', long, help = "InfluxDB port")]
    port: Option<u16>,
    #[arg(short = 'u', long)]
    username: Option<String>,
    #[arg(short = 'p', long)]
    password: Option<String>,
    #[arg(short = 'b', long, help = "InfluxDB database")]
    database: Option<String>,
    #[arg(short, long, action = ArgAction::Count, help = "More logging; repeat for trace")]
    verbose: u8,
    #[arg(short = 'D', long, help = "Debug logging")]
    debug: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            data_location: self.data_location.clone(),
            metadata_dir: self.meta_data_location.clone(),
            fqdn: self.fqdn.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        }
    }

    fn log_directive(&self, config: &Config) -> String {
        if self.debug {
            "debug".to_string()
        } else if self.verbose > 1 {
            "trace".to_string()
        } else if self.verbose == 1 {
            "debug".to_string()
        } else {
            config.log_level.clone()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("failed to load config from {path}"))?
        }
        None => Config::default(),
    };
    config.apply_overrides(args.overrides());
    config.validate().context("invalid configuration")?;

    init_tracing(&args.log_directive(&config), &config)?;

    runner::run(config).await
}

fn init_tracing(directive: &str, config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_file_path() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
    Ok(())
}

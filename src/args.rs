use std::{fs::File, io, sync::Mutex, time::Duration};

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use nowplaying::config::{MonitorConfig, SourcePattern};
use tracing_subscriber::EnvFilter;

/// What to print on every notification
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// One Waybar custom module JSON object per line
    Waybar,
    /// The full media snapshot as JSON
    Json,
}

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Force a full media session refresh every X seconds
    #[clap(long, short, default_value_t = 30.0)]
    pub refresh_every: f64,
    /// File to write the log to. If not specified, logs will be written to stderr.
    #[clap(long, short)]
    log_file: Option<String>,
    /// Player kept tracked while another player is current (case-insensitive substring)
    #[clap(long, default_value = "spotify")]
    pub fallback_source: String,
    /// Number of artworks to keep in memory
    #[clap(long, default_value_t = 20)]
    pub thumbnail_cache_size: usize,
    /// Number of recent media changes to keep
    #[clap(long, default_value_t = 5)]
    pub change_log_size: usize,
    #[clap(long, short, value_enum, default_value_t = OutputFormat::Waybar)]
    pub output: OutputFormat,
}

impl Args {
    /// Build the tracing subscriber using parameters from the command line arguments
    ///
    /// # Errors
    ///
    /// Fails if the log file cannot be created.
    pub fn init_tracing_subscriber(&self) -> Result<()> {
        let builder = tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env());

        match self.log_file.as_ref() {
            None => builder.with_writer(io::stderr).init(),
            Some(f) => {
                let file = File::create(f).with_context(|| format!("Failed to create {f}"))?;
                builder.with_writer(Mutex::new(file)).init();
            }
        }
        Ok(())
    }

    /// Monitor tunables from the command line
    ///
    /// # Errors
    ///
    /// Fails if the refresh interval is not a positive number of seconds.
    pub fn monitor_config(&self) -> Result<MonitorConfig> {
        let refresh_interval = Duration::try_from_secs_f64(self.refresh_every)
            .ok()
            .filter(|d| !d.is_zero())
            .with_context(|| format!("Invalid refresh interval {}", self.refresh_every))?;
        Ok(MonitorConfig {
            refresh_interval,
            thumbnail_cache_capacity: self.thumbnail_cache_size,
            change_log_capacity: self.change_log_size,
            fallback_source: SourcePattern::new(&self.fallback_source),
            ..MonitorConfig::default()
        })
    }
}

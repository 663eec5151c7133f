use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use tokentrack_core::config::{TrackerSettings, DEFAULT_DROP_THRESHOLD, DEFAULT_SWEEP_INTERVAL};

use super::duration::{parse_duration, parse_timeout};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Token usage tracker daemon for Claude Code transcripts")]
pub struct Config {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Session inactivity timeout (e.g. 5m, 1h, or 'never')
    #[arg(long)]
    pub timeout: Option<String>,

    /// Daemon idle shutdown timeout (e.g. 10m, 1h, or 'never')
    #[arg(long)]
    pub idle_timeout: Option<String>,

    /// How long to report a cache rebuild after an invalidation (e.g. 30s, 60s)
    #[arg(long)]
    pub cache_rebuild_alert: Option<String>,

    /// Cache-read drop in tokens that counts as an invalidation
    #[arg(long)]
    pub cache_drop_threshold: Option<u64>,

    /// Log level
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// PID file path (default: ~/.claude/token-tracker.pid)
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Subcommand (runs the daemon when omitted)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print a per-message token and cache report for one transcript
    Analyze {
        /// Transcript (.jsonl) to analyze
        path: PathBuf,
    },
}

impl Config {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
    /// No log output at all
    Silent,
}

/// Daemon settings (from config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-file inactivity timeout, or "never"
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Global idle shutdown timeout, or "never"
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    /// Rebuild alert window after a detected cache invalidation
    #[serde(default = "default_cache_rebuild_alert")]
    pub cache_rebuild_alert: String,

    /// Cache-read drop in tokens that counts as an invalidation
    #[serde(default = "default_cache_drop_threshold")]
    pub cache_drop_threshold: u64,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// PID file path
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

fn default_port() -> u16 {
    7777
}

fn default_timeout() -> String {
    "5m".to_string()
}

fn default_idle_timeout() -> String {
    "10m".to_string()
}

fn default_cache_rebuild_alert() -> String {
    "60s".to_string()
}

fn default_cache_drop_threshold() -> u64 {
    DEFAULT_DROP_THRESHOLD
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            timeout: default_timeout(),
            idle_timeout: default_idle_timeout(),
            cache_rebuild_alert: default_cache_rebuild_alert(),
            cache_drop_threshold: default_cache_drop_threshold(),
            log_level: LogLevel::default(),
            pid_file: None,
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // Try custom path first
        if let Some(p) = path {
            if p.exists() {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {:?}", p))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", p));
            }
        }

        // Try default config locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("tokentrack/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/tokentrack/config.toml")),
            dirs::home_dir().map(|p| p.join(".tokentrack.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", path));
            }
        }

        // Return defaults if no config file found
        Ok(Self::default())
    }

    /// Merge CLI config into settings (CLI takes precedence)
    pub fn merge_cli(&mut self, cli: &Config) {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(timeout) = &cli.timeout {
            self.timeout = timeout.clone();
        }
        if let Some(idle_timeout) = &cli.idle_timeout {
            self.idle_timeout = idle_timeout.clone();
        }
        if let Some(alert) = &cli.cache_rebuild_alert {
            self.cache_rebuild_alert = alert.clone();
        }
        if let Some(threshold) = cli.cache_drop_threshold {
            self.cache_drop_threshold = threshold;
        }
        if let Some(log_level) = cli.log_level {
            self.log_level = log_level;
        }
        if let Some(pid_file) = &cli.pid_file {
            self.pid_file = Some(pid_file.clone());
        }
    }

    /// Convert into tracker settings, validating every duration
    pub fn tracker_settings(&self) -> Result<TrackerSettings> {
        Ok(TrackerSettings {
            session_timeout: parse_timeout(&self.timeout).context("Invalid timeout format")?,
            idle_timeout: parse_timeout(&self.idle_timeout)
                .context("Invalid idle-timeout format")?,
            rebuild_alert: parse_duration(&self.cache_rebuild_alert)
                .context("Invalid cache-rebuild-alert format")?,
            drop_threshold: self.cache_drop_threshold,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        })
    }

    /// PID file location, defaulting to `~/.claude/token-tracker.pid`
    pub fn pid_file_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.pid_file {
            return Ok(path.clone());
        }
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Ok(home.join(".claude").join("token-tracker.pid"))
    }
}

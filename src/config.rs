use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Reading hub sync core: WebDAV progress server and storage poller.
#[derive(Parser, Debug, Clone)]
#[command(name = "biblio")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BIBLIO_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the WebDAV server and the storage poller (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Directory served over WebDAV.
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Walk the storage roots once and print what was found.
    Scan {
        /// Print every file, not only books and progress files.
        #[arg(long)]
        all: bool,
    },

    /// List books in the catalog with their progress.
    Books,

    /// Create a default config file.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// WebDAV server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage walk configuration.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Progress sync configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// WebDAV server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to. Loopback only by default.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Directory exposed over WebDAV.
    #[serde(default = "default_served_root")]
    pub root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            root: default_served_root(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 8080)
}

fn default_served_root() -> PathBuf {
    PathBuf::from("data/sync")
}

/// Storage walk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Device storage root. `Android/` and `data/` below it are never walked.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Roots walked on every tick, in order. Defaults to the storage root
    /// followed by the served directory.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Sleep after a successful walk, in seconds.
    #[serde(default = "default_long_interval")]
    pub long_interval_seconds: u64,

    /// Sleep after a failed walk, in seconds.
    #[serde(default = "default_short_interval")]
    pub short_interval_seconds: u64,

    /// Also report directories in walk results.
    #[serde(default)]
    pub include_dirs: bool,

    /// Accepted book extensions.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Number of parallel workers for metadata extraction (1 = sequential).
    #[serde(default = "default_scan_workers")]
    pub workers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            roots: Vec::new(),
            long_interval_seconds: default_long_interval(),
            short_interval_seconds: default_short_interval(),
            include_dirs: false,
            extensions: default_extensions(),
            workers: default_scan_workers(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_long_interval() -> u64 {
    30
}

fn default_short_interval() -> u64 {
    1
}

fn default_extensions() -> Vec<String> {
    vec!["epub".to_string()]
}

fn default_scan_workers() -> usize {
    1
}

impl ScanConfig {
    /// Poll intervals derived from this configuration, never below one second.
    pub fn interval(&self) -> crate::scanner::PollInterval {
        crate::scanner::PollInterval {
            long: Duration::from_secs(self.long_interval_seconds.max(1)),
            short: Duration::from_secs(self.short_interval_seconds.max(1)),
        }
    }

    /// Roots to walk, falling back to the storage root and `served`.
    pub fn effective_roots(&self, served: &std::path::Path) -> Vec<PathBuf> {
        if self.roots.is_empty() {
            vec![self.storage_root.clone(), served.to_path_buf()]
        } else {
            self.roots.clone()
        }
    }
}

/// Progress sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Reading app whose progress files are reconciled.
    #[serde(default)]
    pub app: crate::progress::SyncApp,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/biblio.db")
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("biblio.toml"),
            dirs::config_dir()
                .map(|p| p.join("biblio").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/biblio/config.toml"),
        ];

        candidates
            .into_iter()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# biblio configuration

[server]
# Loopback only: the WebDAV surface has no authentication.
bind = "127.0.0.1:8080"
root = "data/sync"

[scan]
# storage_root = "/sdcard"
# Walked in order on every tick (default: storage_root, then server.root)
# roots = ["/sdcard", "/sdcard/Android/data/biblio/files"]
long_interval_seconds = 30
short_interval_seconds = 1
include_dirs = false
extensions = ["epub"]
workers = 1

[sync]
# Reading app whose progress files are reconciled: "moon_reader" or "none"
app = "moon_reader"

[database]
# path = "/var/lib/biblio/biblio.db"
"#
        .to_string()
    }
}

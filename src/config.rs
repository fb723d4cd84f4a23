//! Configuration for the scheduler client.
//!
//! Holds the clap structs for command line arguments, the optional YAML
//! config file, and the [`ClientConfig`] that both of them resolve into.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::error::{Result, RpcError};
use crate::secret::DEFAULT_SECRET_ENV;
use crate::serde::string_or_mapping;
use crate::transport::{Timeouts, TransportKind};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 12345;

/// File name of the per-user config file, relative to the home directory.
pub const CONFIG_FILE_NAME: &str = ".rsched.yaml";

/// Where the remote scheduler listens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Accepts `host`, `host:port` and `[v6addr]:port`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty endpoint".to_string());
        }
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') || host.starts_with('[') => {
                let port = port
                    .parse()
                    .map_err(|_| format!("invalid port '{}' in endpoint '{}'", port, s))?;
                (host.trim_start_matches('[').trim_end_matches(']'), port)
            }
            _ => (s, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(format!("missing host in endpoint '{}'", s));
        }
        Ok(Self::new(host, port))
    }
}

/// Everything a client needs to reach a scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub transport: TransportKind,
    pub timeouts: Timeouts,
    /// Environment variable holding the shared secret.
    pub secret_env: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            transport: TransportKind::default(),
            timeouts: Timeouts::default(),
            secret_env: DEFAULT_SECRET_ENV.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Endpoint::new(host, port),
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_secret_env(mut self, secret_env: impl Into<String>) -> Self {
        self.secret_env = secret_env.into();
        self
    }
}

/// Contents of the YAML config file. Every key is optional.
///
/// ```yaml
/// endpoint: scheduler.internal:12345   # or {host: ..., port: ...}
/// transport: managed                   # or direct
/// connect_timeout_secs: 10
/// call_timeout_secs: 30
/// secret_env: RSCHED_SECRET
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    #[serde(deserialize_with = "string_or_mapping")]
    pub endpoint: Endpoint,
    pub transport: TransportKind,
    pub connect_timeout_secs: u64,
    pub call_timeout_secs: u64,
    pub secret_env: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        let defaults = Timeouts::default();
        Self {
            endpoint: Endpoint::default(),
            transport: TransportKind::default(),
            connect_timeout_secs: defaults.connect.as_secs(),
            call_timeout_secs: defaults.call.as_secs(),
            secret_env: DEFAULT_SECRET_ENV.to_string(),
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| RpcError::Config(format!("failed to open {}: {}", path.display(), e)))?;
        serde_yaml::from_reader(file)
            .map_err(|e| RpcError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// `$HOME/.rsched.yaml`, if a home directory exists.
    pub fn user_default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }
}

impl From<FileConfig> for ClientConfig {
    fn from(file: FileConfig) -> Self {
        Self {
            endpoint: file.endpoint,
            transport: file.transport,
            timeouts: Timeouts {
                connect: Duration::from_secs(file.connect_timeout_secs),
                call: Duration::from_secs(file.call_timeout_secs),
            },
            secret_env: file.secret_env,
        }
    }
}

#[derive(Parser)]
#[command(version, author, about = "Control a remote job scheduler")]
pub struct Config {
    /// Scheduler host. Overrides the config file.
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Scheduler port. Overrides the config file.
    #[arg(long, short, global = true)]
    pub port: Option<u16>,

    /// Transport binding to use. Overrides the config file.
    #[arg(long, short, value_enum, global = true)]
    pub transport: Option<TransportKind>,

    /// Config file to use. Defaults to `~/.rsched.yaml` if it exists.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log every remote call
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Show scheduler-wide status
    State,
    /// List all jobs
    List,
    /// Show one job. Use `-` for the last job added.
    Get { job: String },
    /// Schedule a pipeline to run every `interval`
    Add { pipeline: String, interval: String },
    /// Change the interval of a job
    Reschedule { job: String, interval: String },
    /// Resume a job
    Start { job: String },
    /// Pause a job
    Stop { job: String },
    /// Remove a job
    Remove { job: String },
}

impl Config {
    /// Resolves the config file (if any) and applies command line overrides.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => match FileConfig::user_default_path().filter(|path| path.exists()) {
                Some(path) => FileConfig::load(&path)?,
                None => FileConfig::default(),
            },
        };
        let mut config = ClientConfig::from(file);
        if let Some(host) = &self.host {
            config.endpoint.host = host.clone();
        }
        if let Some(port) = self.port {
            config.endpoint.port = port;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        Ok(config)
    }
}

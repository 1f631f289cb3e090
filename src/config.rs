//! Server and client configuration, loaded from a TOML file with CLI
//! overrides, following the teacher's `Turn`/`Controller` split: one
//! `#[serde(default = "...")]` function per field, plus a matching
//! `impl Default`.

use std::collections::HashMap;
use std::fs::read_to_string;
use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct ServerConfig {
    /// address the RTSP TCP listener binds.
    #[serde(default = "ServerConfig::listen")]
    pub listen: SocketAddr,

    /// realm advertised in Digest/Basic challenges.
    #[serde(default = "ServerConfig::realm")]
    pub realm: String,

    /// static username/password table consulted by both auth schemes.
    #[serde(default)]
    pub credentials: HashMap<String, String>,

    /// seconds a session survives without a keep-alive request.
    #[serde(default = "ServerConfig::session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// successful Digest validations a server nonce tolerates before
    /// rotating.
    #[serde(default = "ServerConfig::nonce_max_reuse")]
    pub nonce_max_reuse: u32,

    /// fraction of `session_bandwidth_bps` this participant's RTCP
    /// traffic may consume (RFC 3550 section 6.2).
    #[serde(default = "ServerConfig::rtcp_bandwidth_fraction")]
    pub rtcp_bandwidth_fraction: f64,

    #[serde(default)]
    pub log: Log,
}

impl ServerConfig {
    fn listen() -> SocketAddr {
        "0.0.0.0:554".parse().unwrap()
    }

    fn realm() -> String {
        "localhost".to_string()
    }

    fn session_timeout_secs() -> u64 {
        60
    }

    fn nonce_max_reuse() -> u32 {
        100
    }

    fn rtcp_bandwidth_fraction() -> f64 {
        0.05
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            realm: Self::realm(),
            credentials: HashMap::new(),
            session_timeout_secs: Self::session_timeout_secs(),
            nonce_max_reuse: Self::nonce_max_reuse(),
            rtcp_bandwidth_fraction: Self::rtcp_bandwidth_fraction(),
            log: Log::default(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct ServerCli {
    /// path to a TOML configuration file.
    #[arg(long)]
    config: Option<String>,
}

impl ServerConfig {
    /// Load from the `--config` file named on the command line, falling
    /// back to defaults for anything the file omits or when no file was
    /// given.
    pub fn load() -> anyhow::Result<Self> {
        let cfg_str = ServerCli::parse()
            .config
            .and_then(|path| read_to_string(path).ok())
            .unwrap_or_default();
        Ok(toml::from_str(&cfg_str)?)
    }
}

/// Client-side connection parameters; no file format, just constructor
/// defaults, since the client is embedded rather than run standalone.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub watchdog_timeout: Duration,
    pub max_auth_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            watchdog_timeout: Duration::from_secs(10),
            max_auth_retries: 1,
        }
    }
}

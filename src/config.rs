use std::env;
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};

/// Server settings, read once at startup from `TENTSHIFT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Config {
    pub fn load() -> io::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `load` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let config = Self {
            port: try_load(&lookup, "TENTSHIFT_PORT", "5433")?,
            bind: try_load(&lookup, "TENTSHIFT_BIND", "0.0.0.0")?,
            data_dir: try_load(&lookup, "TENTSHIFT_DATA_DIR", "./data")?,
            password: try_load(&lookup, "TENTSHIFT_PASSWORD", "tentshift")?,
            max_connections: try_load(&lookup, "TENTSHIFT_MAX_CONNECTIONS", "256")?,
            compact_threshold: try_load(&lookup, "TENTSHIFT_COMPACT_THRESHOLD", "1000")?,
            metrics_port: try_load_optional(&lookup, "TENTSHIFT_METRICS_PORT")?,
            tls_cert: lookup("TENTSHIFT_TLS_CERT"),
            tls_key: lookup("TENTSHIFT_TLS_KEY"),
        };
        if config.max_connections == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "TENTSHIFT_MAX_CONNECTIONS must be at least 1",
            ));
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> io::Result<T>
where
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {key}: {e}"))
    })
}

fn try_load<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> io::Result<T>
where
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    parse(key, &raw)
}

fn try_load_optional<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> io::Result<Option<T>>
where
    T::Err: Display,
{
    lookup(key).map(|raw| parse(key, &raw)).transpose()
}

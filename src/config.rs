use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `KENNELBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between automatic compactions. Zero disables them.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "kennelbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            port: parse_or(&get, "KENNELBOOK_PORT", defaults.port)?,
            bind: get("KENNELBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: get("KENNELBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: get("KENNELBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(&get, "KENNELBOOK_MAX_CONNECTIONS", defaults.max_connections)?,
            compact_threshold: parse_or(&get, "KENNELBOOK_COMPACT_THRESHOLD", defaults.compact_threshold)?,
            metrics_port: get("KENNELBOOK_METRICS_PORT")
                .map(|v| parse_value("KENNELBOOK_METRICS_PORT", &v))
                .transpose()?,
            tls_cert: get("KENNELBOOK_TLS_CERT").map(PathBuf::from),
            tls_key: get("KENNELBOOK_TLS_KEY").map(PathBuf::from),
        };

        if config.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "KENNELBOOK_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(ConfigError::TlsIncomplete);
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("kennels.wal")
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
    TlsIncomplete,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::TlsIncomplete => {
                write!(f, "both KENNELBOOK_TLS_CERT and KENNELBOOK_TLS_KEY must be set, or neither")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

use std::path::PathBuf;

const SNAPSHOT_FILE: &str = "reservations.snapshot";

/// Server settings, read from `SPLITROOM_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse().ok());
        Self {
            bind: lookup("SPLITROOM_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("SPLITROOM_PORT").unwrap_or(5433),
            data_dir: lookup("SPLITROOM_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            password: lookup("SPLITROOM_PASSWORD").unwrap_or_else(|| "coop".into()),
            max_connections: lookup("SPLITROOM_MAX_CONNECTIONS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(64),
            metrics_port: parsed("SPLITROOM_METRICS_PORT"),
            tls_cert: lookup("SPLITROOM_TLS_CERT"),
            tls_key: lookup("SPLITROOM_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }
}

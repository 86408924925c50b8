use std::path::PathBuf;
use std::str::FromStr;

const PREFIX: &str = "SLOTKEEPER_";

/// Server settings, read from `SLOTKEEPER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub admins: Vec<String>,
    pub resources_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{PREFIX}{name}")).filter(|v| !v.trim().is_empty());
        fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|s| s.trim().parse().ok())
        }

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".into()));
        let resources_file = get("RESOURCES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("resources.json"));
        let admins = get("ADMINS")
            .unwrap_or_else(|| "admin".into())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Self {
            port: parsed(get("PORT")).unwrap_or(5480),
            bind: get("BIND").unwrap_or_else(|| "0.0.0.0".into()),
            password: get("PASSWORD").unwrap_or_else(|| "slotkeeper".into()),
            max_connections: parsed(get("MAX_CONNECTIONS")).filter(|n| *n > 0).unwrap_or(256),
            compact_threshold: parsed(get("COMPACT_THRESHOLD")).unwrap_or(1000),
            metrics_port: parsed(get("METRICS_PORT")),
            admins,
            resources_file,
            data_dir,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotkeeper.wal")
    }
}

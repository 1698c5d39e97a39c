use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `SHAREIT_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "shareit".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_or(&lookup, "SHAREIT_PORT", defaults.port),
            bind: lookup("SHAREIT_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("SHAREIT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("SHAREIT_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(
                &lookup,
                "SHAREIT_MAX_CONNECTIONS",
                defaults.max_connections,
            ),
            compact_threshold: parse_or(
                &lookup,
                "SHAREIT_COMPACT_THRESHOLD",
                defaults.compact_threshold,
            ),
            metrics_port: lookup("SHAREIT_METRICS_PORT").and_then(|v| v.trim().parse().ok()),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("shareit.wal")
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = from_pairs(&[]);
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:5433");
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/shareit.wal"));
        assert_eq!(cfg.metrics_port, None);
    }

    #[test]
    fn overrides_from_environment() {
        let cfg = from_pairs(&[
            ("SHAREIT_PORT", "6000"),
            ("SHAREIT_BIND", "127.0.0.1"),
            ("SHAREIT_DATA_DIR", "/var/lib/shareit"),
            ("SHAREIT_PASSWORD", "s3cret"),
            ("SHAREIT_MAX_CONNECTIONS", "8"),
            ("SHAREIT_COMPACT_THRESHOLD", "50"),
            ("SHAREIT_METRICS_PORT", "9100"),
        ]);
        assert_eq!(cfg.listen_addr(), "127.0.0.1:6000");
        assert_eq!(cfg.wal_path(), PathBuf::from("/var/lib/shareit/shareit.wal"));
        assert_eq!(cfg.password, "s3cret");
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let cfg = from_pairs(&[
            ("SHAREIT_PORT", "not-a-port"),
            ("SHAREIT_MAX_CONNECTIONS", "-3"),
            ("SHAREIT_METRICS_PORT", "99999"),
        ]);
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.metrics_port, None);
    }
}

use std::path::PathBuf;

/// Engine configuration, read from `INNKEEP_*` environment variables by the
/// embedding process. Everything has a working default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one WAL file per property.
    pub data_dir: PathBuf,
    /// WAL appends before the janitor rewrites the log.
    pub compact_threshold: u64,
    /// Prometheus exporter port. None disables the exporter.
    pub metrics_port: Option<u16>,
    /// Optional JSON catalog seed applied to a freshly created property.
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            metrics_port: None,
            seed_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("INNKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: std::env::var("INNKEEP_COMPACT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            metrics_port: std::env::var("INNKEEP_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            seed_file: std::env::var("INNKEEP_SEED_FILE").ok().map(PathBuf::from),
        }
    }
}

//! Configuration surface (§4.8, ambient addition). A `clap`-derived CLI
//! with environment-variable fallback, the way flags are bound throughout
//! the example pack's service binaries.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "binlog-avro-conv", about = "Converts a MySQL/MariaDB binlog into per-table Avro files")]
pub struct ConverterConfig {
    /// Directory containing the sequence of `<prefix>.NNNNNN` binlog files.
    #[arg(long, env = "BINLOG_DIR")]
    pub binlog_dir: PathBuf,

    /// The `<prefix>` of binlog file names.
    #[arg(long, env = "BINLOG_PREFIX", default_value = "bin-log")]
    pub binlog_prefix: String,

    /// Root directory for `db.table.NNNNNN.avro` files and `db.table.avsc` sidecars.
    #[arg(long, env = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Path to the persisted converter state ini file (and its sibling `table-ddl.list`).
    #[arg(long, env = "STATE_PATH")]
    pub state_path: PathBuf,

    /// Row count that forces a checkpoint.
    #[arg(long, env = "ROW_CHECKPOINT_THRESHOLD", default_value_t = 1000)]
    pub row_checkpoint_threshold: u64,

    /// Transaction count that forces a checkpoint.
    #[arg(long, env = "TRX_CHECKPOINT_THRESHOLD", default_value_t = 10)]
    pub trx_checkpoint_threshold: u64,

    /// Default log level, overridden by `RUST_LOG` when set.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ConverterConfig {
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

/// Initializes the global `tracing_subscriber::fmt` subscriber (§4.9),
/// driven by `RUST_LOG` with `config.log_level` as the fallback filter.
pub fn init_logging(config: &ConverterConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.tracing_level().to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

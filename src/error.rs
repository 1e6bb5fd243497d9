use std::path::PathBuf;

/// Error kinds surfaced by the varint/Avro/binlog subsystems.
///
/// Mirrors the flat error-code enumeration of the original avrorouter
/// (`MAXAVRO_ERR_*` / binlog `BINLOG_ERROR`) but as a single typed enum,
/// which is the shape errors take throughout this codebase.
#[derive(thiserror::Error, Debug)]
pub enum ConverterError {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("out of memory while {0}")]
    Memory(String),

    #[error("value overflow: {0}")]
    ValueOverflow(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("truncated read: {0}")]
    Truncated(String),
}

impl ConverterError {
    pub fn io(path: impl Into<Option<PathBuf>>, source: std::io::Error) -> Self {
        ConverterError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for ConverterError {
    fn from(source: std::io::Error) -> Self {
        ConverterError::Io { path: None, source }
    }
}

pub type ConverterResult<T> = Result<T, ConverterError>;

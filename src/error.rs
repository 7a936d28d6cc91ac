//! Unified error type.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout layercake.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by layercake's fallible operations.
///
/// Handlers return `Result<(), Error>`. An `Err` travels back out through
/// every stage of the chain untouched; the server turns it into a
/// `500 Internal Server Error` if nothing has been written yet. Panics are a
/// different thing entirely and are only intercepted by the recovery stages.
#[derive(Debug, Error)]
pub enum Error {
    /// Writing to a response sink or a socket failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The config file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file was read but is not valid TOML for the expected shape.
    #[error("invalid config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The filesystem watcher behind hot reload could not be installed.
    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),

    /// The HTTP client used for remote report delivery could not be built.
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON body could not be decoded or a report could not be encoded.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// An application error raised by a handler.
    #[error("{0}")]
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps any application error so it can be returned from a handler.
    ///
    /// ```rust
    /// use layercake::Error;
    ///
    /// let err = Error::handler("upstream refused the order");
    /// assert_eq!(err.to_string(), "upstream refused the order");
    /// ```
    pub fn handler(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Handler(err.into())
    }
}

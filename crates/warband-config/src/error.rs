//! Errors raised while loading or saving `config.ron`.

use std::path::PathBuf;

/// Failure to read, parse, validate or write the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The directory or file could not be written.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        /// File or directory that was written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid RON for [`crate::Config`].
    #[error("malformed {}: {source}", path.display())]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    /// The in-memory config could not be rendered as RON.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),

    /// The values parse but cannot be used.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field, e.g. `network.address`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

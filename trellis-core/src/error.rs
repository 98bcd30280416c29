//! Error types for the Trellis core library.

use thiserror::Error;

/// Main error type for Trellis core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// What went wrong while loading or validating configuration
        message: String,
    },

    /// Filesystem errors outside the plugin sandbox (state dir, ledger files)
    #[error("I/O error: {message}")]
    Io {
        /// Underlying I/O failure description
        message: String,
    },

    /// Plugin subsystem errors
    #[error(transparent)]
    Plugin(#[from] crate::plugin::PluginError),
}

/// Result type alias for Trellis operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io { message: err.to_string() }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration { message: err.to_string() }
    }
}

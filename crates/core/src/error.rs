//! Error types for the application layer.

use thiserror::Error;

/// Errors raised by the application-facing crates before the renderer
/// takes over.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// A configuration value could not be parsed
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using the application Error type.
pub type Result<T> = std::result::Result<T, Error>;

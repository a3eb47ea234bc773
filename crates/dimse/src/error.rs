//! Errors raised by the DIMSE layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DimseError>;

#[derive(Error, Debug)]
pub enum DimseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid AE Title: {0}")]
    InvalidAeTitle(String),

    /// Keyword has no entry in the standard data dictionary
    #[error("Unknown attribute keyword '{0}'")]
    UnknownKeyword(String),

    /// An element could not be converted between dataset and identifier form
    #[error("Dataset conversion failed: {0}")]
    Codec(String),

    /// Request or response could not be handed over between router halves
    #[error("Router error: {0}")]
    Router(String),

    #[error("DIMSE operation failed: {0}")]
    OperationFailed(String),
}

impl DimseError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn router(msg: impl Into<String>) -> Self {
        Self::Router(msg.into())
    }

    pub fn operation_failed(msg: impl Into<String>) -> Self {
        Self::OperationFailed(msg.into())
    }
}

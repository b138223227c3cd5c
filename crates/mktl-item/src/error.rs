use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate item not allowed: {0}")]
    DuplicateItem(String),

    #[error("this instance is not authoritative for '{0}'")]
    NotAuthoritative(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("validation failed for '{key}': {reason}")]
    Validation { key: String, reason: String },

    #[error("remote error ({kind}): {text}")]
    Remote { kind: String, text: String },

    #[error(transparent)]
    Core(#[from] mktl_core::Error),

    #[error(transparent)]
    Transport(#[from] mktl_net::TransportError),
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("this daemon is not authoritative for '{0}'")]
    UnknownKey(String),

    #[error("duplicate item not allowed: '{0}'")]
    DuplicateItem(String),

    #[error("request for '{target}' does not belong to store '{store}'")]
    WrongStore { target: String, store: String },

    #[error("invalid {0} request, target not set")]
    MissingTarget(&'static str),

    #[error("unhandled request type: {0}")]
    UnhandledType(String),

    #[error(transparent)]
    Config(#[from] mktl_config::Error),

    #[error(transparent)]
    Transport(#[from] mktl_net::TransportError),

    #[error(transparent)]
    Item(#[from] mktl_item::Error),

    #[error(transparent)]
    Persist(#[from] mktl_persist::Error),

    #[error(transparent)]
    Discovery(#[from] mktl_discovery::DiscoveryError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("failed to determine local hostname: {0}")]
    Hostname(std::io::Error),
}

impl Error {
    /// A short exception-style label for the wire `PayloadError.type` field,
    /// loosely mirroring the Python exception class names a remote peer
    /// would have seen from the historical daemon.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownKey(_) => "KeyError",
            Error::DuplicateItem(_) => "RuntimeError",
            Error::WrongStore { .. } => "ValueError",
            Error::MissingTarget(_) => "KeyError",
            Error::UnhandledType(_) => "ValueError",
            Error::Config(_) => "RuntimeError",
            Error::Transport(_) => "RuntimeError",
            Error::Item(_) => "RuntimeError",
            Error::Persist(_) => "RuntimeError",
            Error::Discovery(_) => "RuntimeError",
            Error::Json(_) => "ValueError",
            Error::Hostname(_) => "RuntimeError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

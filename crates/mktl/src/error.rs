use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("the store name must be specified")]
    MissingStore,

    #[error("no configuration available for '{0}' (local or remote)")]
    NoConfiguration(String),

    #[error("store '{0}' has no item '{1}'")]
    UnknownItem(String, String),

    #[error(transparent)]
    Config(#[from] mktl_config::Error),

    #[error(transparent)]
    Transport(#[from] mktl_net::TransportError),

    #[error(transparent)]
    Item(#[from] mktl_item::Error),

    #[error(transparent)]
    Discovery(#[from] mktl_discovery::DiscoveryError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

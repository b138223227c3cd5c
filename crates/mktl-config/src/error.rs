use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no configuration found for store '{0}'")]
    ConfigurationMissing(String),

    #[error("no $MKTL_HOME or $HOME set, cannot locate configuration directory")]
    NoHome,

    #[error("failed reading/writing {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration json at {path}: {source}")]
    Json {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration block for store '{0}' has no UUID key")]
    MissingUuid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed reading/writing {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse persisted value at {path}: {source}")]
    Json {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Config(#[from] mktl_config::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

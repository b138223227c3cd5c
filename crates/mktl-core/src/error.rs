use thiserror::Error;

/// Errors raised while building, validating, or interpreting mKTL wire
/// values. Transport- and daemon-level errors live in their own crates;
/// this enum only covers the data model itself.
#[derive(Debug, Error)]
pub enum Error {
    #[error("value failed validation: {0}")]
    Validation(String),

    #[error("bulk payload shape {shape:?} does not match byte length {len}")]
    BulkShapeMismatch { shape: Vec<usize>, len: usize },

    #[error("payload is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("remote error ({kind}): {text}")]
    Remote { kind: String, text: String },

    #[error("failed to encode/decode JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

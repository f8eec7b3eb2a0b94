use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The payload decoded but is not a key-value tree.
    #[error("malformed payload from {printer_id}: expected an object, found {found}")]
    MalformedPayload {
        printer_id: String,
        found: &'static str,
    },

    #[error("undecodable payload from {printer_id}: {source}")]
    Undecodable {
        printer_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid path expression '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, NormalizeError>;

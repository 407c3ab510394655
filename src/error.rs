use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the file manager core.
///
/// `Network` and `Api` are only produced while online; an offline write never
/// fails over the wire, it queues. `Offline` marks the operations that have no
/// queued fallback and genuinely require connectivity.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("operation requires connectivity")]
    Offline,

    #[error("corrupt node data: {0}")]
    DataCorruption(String),

    #[error("invalid drop target: {0}")]
    InvalidDrop(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("cache lock poisoned")]
    Lock,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

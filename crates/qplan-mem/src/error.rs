use thiserror::Error;

/// Result type local to qplan-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("buffer budget exceeded for '{tag}': requested {requested} bytes, capacity {capacity}, used {used}")]
    BudgetExceeded {
        tag: &'static str,
        requested: usize,
        capacity: usize,
        used: usize,
    },

    #[error("spill storage error: {0}")]
    Storage(String),

    #[error("spill codec error: {0}")]
    Codec(String),

    #[error("spill segment '{0}' failed checksum validation")]
    ChecksumMismatch(String),

    #[error("spill segment '{0}' not found")]
    SegmentMissing(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("namespace {0} does not exist")]
    NamespaceMissing(String),

    #[error("namespace {0} already exists")]
    NamespaceExists(String),

    #[error("invalid options for '{field}': {reason}")]
    InvalidOptions { field: String, reason: String },

    #[error("index '{0}' already exists with a different definition")]
    IndexConflict(String),

    #[error("index '{0}' not found")]
    IndexNotFound(String),

    #[error("bad value: {0}")]
    BadValue(String),

    #[error("guard is {state}, cannot {action}")]
    GuardState { state: &'static str, action: &'static str },
}

impl CatalogError {
    pub fn invalid_options(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CatalogError::InvalidOptions {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

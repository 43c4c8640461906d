use std::fmt;

use serde::Serialize;
use thiserror::Error;

use qplan_catalog::CatalogError;
use qplan_planner::PlanError;

pub type Result<T> = std::result::Result<T, ExecError>;

/// Stable, client-visible error codes. Internal failures share numeric code
/// 1 and are told apart by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    InternalError,
    PlanningInconsistency,
    SpillFailure,
    BadValue,
    NamespaceMissing,
    InvalidOptions,
    ResourceLimitExceeded,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::InternalError
            | ErrorCode::PlanningInconsistency
            | ErrorCode::SpillFailure => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::NamespaceMissing => 26,
            ErrorCode::InvalidOptions => 72,
            ErrorCode::ResourceLimitExceeded => 146,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::PlanningInconsistency => "PlanningInconsistency",
            ErrorCode::SpillFailure => "SpillFailure",
            ErrorCode::BadValue => "BadValue",
            ErrorCode::NamespaceMissing => "NamespaceMissing",
            ErrorCode::InvalidOptions => "InvalidOptions",
            ErrorCode::ResourceLimitExceeded => "ResourceLimitExceeded",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("namespace {0} does not exist")]
    NamespaceMissing(String),

    #[error("invalid options for '{field}': {reason}")]
    InvalidOptions { field: String, reason: String },

    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    #[error("planning inconsistency: {0}")]
    PlanningInconsistency(String),

    #[error("bad value: {0}")]
    BadValue(String),

    #[error("spill: {0}")]
    Spill(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl ExecError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ExecError::NamespaceMissing(_) => ErrorCode::NamespaceMissing,
            ExecError::InvalidOptions { .. } => ErrorCode::InvalidOptions,
            ExecError::ResourceLimitExceeded(_) => ErrorCode::ResourceLimitExceeded,
            ExecError::BadValue(_) => ErrorCode::BadValue,
            ExecError::PlanningInconsistency(_) => ErrorCode::PlanningInconsistency,
            ExecError::Spill(_) => ErrorCode::SpillFailure,
            ExecError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// `{ok: 0, code, codeName, errmsg}` as a command reply would carry it.
    pub fn to_json(&self) -> serde_json::Value {
        let code = self.code();
        let mut reply = serde_json::json!({
            "ok": 0,
            "code": code.code(),
            "codeName": code.name(),
            "errmsg": self.to_string(),
        });
        if let ExecError::InvalidOptions { field, .. } = self {
            reply["field"] = serde_json::Value::String(field.clone());
        }
        reply
    }
}

impl From<CatalogError> for ExecError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NamespaceMissing(ns) => ExecError::NamespaceMissing(ns),
            CatalogError::InvalidOptions { field, reason } => {
                ExecError::InvalidOptions { field, reason }
            }
            CatalogError::GuardState { .. } => ExecError::Internal(e.to_string()),
            other => ExecError::BadValue(other.to_string()),
        }
    }
}

impl From<PlanError> for ExecError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::Dsl(msg) => ExecError::BadValue(msg),
            PlanError::Core(core) => core.into(),
            other => ExecError::PlanningInconsistency(other.to_string()),
        }
    }
}

impl From<qplan_core::error::Error> for ExecError {
    fn from(e: qplan_core::error::Error) -> Self {
        use qplan_core::error::Error;
        match e {
            Error::Config(msg) | Error::BadQuery(msg) => ExecError::BadValue(msg),
            other => ExecError::Internal(other.to_string()),
        }
    }
}

impl From<qplan_mem::Error> for ExecError {
    fn from(e: qplan_mem::Error) -> Self {
        match e {
            qplan_mem::Error::BudgetExceeded { .. } => ExecError::ResourceLimitExceeded(e.to_string()),
            other => ExecError::Spill(other.to_string()),
        }
    }
}

use serde_json::json;

use super::month::MonthRange;

pub const LOCKED_MESSAGE: &str =
    "This period cannot be changed because collected fees exist in its range";

#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("Fee periods cannot overlap for the same class/section (conflicts with {conflicting})")]
    Overlap {
        conflicting: MonthRange,
        period_id: String,
    },

    #[error("{0}")]
    Locked(String),

    #[error("{0}")]
    AmbiguousState(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl FeeError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "bad_params",
            Self::Overlap { .. } => "period_overlap",
            Self::Locked(_) => "period_locked",
            Self::AmbiguousState(_) => "ambiguous_state",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { field, .. } => Some(json!({ "field": field })),
            Self::Overlap {
                conflicting,
                period_id,
            } => Some(json!({
                "conflictingPeriodId": period_id,
                "conflictingFrom": conflicting.from,
                "conflictingTo": conflicting.to,
            })),
            _ => None,
        }
    }
}

pub type FeeResult<T> = Result<T, FeeError>;

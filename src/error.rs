// ⚠️ Engine Errors
// Validation and registry failures raised synchronously at the engine boundary.
//
// "No data yet" is NOT an error: report operations return Option and use None
// for a missing catalog period. Below-threshold matches degrade to "unmatched".

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconError {
    /// Rejected before any aggregation begins
    #[error("invalid input ({field}): {message}")]
    InvalidInput { field: String, message: String },

    #[error("composite item already exists: {0}")]
    DuplicateComposite(String),

    #[error("composite item not found: {0}")]
    CompositeNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ReconError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ReconError::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type ReconResult<T> = Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_message() {
        let err = ReconError::invalid("endDate", "end date 2025-01-01 is before start date 2025-02-01");
        assert_eq!(
            err.to_string(),
            "invalid input (endDate): end date 2025-01-01 is before start date 2025-02-01"
        );
    }
}

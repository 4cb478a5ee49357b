use chrono::{DateTime, Utc};

/// Errors raised synchronously by series and indicator operations.
///
/// None of these are retried internally. Numeric degeneracies (flat prices,
/// zero average loss, short history) are never reported here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Out of order: timestamp {timestamp} is not after {last}")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Unknown indicator: {0}")]
    UnknownIndicator(String),
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

impl EngineError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Fails with [`EngineError::OutOfOrder`] unless `timestamp` is strictly after `last`.
pub fn ensure_after(
    last: Option<DateTime<Utc>>,
    timestamp: DateTime<Utc>,
) -> Result<(), EngineError> {
    match last {
        Some(last) if timestamp <= last => Err(EngineError::OutOfOrder { timestamp, last }),
        _ => Ok(()),
    }
}

use crate::schema::ResourceId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Invalid reconciler configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid activity period #{sequence} for resource {resource_id}: {details}")]
    InvalidActivityPeriod {
        resource_id: ResourceId,
        sequence: u32,
        details: String,
    },

    #[error("Fiscal quarter not found for period number {period}")]
    QuarterNotFound { period: u32 },

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Store query failed: {0}")]
    QueryFailed(String),

    #[error("Store rejected write: {0}")]
    WriteFailed(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
}

impl TrackingError {
    /// Fatal errors end the whole run; everything else is isolated to the unit
    /// being processed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrackingError::WriteFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_write_failures_are_fatal() {
        assert!(TrackingError::WriteFailed("disk full".to_string()).is_fatal());
        assert!(!TrackingError::QuarterNotFound { period: 5 }.is_fatal());
        assert!(!TrackingError::QueryFailed("timeout".to_string()).is_fatal());
        assert!(!TrackingError::LockPoisoned.is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = TrackingError::QuarterNotFound { period: 7 };
        assert_eq!(err.to_string(), "Fiscal quarter not found for period number 7");
    }
}

use thiserror::Error;

// SQLSTATE codes treated as transient.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization failure: {0}")]
    Serialization(String),
    #[error("deadlock detected: {0}")]
    Deadlock(String),
    #[error("lock wait aborted: {0}")]
    LockTimeout(String),
    #[error("unique constraint race: {0}")]
    UniqueViolation(String),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the whole transaction may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Serialization(_)
                | Self::Deadlock(_)
                | Self::LockTimeout(_)
                | Self::UniqueViolation(_)
        )
    }

    /// Classify a SQLSTATE code; `None` means the failure is not transient.
    fn transient(code: &str, message: String) -> Option<Self> {
        match code {
            SERIALIZATION_FAILURE => Some(Self::Serialization(message)),
            DEADLOCK_DETECTED => Some(Self::Deadlock(message)),
            LOCK_NOT_AVAILABLE | QUERY_CANCELED => Some(Self::LockTimeout(message)),
            UNIQUE_VIOLATION => Some(Self::UniqueViolation(message)),
            _ => None,
        }
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<(String, String)> {
    let db = err.as_database_error()?;
    let code = db.code()?.into_owned();
    Some((code, db.message().to_string()))
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        sqlstate(&err)
            .and_then(|(code, message)| Self::transient(&code, message))
            .unwrap_or(Self::Database(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_sqlstates_are_classified() {
        let cases = [
            (SERIALIZATION_FAILURE, "serialization failure"),
            (DEADLOCK_DETECTED, "deadlock detected"),
            (LOCK_NOT_AVAILABLE, "lock wait aborted"),
            (QUERY_CANCELED, "lock wait aborted"),
            (UNIQUE_VIOLATION, "unique constraint race"),
        ];
        for (code, prefix) in cases {
            let err = StoreError::transient(code, "boom".to_string());
            let err = err.unwrap_or_else(|| panic!("{code} should be transient"));
            assert!(err.is_transient());
            assert!(err.to_string().starts_with(prefix), "{err}");
        }
    }

    #[test]
    fn other_sqlstates_are_not_transient() {
        assert!(StoreError::transient("42P01", "missing table".to_string()).is_none());
        assert!(StoreError::transient("23503", "foreign key".to_string()).is_none());
    }

    #[test]
    fn connectivity_errors_are_fatal() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Database(_)));
        assert!(!err.is_transient());
        assert!(!StoreError::Backend("gone".to_string()).is_transient());
    }
}

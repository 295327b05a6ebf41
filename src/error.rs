use derive_more::Display;

/// What an id in an error refers to.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum EntityKind {
    #[display("category")]
    Category,
    #[display("strategy")]
    Strategy,
    #[display("template")]
    Template,
    #[display("legacy category")]
    LegacyCategory,
}

#[derive(Debug)]
pub enum Error {
    /// Bad input shape or value.
    Validation { field: String, reason: String },
    /// Referenced id does not exist.
    NotFound { kind: EntityKind, id: String },
    /// Policy violation, for example deleting a system or non-leaf category.
    Conflict {
        kind: EntityKind,
        id: String,
        reason: String,
    },
    /// Cycle or dangling reference found while reading the stored data.
    DataIntegrity {
        kind: EntityKind,
        id: String,
        reason: String,
    },
    Database(tokio_postgres::Error),
    Pool(deadpool_postgres::PoolError),
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(kind: EntityKind, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Conflict {
            kind,
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn integrity(kind: EntityKind, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DataIntegrity {
            kind,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Stable name of the failure class, used on the wire.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "ValidationError",
            Error::NotFound { .. } => "NotFound",
            Error::Conflict { .. } => "Conflict",
            Error::DataIntegrity { .. } => "DataIntegrityError",
            Error::Database(_) | Error::Pool(_) | Error::Store(_) => "StoreError",
        }
    }

    /// Offending id, if the error is about a specific record.
    pub fn id(&self) -> Option<&str> {
        match self {
            Error::NotFound { id, .. }
            | Error::Conflict { id, .. }
            | Error::DataIntegrity { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Offending input field, if the error is a validation failure.
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::Pool(e) => Some(e),
            _ => None,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            Error::NotFound { kind, id } => write!(f, "{kind} {id} not found"),
            Error::Conflict { kind, id, reason } => write!(f, "{kind} {id}: {reason}"),
            Error::DataIntegrity { kind, id, reason } => {
                write!(f, "data integrity violation at {kind} {id}: {reason}")
            }
            Error::Database(e) => write!(f, "database error: {e}"),
            Error::Pool(e) => write!(f, "connection pool error: {e}"),
            Error::Store(reason) => write!(f, "store error: {reason}"),
        }
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(value: tokio_postgres::Error) -> Self {
        Error::Database(value)
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(value: deadpool_postgres::PoolError) -> Self {
        Error::Pool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKind, Error};

    #[test]
    fn test_that_errors_carry_kind_and_offending_id() {
        let err = Error::not_found(EntityKind::Category, "abc");
        assert!(err.kind_name() == "NotFound");
        assert!(err.id() == Some("abc"));
        assert!(err.to_string() == "category abc not found");

        let err = Error::validation("name", "must not be empty");
        assert!(err.kind_name() == "ValidationError");
        assert!(err.field() == Some("name"));
        assert!(err.id().is_none());
    }
}

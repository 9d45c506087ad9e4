use diesel::result::DatabaseErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    Diesel(diesel::result::Error),

    #[error(transparent)]
    PoolBuild(#[from] diesel_async::pooled_connection::deadpool::BuildError),

    /// Failed to check out a connection from the pool. These errors are transient,
    /// callers may retry the operation.
    #[error(transparent)]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),

    /// The store rejected a write because of a uniqueness or foreign key constraint
    #[error("constraint violation: {0}")]
    ConstraintViolation(diesel::result::Error),

    #[error("Failed to refresh token")]
    RefreshTokenFailure,

    #[error("The requested record was not found")]
    NotFound,

    #[error("The token has expired")]
    Expired,
}

impl From<diesel::result::Error> for DatabaseError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => Self::NotFound,
            diesel::result::Error::DatabaseError(
                kind @ (DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation),
                info,
            ) => Self::ConstraintViolation(diesel::result::Error::DatabaseError(kind, info)),
            other => Self::Diesel(other),
        }
    }
}

pub type Result<T> = ::core::result::Result<T, DatabaseError>;

pub trait DatabaseResultExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> DatabaseResultExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Err(DatabaseError::NotFound) => Ok(None),
            other => other.map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diesel_not_found_maps_to_not_found() {
        let error = DatabaseError::from(diesel::result::Error::NotFound);

        assert!(matches!(error, DatabaseError::NotFound));
    }

    #[test]
    fn key_violations_map_to_constraint_violation() {
        for kind in [
            DatabaseErrorKind::UniqueViolation,
            DatabaseErrorKind::ForeignKeyViolation,
        ] {
            let error = DatabaseError::from(diesel::result::Error::DatabaseError(
                kind,
                Box::new(String::from("duplicate key value violates constraint")),
            ));

            assert!(matches!(error, DatabaseError::ConstraintViolation(_)));
        }
    }

    #[test]
    fn optional_turns_not_found_into_none() {
        let missing: Result<()> = Err(DatabaseError::NotFound);
        let expired: Result<()> = Err(DatabaseError::Expired);

        assert!(matches!(missing.optional(), Ok(None)));
        assert!(matches!(expired.optional(), Err(DatabaseError::Expired)));
        assert!(matches!(Ok(42).optional(), Ok(Some(42))));
    }
}

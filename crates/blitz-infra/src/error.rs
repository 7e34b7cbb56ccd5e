use blitz_types::error::RepositoryError;

/// Classify a sqlx error.
///
/// Pool and IO failures are infrastructure problems (`Connection`); unique
/// violations are `Conflict`; everything else the caller caused (`Query`).
pub(crate) fn repo_error(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            tracing::warn!(error = %err, "database connection failure");
            RepositoryError::Connection
        }
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        _ => RepositoryError::Query(err.to_string()),
    }
}

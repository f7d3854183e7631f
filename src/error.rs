use std::time::Duration;
use thiserror::Error;

/// Startup failures. Nothing in here is raised once a cycle is running.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("HTTP client error: {0}")]
    HttpClient(String),
    #[error("DB error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("endpoint answered with HTTP status {0}")]
    HttpStatus(u16),
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("store unavailable: {0}")]
    Connection(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("statement rejected: {0}")]
    Statement(String),
}

impl From<sqlx::Error> for WriteError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                // SQLSTATE class 23: integrity constraint violation
                if db.code().is_some_and(|code| code.starts_with("23")) {
                    WriteError::Constraint(db.message().to_string())
                } else {
                    WriteError::Statement(db.message().to_string())
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => WriteError::Connection(e.to_string()),
            _ => WriteError::Statement(e.to_string()),
        }
    }
}

/// Everything that can end a single pipeline. The `Display` output is what
/// lands in the collection log's error column.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("write failed: {0}")]
    Write(#[from] WriteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_detail_names_the_stage() {
        let err = PipelineError::from(ParseError::Malformed("unexpected end of stream".into()));
        assert_eq!(
            err.to_string(),
            "parse failed: malformed payload: unexpected end of stream"
        );

        let err = PipelineError::from(FetchError::HttpStatus(503));
        assert_eq!(
            err.to_string(),
            "fetch failed: endpoint answered with HTTP status 503"
        );
    }

    #[test]
    fn test_pool_errors_are_connection_errors() {
        assert!(matches!(
            WriteError::from(sqlx::Error::PoolTimedOut),
            WriteError::Connection(_)
        ));
        assert!(matches!(
            WriteError::from(sqlx::Error::RowNotFound),
            WriteError::Statement(_)
        ));
    }
}

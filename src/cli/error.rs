//! CLI-specific error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input at {path}:{line}: {message}")]
    InvalidInput {
        path: String,
        line: usize,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Service error: {0}")]
    Service(#[from] jobmerge::ServiceError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CliError {
    /// Process exit code for this error
    ///
    /// 2 for bad configuration or input, 3 for an interrupted run, 4 for a
    /// missing record, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::InvalidInput { .. } | CliError::Validation(_) => 2,
            CliError::Service(jobmerge::ServiceError::Config(_))
            | CliError::Service(jobmerge::ServiceError::Validation(_)) => 2,
            CliError::Service(jobmerge::ServiceError::RunAborted { .. })
            | CliError::Service(jobmerge::ServiceError::Cancelled { .. }) => 3,
            CliError::NotFound(_) | CliError::Service(jobmerge::ServiceError::NotFound(_)) => 4,
            CliError::Io(_) | CliError::Service(_) => 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Config("bad".to_string()).exit_code(), 2);
        assert_eq!(
            CliError::Service(jobmerge::ServiceError::Cancelled {
                committed: Vec::new(),
                pending: Vec::new(),
            })
            .exit_code(),
            3
        );
        assert_eq!(CliError::NotFound("job".to_string()).exit_code(), 4);
        assert_eq!(
            CliError::Service(jobmerge::ServiceError::Storage("locked".to_string())).exit_code(),
            1
        );
    }
}

// ABOUTME: Database sessions used by the export and load phases
// ABOUTME: Defines DatabaseError, the SqlSession and DatabaseConnector traits

pub mod postgres;

pub use postgres::{connect, connect_with_retry, PostgresConnector, PostgresSession};

use async_trait::async_trait;
use thiserror::Error;

/// Failures raised while opening or using a database session
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The configured driver name is not one this build can speak
    #[error("no database driver available for '{0}' (supported: postgres, postgresql)")]
    DriverNotFound(String),

    /// The server could not be reached or refused the login
    #[error("cannot connect to {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    /// The server rejected a statement
    #[error("SQL execution failed: {0}")]
    SqlExecution(String),
}

/// An open session that can run server-side commands
#[async_trait]
pub trait SqlSession: Send + Sync {
    /// Run `sql` and return the count carried in the first column of the
    /// last result row. Commands that return no rows report their
    /// affected-row count instead.
    async fn query_count(&self, sql: &str) -> Result<u64, DatabaseError>;

    /// Run a data-modifying statement and return the affected-row count
    async fn execute(&self, sql: &str) -> Result<u64, DatabaseError>;
}

/// Opens sessions against the source and target databases
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect_source(&self) -> Result<Box<dyn SqlSession>, DatabaseError>;

    async fn connect_target(&self) -> Result<Box<dyn SqlSession>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_names_endpoint() {
        let message = DatabaseError::Connection {
            endpoint: "postgresql://u:***@h:5432/d".into(),
            message: "refused".into(),
        }
        .to_string();
        assert_eq!(message, "cannot connect to postgresql://u:***@h:5432/d: refused");
    }

    #[test]
    fn test_driver_error_lists_supported_drivers() {
        let message = DatabaseError::DriverNotFound("com.ibm.db2.jcc.DB2Driver".into()).to_string();
        assert!(message.contains("com.ibm.db2.jcc.DB2Driver"));
        assert!(message.contains("postgres"));
    }
}

// ABOUTME: PostgreSQL-protocol sessions for the source and target databases
// ABOUTME: Handles driver selection, TLS setup, keepalives, retries and connection lifecycle

use super::{DatabaseConnector, DatabaseError, SqlSession};
use crate::config::DatabaseEndpoint;
use crate::utils;
use async_trait::async_trait;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, Config, SimpleQueryMessage};

/// Driver names accepted in `SOURCE_DRIVER` / `TARGET_DRIVER`
const SUPPORTED_DRIVERS: &[&str] = &["postgres", "postgresql"];

/// Build the client configuration for `endpoint`
///
/// TCP keepalives are always enabled so that long-running export and load
/// commands survive idle timeouts on load balancers between the tool and
/// the server:
/// - `keepalives`: on
/// - `keepalives_idle`: first probe after 60 seconds of idle time
///
/// # Errors
///
/// Returns [`DatabaseError::DriverNotFound`] if the endpoint names a driver
/// other than `postgres` or `postgresql` (case-insensitive).
///
/// # Examples
///
/// ```
/// # use stage_migrator::config::DatabaseEndpoint;
/// # use stage_migrator::database::postgres::client_config;
/// let endpoint = DatabaseEndpoint {
///     driver: "postgres".to_string(),
///     host: "db.example.com".to_string(),
///     port: 5432,
///     use_ssl: true,
///     database: "sales".to_string(),
///     user: "exporter".to_string(),
///     password: "secret".to_string(),
/// };
/// let config = client_config(&endpoint).unwrap();
/// assert_eq!(config.get_dbname(), Some("sales"));
/// assert!(config.get_keepalives());
/// ```
pub fn client_config(endpoint: &DatabaseEndpoint) -> Result<Config, DatabaseError> {
    let driver = endpoint.driver.trim().to_lowercase();
    if !SUPPORTED_DRIVERS.contains(&driver.as_str()) {
        return Err(DatabaseError::DriverNotFound(endpoint.driver.clone()));
    }

    let ssl_mode = if endpoint.use_ssl {
        SslMode::Require
    } else {
        SslMode::Disable
    };

    let mut config = Config::new();
    config
        .host(&endpoint.host)
        .port(endpoint.port)
        .dbname(&endpoint.database)
        .user(&endpoint.user)
        .password(&endpoint.password)
        .ssl_mode(ssl_mode)
        .application_name("stage-migrator")
        .connect_timeout(Duration::from_secs(30))
        .keepalives(true)
        .keepalives_idle(Duration::from_secs(60));

    Ok(config)
}

/// Turn a driver error message into an operator-facing explanation
fn describe_connect_error(error_msg: &str) -> String {
    if error_msg.contains("password authentication failed") {
        "Authentication failed: Invalid username or password.\n\
         Please verify your database credentials."
            .to_string()
    } else if error_msg.contains("database") && error_msg.contains("does not exist") {
        format!(
            "Database does not exist: {}\n\
             Please create the database first or check DATABASE_NAME.",
            error_msg
        )
    } else if error_msg.contains("Connection refused") || error_msg.contains("could not connect")
    {
        format!(
            "Connection refused: Unable to reach database server.\n\
             Please check:\n\
             - The host and port are correct\n\
             - The database server is running\n\
             - Firewall rules allow connections\n\
             Error: {}",
            error_msg
        )
    } else if error_msg.contains("timeout") || error_msg.contains("timed out") {
        format!(
            "Connection timeout: Database server did not respond in time.\n\
             This could indicate network issues or server overload.\n\
             Error: {}",
            error_msg
        )
    } else if error_msg.contains("SSL") || error_msg.contains("TLS") {
        format!(
            "TLS/SSL error: Failed to establish secure connection.\n\
             Please verify USE_SSL_CONNECTION matches the server.\n\
             Error: {}",
            error_msg
        )
    } else if error_msg.contains("no pg_hba.conf entry") {
        format!(
            "Access denied: No pg_hba.conf entry for host.\n\
             The database server is not configured to accept connections from your host.\n\
             Error: {}",
            error_msg
        )
    } else {
        format!("Failed to connect to database: {}", error_msg)
    }
}

/// Connect to a database endpoint with TLS support
///
/// The connection lifecycle is managed automatically via tokio spawn.
///
/// # Errors
///
/// This function will return an error if:
/// - The driver name is not supported
/// - Authentication fails (invalid username or password)
/// - The database does not exist
/// - The database server is unreachable
/// - TLS negotiation fails
/// - Connection times out
///
/// # Examples
///
/// ```no_run
/// # use stage_migrator::config::MigrationConfig;
/// # use stage_migrator::database::connect;
/// # async fn example(config: MigrationConfig) -> anyhow::Result<()> {
/// let client = connect(&config.source).await?;
/// # Ok(())
/// # }
/// ```
pub async fn connect(endpoint: &DatabaseEndpoint) -> Result<Client, DatabaseError> {
    let config = client_config(endpoint)?;
    let display_url = endpoint.display_url();

    let tls_connector = TlsConnector::builder()
        .danger_accept_invalid_certs(false)
        .build()
        .map_err(|e| DatabaseError::Connection {
            endpoint: display_url.clone(),
            message: format!("Failed to build TLS connector: {}", e),
        })?;
    let tls = MakeTlsConnector::new(tls_connector);

    tracing::debug!("Connecting to {}", display_url);
    let (client, connection) =
        config
            .connect(tls)
            .await
            .map_err(|e| DatabaseError::Connection {
                endpoint: display_url.clone(),
                message: describe_connect_error(&e.to_string()),
            })?;

    // Spawn connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    Ok(client)
}

/// Connect with automatic retry for transient failures
///
/// Attempts to connect up to 3 times with exponential backoff (1s, 2s, 4s).
/// An unsupported driver is reported immediately without retrying.
///
/// # Errors
///
/// Returns the last connection error if all retry attempts fail.
pub async fn connect_with_retry(endpoint: &DatabaseEndpoint) -> Result<Client, DatabaseError> {
    client_config(endpoint)?;

    utils::retry_with_backoff(
        || connect(endpoint),
        3,                      // Max 3 retries
        Duration::from_secs(1), // Start with 1 second delay
    )
    .await
}

/// Describe a statement failure, preferring the server's SQLSTATE and message
fn describe_sql_error(error: &tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db) => format!("{} (SQLSTATE {})", db.message(), db.code().code()),
        None => error.to_string(),
    }
}

/// A [`SqlSession`] over an open tokio-postgres client
pub struct PostgresSession {
    client: Client,
}

impl PostgresSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SqlSession for PostgresSession {
    async fn query_count(&self, sql: &str) -> Result<u64, DatabaseError> {
        // Administrative procedures return their summary as text rows, so the
        // simple query protocol is used instead of a prepared statement.
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| DatabaseError::SqlExecution(describe_sql_error(&e)))?;

        count_from_messages(&messages)
    }

    async fn execute(&self, sql: &str) -> Result<u64, DatabaseError> {
        self.client
            .execute(sql, &[])
            .await
            .map_err(|e| DatabaseError::SqlExecution(describe_sql_error(&e)))
    }
}

/// Extract the count from the first column of the last row; falls back to
/// the affected-row count when the command returned no rows.
fn count_from_messages(messages: &[SimpleQueryMessage]) -> Result<u64, DatabaseError> {
    let mut last_value = None;
    let mut affected = None;

    for message in messages {
        match message {
            SimpleQueryMessage::Row(row) => {
                let value = row
                    .try_get(0)
                    .map_err(|e| DatabaseError::SqlExecution(e.to_string()))?;
                last_value = Some(value.unwrap_or_default().to_string());
            }
            SimpleQueryMessage::CommandComplete(rows) => affected = Some(*rows),
            _ => {}
        }
    }

    match (last_value, affected) {
        (Some(value), _) => parse_count(&value),
        (None, Some(rows)) => Ok(rows),
        (None, None) => Err(DatabaseError::SqlExecution(
            "command returned no result".to_string(),
        )),
    }
}

fn parse_count(value: &str) -> Result<u64, DatabaseError> {
    value.trim().parse::<u64>().map_err(|_| {
        DatabaseError::SqlExecution(format!(
            "expected a row count in the first result column, found '{}'",
            utils::sanitize_identifier(value)
        ))
    })
}

/// Opens [`PostgresSession`]s for the configured source and target endpoints
pub struct PostgresConnector {
    source: DatabaseEndpoint,
    target: DatabaseEndpoint,
}

impl PostgresConnector {
    pub fn new(source: DatabaseEndpoint, target: DatabaseEndpoint) -> Self {
        Self { source, target }
    }

    async fn open(endpoint: &DatabaseEndpoint) -> Result<Box<dyn SqlSession>, DatabaseError> {
        let client = connect_with_retry(endpoint).await?;
        tracing::info!("✓ Connected to {}", endpoint.display_url());
        Ok(Box::new(PostgresSession::new(client)))
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn connect_source(&self) -> Result<Box<dyn SqlSession>, DatabaseError> {
        Self::open(&self.source).await
    }

    async fn connect_target(&self) -> Result<Box<dyn SqlSession>, DatabaseError> {
        Self::open(&self.target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(driver: &str, use_ssl: bool) -> DatabaseEndpoint {
        DatabaseEndpoint {
            driver: driver.to_string(),
            host: "db.example.com".to_string(),
            port: 50000,
            use_ssl,
            database: "SALES".to_string(),
            user: "exporter".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_client_config_carries_endpoint_settings() {
        let config = client_config(&endpoint("postgres", true)).unwrap();

        assert_eq!(config.get_dbname(), Some("SALES"));
        assert_eq!(config.get_user(), Some("exporter"));
        assert_eq!(config.get_ports(), &[50000]);
        assert_eq!(config.get_ssl_mode(), SslMode::Require);
        assert!(config.get_keepalives());
        assert_eq!(config.get_keepalives_idle(), Duration::from_secs(60));
        assert_eq!(
            config.get_connect_timeout(),
            Some(&Duration::from_secs(30))
        );
    }

    #[test]
    fn test_client_config_disables_tls_when_requested() {
        let config = client_config(&endpoint("postgresql", false)).unwrap();
        assert_eq!(config.get_ssl_mode(), SslMode::Disable);
    }

    #[test]
    fn test_driver_name_is_case_insensitive() {
        assert!(client_config(&endpoint("PostgreSQL", true)).is_ok());
        assert!(client_config(&endpoint(" postgres ", true)).is_ok());
    }

    #[test]
    fn test_unknown_driver_is_rejected() {
        let result = client_config(&endpoint("com.ibm.db2.jcc.DB2Driver", true));
        assert!(matches!(result, Err(DatabaseError::DriverNotFound(d)) if d == "com.ibm.db2.jcc.DB2Driver"));
    }

    #[tokio::test]
    async fn test_connect_with_unknown_driver_fails_without_retrying() {
        let started = std::time::Instant::now();
        let result = connect_with_retry(&endpoint("mysql", true)).await;

        assert!(matches!(result, Err(DatabaseError::DriverNotFound(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_describe_connect_error() {
        assert!(describe_connect_error("password authentication failed for user")
            .starts_with("Authentication failed"));
        assert!(describe_connect_error("database \"x\" does not exist")
            .starts_with("Database does not exist"));
        assert!(describe_connect_error("Connection refused (os error 111)")
            .starts_with("Connection refused"));
        assert!(describe_connect_error("timed out").starts_with("Connection timeout"));
        assert!(describe_connect_error("something else").contains("something else"));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("42").unwrap(), 42);
        assert_eq!(parse_count(" 7 ").unwrap(), 7);
        assert!(matches!(
            parse_count("SQL3104N"),
            Err(DatabaseError::SqlExecution(_))
        ));
    }

    #[test]
    fn test_count_falls_back_to_affected_rows() {
        let messages = vec![SimpleQueryMessage::CommandComplete(12)];
        assert_eq!(count_from_messages(&messages).unwrap(), 12);
        assert!(count_from_messages(&[]).is_err());
    }

    // NOTE: This test requires a real PostgreSQL instance
    // Skip if TEST_DATABASE_HOST is not set
    #[tokio::test]
    #[ignore]
    async fn test_connect_and_count_against_live_server() {
        let host = std::env::var("TEST_DATABASE_HOST")
            .expect("TEST_DATABASE_HOST must be set for integration tests");
        let endpoint = DatabaseEndpoint {
            driver: "postgres".to_string(),
            host,
            port: std::env::var("TEST_DATABASE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5432),
            use_ssl: false,
            database: std::env::var("TEST_DATABASE_NAME").unwrap_or_else(|_| "postgres".into()),
            user: std::env::var("TEST_DATABASE_USER").unwrap_or_else(|_| "postgres".into()),
            password: std::env::var("TEST_DATABASE_PASSWORD").unwrap_or_default(),
        };

        let session = PostgresSession::new(connect(&endpoint).await.unwrap());
        let count = session
            .query_count("SELECT count(*) FROM (VALUES (1), (2), (3)) AS t(x)")
            .await
            .unwrap();
        assert_eq!(count, 3);
    }
}

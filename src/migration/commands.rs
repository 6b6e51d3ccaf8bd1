// ABOUTME: Builds the server-side export and external-table load commands
// ABOUTME: Table names and settings are interpolated verbatim; secrets are redacted on display

use crate::config::{LoadOptions, StoreSettings};
use std::fmt;
use std::path::Path;

const REDACTED: &str = "****";

/// Name of the export file (and object key) staged for `table`
///
/// # Examples
///
/// ```
/// # use stage_migrator::migration::commands::staged_file_name;
/// assert_eq!(staged_file_name("SALES.ORDERS"), "SALES.ORDERS.csv");
/// ```
pub fn staged_file_name(table: &str) -> String {
    format!("{}.csv", table)
}

/// Server-side export of `table` into `<export_dir>/<table>.csv`
///
/// The file is written on the source server as pipe-delimited text without
/// character delimiters. The result set's last row carries the exported row
/// count in its first column.
///
/// # Security
///
/// `table` is interpolated without quoting or escaping. The table manifest is
/// operator-controlled input and must only ever come from a trusted source.
///
/// # Examples
///
/// ```
/// # use std::path::Path;
/// # use stage_migrator::migration::commands::export_command;
/// let sql = export_command(Path::new("/data/export"), "ORDERS");
/// assert!(sql.starts_with("CALL SYSPROC.ADMIN_CMD ('EXPORT to /data/export/ORDERS.csv OF DEL"));
/// assert!(sql.ends_with("select * from ORDERS')"));
/// ```
pub fn export_command(export_dir: &Path, table: &str) -> String {
    let target = export_dir.join(staged_file_name(table));
    format!(
        "CALL SYSPROC.ADMIN_CMD ('EXPORT to {} OF DEL MODIFIED BY NOCHARDEL COLDEL| MESSAGES ON SERVER select * from {}')",
        target.display(),
        table
    )
}

/// External-table load of one staged object into its target table
///
/// The executable statement embeds the HMAC secret, so it is only reachable
/// through [`LoadCommand::sql`]. `Display` and `Debug` render the statement
/// with the secret replaced.
///
/// # Security
///
/// The table name, object key and load arguments are interpolated without
/// escaping. They come from the manifest and the configuration file, which
/// are trusted operator input.
pub struct LoadCommand {
    sql: String,
    redacted: String,
}

impl LoadCommand {
    pub fn new(table: &str, object_key: &str, store: &StoreSettings, load: &LoadOptions) -> Self {
        let render = |secret: &str| {
            let mut sql = format!(
                "insert into {} select * from external '{}' using (s3('{}', '{}', '{}', '{}' ) {} ",
                table,
                object_key,
                store.endpoint_host(),
                load.access_key_id,
                secret,
                store.bucket,
                load.extra_args
            );
            if let Some(format) = &load.timestamp_format {
                sql.push_str(&format!("TIMESTAMP_FORMAT '{}'", format));
            }
            sql.push(')');
            sql
        };

        Self {
            sql: render(&load.secret_access_key),
            redacted: render(REDACTED),
        }
    }

    /// The statement to execute, secret included
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for LoadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

impl fmt::Debug for LoadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoadCommand").field(&self.redacted).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use crate::config::MigrationConfig;

    fn sample() -> MigrationConfig {
        MigrationConfig::from_toml_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_export_command_matches_server_procedure_format() {
        let sql = export_command(Path::new("/data/export"), "SALES.ORDERS");
        assert_eq!(
            sql,
            "CALL SYSPROC.ADMIN_CMD ('EXPORT to /data/export/SALES.ORDERS.csv OF DEL MODIFIED BY NOCHARDEL COLDEL| MESSAGES ON SERVER select * from SALES.ORDERS')"
        );
    }

    #[test]
    fn test_export_command_accepts_trailing_separator() {
        let sql = export_command(Path::new("/data/export/"), "T1");
        assert!(sql.contains("EXPORT to /data/export/T1.csv OF DEL"));
    }

    #[test]
    fn test_load_command_with_timestamp_format() {
        let config = sample();
        let command = LoadCommand::new("ORDERS", "ORDERS.csv", &config.store, &config.load);

        assert_eq!(
            command.sql(),
            "insert into ORDERS select * from external 'ORDERS.csv' using \
             (s3('s3.us-east.cloud-object-storage.appdomain.cloud', 'hmac-access', 'hmac-secret', 'staging' ) \
             DELIMITER '|' TIMESTAMP_FORMAT 'YYYY-MM-DD HH:MI:SS')"
        );
    }

    #[test]
    fn test_load_command_without_timestamp_format() {
        let mut config = sample();
        config.load.timestamp_format = None;
        let command = LoadCommand::new("ORDERS", "ORDERS.csv", &config.store, &config.load);

        assert!(command.sql().ends_with("'staging' ) DELIMITER '|' )"));
        assert!(!command.sql().contains("TIMESTAMP_FORMAT"));
    }

    #[test]
    fn test_load_command_display_hides_secret() {
        let config = sample();
        let command = LoadCommand::new("ORDERS", "ORDERS.csv", &config.store, &config.load);

        let shown = command.to_string();
        assert!(!shown.contains("hmac-secret"));
        assert!(shown.contains("'hmac-access', '****'"));
        assert!(!format!("{:?}", command).contains("hmac-secret"));
        assert!(command.sql().contains("hmac-secret"));
    }
}

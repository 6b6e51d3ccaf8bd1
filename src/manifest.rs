// ABOUTME: Table manifest loading for the migration run
// ABOUTME: Reads one table name per line into an ordered, duplicate-free TableList

use crate::utils;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("table manifest not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read table manifest at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("table '{table}' is listed more than once (line {line} repeats line {first_line})")]
    DuplicateTable {
        table: String,
        line: usize,
        first_line: usize,
    },
}

/// Ordered list of the tables to migrate
///
/// Every phase processes tables in exactly this order. Names are kept as
/// written (after trimming) and are interpolated verbatim into export and
/// load commands, so the manifest file is trusted operator input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableList {
    tables: Vec<String>,
}

impl TableList {
    /// Read the manifest at `path`
    ///
    /// Each line is trimmed; blank lines are skipped. An empty file yields an
    /// empty list, which makes every phase a no-op.
    ///
    /// # Errors
    ///
    /// - [`ManifestError::NotFound`] if the file does not exist
    /// - [`ManifestError::Io`] if it cannot be read
    /// - [`ManifestError::DuplicateTable`] if a name appears twice
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ManifestError::NotFound(path.to_path_buf())
            } else {
                ManifestError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        Self::parse(&contents)
    }

    /// Build a list from manifest text
    ///
    /// # Examples
    ///
    /// ```
    /// # use stage_migrator::manifest::TableList;
    /// let tables = TableList::parse("ORDERS\n\n  CUSTOMERS  \n").unwrap();
    /// assert_eq!(tables.as_slice(), ["ORDERS", "CUSTOMERS"]);
    ///
    /// assert!(TableList::parse("ORDERS\nORDERS\n").is_err());
    /// ```
    pub fn parse(contents: &str) -> Result<Self, ManifestError> {
        let mut tables = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (index, raw) in contents.lines().enumerate() {
            let line = index + 1;
            let name = raw.trim();
            if name.is_empty() {
                tracing::debug!("Skipping blank manifest line {}", line);
                continue;
            }

            if let Some(&first_line) = seen.get(name) {
                return Err(ManifestError::DuplicateTable {
                    table: utils::sanitize_identifier(name),
                    line,
                    first_line,
                });
            }

            seen.insert(name.to_string(), line);
            tables.push(name.to_string());
        }

        Ok(Self { tables })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_preserves_file_order() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, "t3").unwrap();
        writeln!(tmp, "t1").unwrap();
        writeln!(tmp, "t2").unwrap();

        let tables = TableList::load(tmp.path()).unwrap();
        assert_eq!(tables.iter().collect::<Vec<_>>(), vec!["t3", "t1", "t2"]);
        assert_eq!(tables.len(), 3);
    }

    #[test]
    fn test_blank_lines_and_whitespace_are_ignored() {
        let tables = TableList::parse("\n  SALES.ORDERS \r\n\t\nSALES.ITEMS\n\n").unwrap();
        assert_eq!(tables.as_slice(), ["SALES.ORDERS", "SALES.ITEMS"]);
    }

    #[test]
    fn test_empty_file_yields_empty_list() {
        let tmp = NamedTempFile::new().unwrap();
        let tables = TableList::load(tmp.path()).unwrap();
        assert!(tables.is_empty());
        assert_eq!(tables.iter().count(), 0);
    }

    #[test]
    fn test_duplicate_reports_both_lines() {
        let err = TableList::parse("a\nb\n\na\n").unwrap_err();
        match err {
            ManifestError::DuplicateTable {
                table,
                line,
                first_line,
            } => {
                assert_eq!(table, "a");
                assert_eq!(line, 4);
                assert_eq!(first_line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_names_differing_in_case_are_distinct() {
        let tables = TableList::parse("orders\nORDERS\n").unwrap();
        assert_eq!(tables.len(), 2);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.txt");

        let err = TableList::load(&path).unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(p) if p == path));
    }
}

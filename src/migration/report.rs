// ABOUTME: Per-table outcomes collected while a migration run executes
// ABOUTME: Drives the end-of-run summary and the process exit status

use super::phase::Phase;
use super::pipeline::PipelineError;
use crate::storage::TransferResult;
use crate::utils;
use std::fmt;

/// What happened to one table in one phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    Exported { rows: u64 },
    Transferred(TransferResult),
    Loaded { rows: u64 },
    Failed { error: String },
    /// Not attempted because an earlier phase failed for the table in this run
    Skipped { reason: String },
}

impl fmt::Display for TableOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableOutcome::Exported { rows } => write!(f, "exported {} row(s)", rows),
            TableOutcome::Transferred(result) => write!(
                f,
                "transferred {} in {} part(s), sha256 {}",
                utils::format_bytes(result.bytes_transferred),
                result.part_count,
                result.sha256
            ),
            TableOutcome::Loaded { rows } => write!(f, "loaded {} row(s)", rows),
            TableOutcome::Failed { error } => write!(f, "FAILED: {}", error),
            TableOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub phase: Phase,
    pub table: String,
    pub outcome: TableOutcome,
}

impl TableReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TableOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, TableOutcome::Skipped { .. })
    }

    pub fn is_success(&self) -> bool {
        !self.is_failure() && !self.is_skipped()
    }
}

/// Everything a run did, in execution order
///
/// A run either finishes every selected phase, recording each table's
/// success or failure, or stops early on a run-wide failure that is kept in
/// [`RunReport::fatal`].
#[derive(Debug, Default)]
pub struct RunReport {
    entries: Vec<TableReport>,
    fatal: Option<PipelineError>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, phase: Phase, table: &str, outcome: TableOutcome) {
        self.entries.push(TableReport {
            phase,
            table: table.to_string(),
            outcome,
        });
    }

    /// The first phase already run in which `table` did not succeed
    pub(crate) fn blocked_by(&self, table: &str) -> Option<Phase> {
        self.entries
            .iter()
            .find(|entry| entry.table == table && !entry.is_success())
            .map(|entry| entry.phase)
    }

    pub(crate) fn abort(&mut self, error: PipelineError) {
        self.fatal = Some(error);
    }

    pub fn entries(&self) -> &[TableReport] {
        &self.entries
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableReport> {
        self.entries.iter().filter(|entry| entry.is_failure())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TableReport> {
        self.entries.iter().filter(|entry| entry.is_skipped())
    }

    /// The run-wide failure that stopped the run, if any
    pub fn fatal(&self) -> Option<&PipelineError> {
        self.fatal.as_ref()
    }

    /// True when any table failed or the run stopped early
    pub fn has_failures(&self) -> bool {
        self.fatal.is_some() || self.failures().next().is_some()
    }

    /// Count of successful tables in `phase`
    pub fn succeeded(&self, phase: Phase) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.phase == phase && entry.is_success())
            .count()
    }

    /// Human-readable lines summarising each phase and every failure
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        for phase in Phase::ALL {
            let total = self.entries.iter().filter(|e| e.phase == phase).count();
            if total == 0 {
                continue;
            }
            lines.push(format!(
                "{}: {}/{} table(s) succeeded",
                phase,
                self.succeeded(phase),
                total
            ));
        }

        for entry in self.entries.iter().filter(|entry| !entry.is_success()) {
            lines.push(format!(
                "  ✗ {} {}: {}",
                entry.phase,
                utils::sanitize_identifier(&entry.table),
                entry.outcome
            ));
        }

        if let Some(fatal) = &self.fatal {
            lines.push(format!("Run stopped: {}", fatal));
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_run_has_no_failures() {
        let mut report = RunReport::new();
        report.record(Phase::Export, "t1", TableOutcome::Exported { rows: 10 });
        report.record(Phase::Load, "t1", TableOutcome::Loaded { rows: 10 });

        assert!(!report.has_failures());
        assert_eq!(report.succeeded(Phase::Export), 1);
        assert_eq!(
            report.summary_lines(),
            vec![
                "EXPORT: 1/1 table(s) succeeded".to_string(),
                "LOAD: 1/1 table(s) succeeded".to_string(),
            ]
        );
    }

    #[test]
    fn test_table_failure_is_listed() {
        let mut report = RunReport::new();
        report.record(Phase::Export, "t1", TableOutcome::Exported { rows: 1 });
        report.record(
            Phase::Export,
            "t2",
            TableOutcome::Failed {
                error: "SQL0204N".to_string(),
            },
        );

        assert!(report.has_failures());
        assert_eq!(report.failures().count(), 1);
        let lines = report.summary_lines();
        assert_eq!(lines[0], "EXPORT: 1/2 table(s) succeeded");
        assert_eq!(lines[1], "  ✗ EXPORT t2: FAILED: SQL0204N");
    }

    #[test]
    fn test_skipped_table_is_listed_but_not_counted_as_success() {
        let mut report = RunReport::new();
        report.record(
            Phase::Export,
            "t1",
            TableOutcome::Failed {
                error: "SQL0204N".to_string(),
            },
        );
        assert_eq!(report.blocked_by("t1"), Some(Phase::Export));
        assert_eq!(report.blocked_by("t2"), None);

        report.record(
            Phase::Transfer,
            "t1",
            TableOutcome::Skipped {
                reason: "EXPORT failed earlier in this run".to_string(),
            },
        );

        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.skipped().count(), 1);
        assert_eq!(report.succeeded(Phase::Transfer), 0);
        let lines = report.summary_lines();
        assert_eq!(lines[1], "TRANSFER: 0/1 table(s) succeeded");
        assert_eq!(
            lines[3],
            "  ✗ TRANSFER t1: skipped: EXPORT failed earlier in this run"
        );
    }

    #[test]
    fn test_transfer_outcome_display() {
        let outcome = TableOutcome::Transferred(TransferResult {
            bytes_transferred: 2048,
            part_count: 1,
            sha256: "abc".to_string(),
        });
        assert_eq!(
            outcome.to_string(),
            "transferred 2.0 KB in 1 part(s), sha256 abc"
        );
    }
}

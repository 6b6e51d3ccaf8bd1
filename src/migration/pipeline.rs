// ABOUTME: Runs the selected phases over every manifest table in order
// ABOUTME: Isolates per-table failures and stops only on run-wide connection or credential failures

use super::commands::{export_command, staged_file_name, LoadCommand};
use super::phase::{Phase, PhaseSet};
use super::report::{RunReport, TableOutcome};
use crate::config::MigrationConfig;
use crate::database::{DatabaseConnector, DatabaseError};
use crate::manifest::TableList;
use crate::storage::{ObjectTransferEngine, PartUploader, TransferError};
use crate::utils;
use thiserror::Error;

/// A failure that no later table can get past, so the run stops
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{role} database unavailable: {source}")]
    Database {
        role: &'static str,
        #[source]
        source: DatabaseError,
    },

    #[error("object store rejected the configured credentials: {0}")]
    StoreAuth(#[source] TransferError),
}

/// Drives EXPORT, TRANSFER and LOAD for one manifest
///
/// All collaborators are borrowed, so the caller decides how long database
/// connectors and the store client live. Within a phase, tables are
/// processed strictly in manifest order and a table's failure is recorded
/// without affecting the next one.
pub struct MigrationPipeline<'a> {
    config: &'a MigrationConfig,
    tables: &'a TableList,
    databases: &'a dyn DatabaseConnector,
    uploader: &'a dyn PartUploader,
    show_progress: bool,
}

impl<'a> MigrationPipeline<'a> {
    pub fn new(
        config: &'a MigrationConfig,
        tables: &'a TableList,
        databases: &'a dyn DatabaseConnector,
        uploader: &'a dyn PartUploader,
    ) -> Self {
        Self {
            config,
            tables,
            databases,
            uploader,
            show_progress: false,
        }
    }

    /// Show a byte progress bar for each transfer
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Execute `phases` in EXPORT, TRANSFER, LOAD order
    ///
    /// Never returns early with an error: a run-wide failure is recorded in
    /// the report and the remaining phases are skipped.
    pub async fn run(&self, phases: &PhaseSet) -> RunReport {
        let mut report = RunReport::new();

        for phase in phases.iter() {
            let outcome = match phase {
                Phase::Export => {
                    println!("Exporting......");
                    tracing::info!("EXPORT phase started");
                    self.export(&mut report).await
                }
                Phase::Transfer => {
                    println!("Moving to object storage.....");
                    tracing::info!("TRANSFER phase started");
                    self.transfer(&mut report).await
                }
                Phase::Load => {
                    println!("Loading......");
                    tracing::info!("LOAD phase started");
                    self.load(&mut report).await
                }
            };

            if let Err(fatal) = outcome {
                tracing::error!("{} phase stopped: {}", phase, fatal);
                report.abort(fatal);
                break;
            }
            tracing::info!("✓ {} phase finished", phase);
        }

        report
    }

    async fn export(&self, report: &mut RunReport) -> Result<(), PipelineError> {
        if self.tables.is_empty() {
            tracing::info!("No tables listed; nothing to export");
            return Ok(());
        }

        let session = self
            .databases
            .connect_source()
            .await
            .map_err(|source| PipelineError::Database {
                role: "source",
                source,
            })?;

        for table in self.tables.iter() {
            let name = utils::sanitize_identifier(table);
            let sql = export_command(&self.config.export_dir, table);
            tracing::debug!("Export command: {}", sql);

            match session.query_count(&sql).await {
                Ok(rows) => {
                    tracing::info!("✓ Exported {} row(s) from '{}'", rows, name);
                    report.record(Phase::Export, table, TableOutcome::Exported { rows });
                }
                Err(e) => {
                    tracing::warn!("✗ Export of '{}' failed: {}", name, e);
                    report.record(
                        Phase::Export,
                        table,
                        TableOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        Ok(())
    }

    async fn transfer(&self, report: &mut RunReport) -> Result<(), PipelineError> {
        let engine = ObjectTransferEngine::new(self.uploader, self.config.store.chunk_size)
            .with_progress(self.show_progress);

        for table in self.tables.iter() {
            let name = utils::sanitize_identifier(table);
            if self.skip_if_blocked(report, Phase::Transfer, table) {
                continue;
            }

            let object_key = staged_file_name(table);
            let local_path = self.config.export_dir.join(&object_key);

            match engine.transfer(&local_path, &object_key).await {
                Ok(result) => {
                    tracing::info!(
                        "✓ Staged '{}' ({}, sha256 {})",
                        name,
                        utils::format_bytes(result.bytes_transferred),
                        result.sha256
                    );
                    report.record(Phase::Transfer, table, TableOutcome::Transferred(result));
                }
                Err(e) => {
                    tracing::warn!("✗ Transfer of '{}' failed: {}", name, e);
                    report.record(
                        Phase::Transfer,
                        table,
                        TableOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                    if e.is_auth() {
                        return Err(PipelineError::StoreAuth(e));
                    }
                }
            }
        }

        Ok(())
    }

    async fn load(&self, report: &mut RunReport) -> Result<(), PipelineError> {
        for table in self.tables.iter() {
            let name = utils::sanitize_identifier(table);
            if self.skip_if_blocked(report, Phase::Load, table) {
                continue;
            }

            let object_key = staged_file_name(table);
            let command =
                LoadCommand::new(table, &object_key, &self.config.store, &self.config.load);
            tracing::debug!("Load command: {}", command);

            // Each load runs on its own session, dropped before the next table
            let session = self
                .databases
                .connect_target()
                .await
                .map_err(|source| PipelineError::Database {
                    role: "target",
                    source,
                })?;

            match session.execute(command.sql()).await {
                Ok(rows) => {
                    tracing::info!("✓ Loaded {} row(s) into '{}'", rows, name);
                    report.record(Phase::Load, table, TableOutcome::Loaded { rows });
                    if self.config.load.delete_staged_objects {
                        self.delete_staged(&object_key).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("✗ Load of '{}' failed: {}", name, e);
                    report.record(
                        Phase::Load,
                        table,
                        TableOutcome::Failed {
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        Ok(())
    }

    /// Record a skip for `table` when an earlier phase of this run failed it,
    /// so a stale file or object from a previous run is never used
    fn skip_if_blocked(&self, report: &mut RunReport, phase: Phase, table: &str) -> bool {
        let Some(failed) = report.blocked_by(table) else {
            return false;
        };
        let reason = format!("{} failed earlier in this run", failed);
        tracing::warn!(
            "✗ Skipping {} of '{}': {}",
            phase,
            utils::sanitize_identifier(table),
            reason
        );
        report.record(phase, table, TableOutcome::Skipped { reason });
        true
    }

    async fn delete_staged(&self, object_key: &str) {
        match self.uploader.delete_object(object_key).await {
            Ok(()) => tracing::info!("✓ Deleted staged object '{}'", object_key),
            Err(e) => tracing::warn!(
                "Could not delete staged object '{}' (left in bucket): {}",
                object_key,
                e
            ),
        }
    }
}

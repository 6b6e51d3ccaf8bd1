// ABOUTME: Migration phases module
// ABOUTME: Phase selection, command builders, the pipeline that runs them, and the run report

pub mod commands;
pub mod phase;
pub mod pipeline;
pub mod report;

pub use commands::{export_command, staged_file_name, LoadCommand};
pub use phase::{Operation, Phase, PhaseSet, UsageError};
pub use pipeline::{MigrationPipeline, PipelineError};
pub use report::{RunReport, TableOutcome, TableReport};

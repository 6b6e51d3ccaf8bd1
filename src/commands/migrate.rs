// ABOUTME: Migrate command: loads configuration and the table manifest, then runs the pipeline
// ABOUTME: Owns the database connector and object store client for the duration of one run

use crate::config::MigrationConfig;
use crate::database::PostgresConnector;
use crate::manifest::TableList;
use crate::migration::{MigrationPipeline, PhaseSet, RunReport};
use crate::storage::ObjectStoreClient;
use anyhow::{Context, Result};
use std::path::Path;

/// Run the selected phases for every table in the configured manifest
///
/// The object store client is created here but authenticates lazily, so a
/// run that only exports never contacts the store or its token service.
///
/// # Arguments
///
/// * `config_path` - Path to the TOML configuration file
/// * `phases` - Phases to execute, in their fixed order
/// * `show_progress` - Draw a progress bar for each file transfer
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or validated, or if
/// the table manifest cannot be read. Per-table and run-wide failures during
/// the phases are reported through the returned [`RunReport`].
///
/// # Examples
///
/// ```no_run
/// # use std::path::Path;
/// # use stage_migrator::commands::migrate;
/// # use stage_migrator::migration::PhaseSet;
/// # async fn example() -> anyhow::Result<()> {
/// let report = migrate(Path::new("config.toml"), &PhaseSet::all(), true).await?;
/// if report.has_failures() {
///     eprintln!("some tables failed");
/// }
/// # Ok(())
/// # }
/// ```
pub async fn migrate(
    config_path: &Path,
    phases: &PhaseSet,
    show_progress: bool,
) -> Result<RunReport> {
    let config = MigrationConfig::load(config_path).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            config_path.display()
        )
    })?;
    tracing::info!("✓ Loaded configuration from {}", config_path.display());
    tracing::debug!("Configuration: {:?}", config);

    let tables = TableList::load(&config.manifest_path).with_context(|| {
        format!(
            "Failed to load table manifest from {}",
            config.manifest_path.display()
        )
    })?;
    tracing::info!(
        "✓ Found {} table(s) in {}",
        tables.len(),
        config.manifest_path.display()
    );

    let connector = PostgresConnector::new(config.source.clone(), config.target.clone());
    let store = ObjectStoreClient::new(config.store.clone());
    tracing::debug!(
        "Staging bucket '{}' at {}",
        store.bucket(),
        config.store.endpoint
    );

    let pipeline = MigrationPipeline::new(&config, &tables, &connector, &store)
        .with_progress(show_progress);

    Ok(pipeline.run(phases).await)
}

// ABOUTME: Utility functions shared across the migration phases
// ABOUTME: Provides retry logic, display sanitizing, and size/elapsed-time formatting

use std::fmt::Display;
use std::time::Duration;

/// Retry a function with exponential backoff
///
/// Executes an async operation with automatic retry on failure. Each retry doubles
/// the delay (exponential backoff) to handle transient failures gracefully.
///
/// # Arguments
///
/// * `operation` - Async function to retry (FnMut returning Future<Output = Result<T, E>>)
/// * `max_retries` - Maximum number of retry attempts (0 = no retries, just initial attempt)
/// * `initial_delay` - Delay before first retry (doubles each subsequent retry)
///
/// # Returns
///
/// Returns the successful result or the last error after all retries exhausted.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use std::time::Duration;
/// # use stage_migrator::utils::retry_with_backoff;
/// # async fn example() -> Result<()> {
/// let result = retry_with_backoff(
///     || async { Ok::<_, anyhow::Error>("success") },
///     3,  // Try up to 3 times
///     Duration::from_secs(1)  // Start with 1s delay
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries => {
                tracing::warn!(
                    "Operation failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    max_retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                delay *= 2; // Exponential backoff
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sanitize an identifier (table name, object key) for display
///
/// Removes control characters and limits length so that names read from
/// operator-supplied files cannot garble log output.
///
/// # Examples
///
/// ```
/// # use stage_migrator::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\x00name"), "tablename");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
///
/// // Length limit
/// let long_name = "a".repeat(200);
/// assert_eq!(sanitize_identifier(&long_name).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Format bytes into human-readable string
///
/// Converts byte count into appropriate units (B, KB, MB, GB, TB)
/// with one decimal place of precision.
///
/// # Examples
///
/// ```
/// # use stage_migrator::utils::format_bytes;
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(1073741824), "1.0 GB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.1} {}", size, UNITS[unit_idx])
}

/// Format an elapsed run time as `HH:MM:SS`
///
/// Hours are not wrapped at 24, so a two-day run prints as `48:00:00`.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use stage_migrator::utils::format_elapsed;
/// assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
/// assert_eq!(format_elapsed(Duration::from_secs(3725)), "01:02:05");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

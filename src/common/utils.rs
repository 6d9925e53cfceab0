//! Utility functions for minifs

use std::time::Duration;

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Retry with exponential backoff
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    initial_delay: Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut delay = initial_delay;

    for attempt in 0..max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < max_retries => {
                tracing::warn!(
                    "Retry attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}

/// Validate a filename as it appears on the wire.
///
/// Names are single tokens: non-empty, no whitespace, no control characters,
/// and no path separators since storage nodes use them as file names.
pub fn validate_filename(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::Protocol("filename cannot be empty".into()));
    }

    if name.len() > 1024 {
        return Err(crate::Error::Protocol(
            "filename too long (max 1024 bytes)".into(),
        ));
    }

    if name
        .chars()
        .any(|c| c.is_control() || c.is_whitespace() || c == '/' || c == '\\')
        || name == "."
        || name == ".."
    {
        return Err(crate::Error::Protocol(format!(
            "filename contains invalid characters: {:?}",
            name
        )));
    }

    Ok(())
}

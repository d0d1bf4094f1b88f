//! Screenshot evidence of an interaction's result.

use crate::driver::AutomationDriver;
use crate::error::{DriverError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Screenshot saved after a classified interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofRecord {
    /// Path to the PNG file
    pub path: String,

    /// File size in bytes
    pub size_bytes: usize,

    /// SHA-256 of the file contents
    pub sha256: String,

    /// Page URL at capture time
    pub url: String,

    pub captured_at: DateTime<Utc>,
}

/// Save a screenshot of the active window as `<target_id>_<timestamp>.png` in `dir`.
pub async fn capture_proof(
    driver: &dyn AutomationDriver,
    dir: &Path,
    target_id: &str,
) -> Result<ProofRecord> {
    let captured_at = Utc::now();
    let url = driver.current_url().await?;
    let bytes = driver.screenshot().await?;

    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        log::error!("Failed to create proof directory: {}", e);
        DriverError::Other(format!("Failed to create proof directory: {}", e))
    })?;

    let filename = format!(
        "{}_{}.png",
        sanitize(target_id),
        captured_at.format("%Y%m%dT%H%M%S%.3fZ")
    );
    let path = dir.join(filename);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| DriverError::Other(format!("Failed to write screenshot: {}", e)))?;
    log::info!("Proof captured: {}", path.display());

    Ok(ProofRecord {
        path: path.to_string_lossy().to_string(),
        size_bytes: bytes.len(),
        sha256: compute_hash(&bytes),
        url,
        captured_at,
    })
}

/// Compute SHA-256 hash of a byte buffer
fn compute_hash(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(content);
    let hash = hasher.finalize();

    format!("{:x}", hash)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

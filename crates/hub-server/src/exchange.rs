//! Temp-file exchange: layer replies handed over as PNG files.
//!
//! The writer saves `{prefix}_s.png` and renames it to `{prefix}_.png`
//! once complete, so the poller never sees a partial file.

use std::path::PathBuf;
use std::time::Duration;

use crate::HubError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A directory both sides of the exchange agree on.
#[derive(Debug, Clone)]
pub struct TempExchange {
    dir: PathBuf,
}

impl TempExchange {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Final path for `prefix`.
    pub fn path_for(&self, prefix: &str) -> PathBuf {
        self.dir.join(format!("{prefix}_.png"))
    }

    fn staging_path(&self, prefix: &str) -> PathBuf {
        self.dir.join(format!("{prefix}_s.png"))
    }

    /// Writes `png` under `prefix` and returns the final path.
    pub async fn save(&self, prefix: &str, png: &[u8]) -> Result<PathBuf, HubError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let staging = self.staging_path(prefix);
        let target = self.path_for(prefix);
        tokio::fs::write(&staging, png).await?;
        tokio::fs::rename(&staging, &target).await?;
        tracing::debug!(path = %target.display(), bytes = png.len(), "saved exchange file");
        Ok(target)
    }

    /// Polls for the file under `prefix`, then reads and deletes it.
    pub async fn wait_for(&self, prefix: &str, timeout: Duration) -> Result<Vec<u8>, HubError> {
        let path = self.path_for(prefix);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        tracing::warn!(
                            path = %path.display(),
                            "failed to remove exchange file: {e}"
                        );
                    }
                    return Ok(bytes);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(HubError::Timeout(prefix.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

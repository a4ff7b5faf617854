//! Bounded retries for file operations that may race with an external writer.

use std::fs::OpenOptions;
use std::io;

use fs2::FileExt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fixed-delay retry policy for contended file access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Delay between two attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Runs `op` until it succeeds or `attempts` tries have failed, sleeping between tries.
    ///
    /// Returns the last error once the attempts are exhausted.
    pub async fn run<T, F>(&self, what: &str, mut op: F) -> io::Result<T>
    where
        F: FnMut() -> io::Result<T>,
    {
        let mut last_err = io::Error::new(io::ErrorKind::Other, "retry policy allows no attempts");
        for attempt in 1..=self.attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(operation = what, attempt, attempts = self.attempts, error = ?e, "Attempt failed");
                    last_err = e;
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.delay()).await;
            }
        }
        warn!(operation = what, attempts = self.attempts, error = ?last_err, "Giving up after all attempts");
        Err(last_err)
    }

    /// Checks that `path` can be opened and exclusively locked, retrying while another
    /// process holds it. The lock is released again before returning.
    pub async fn try_open(&self, path: &Path) -> bool {
        self.run("open", || {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            // fs2's method, not the std inherent one with a different error type.
            FileExt::try_lock_exclusive(&file)?;
            FileExt::unlock(&file)
        })
        .await
        .is_ok()
    }

    /// Deletes `path` once it can be opened. Returns `false` if the file is still there.
    pub async fn remove_file(&self, path: &Path) -> bool {
        if !path.exists() {
            return true;
        }
        if !self.try_open(path).await {
            return false;
        }
        match std::fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %path.display(), error = ?e, "Failed to delete file");
                false
            }
        }
    }
}

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// File name of the run record inside a run's output directory.
pub const RESULT_FILE: &str = "result.json";
/// File name of the ownership lock inside a run's output directory.
pub const LOCK_FILE: &str = ".leak-quant.lock";

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Outcome of a run as persisted in `result.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: RunStatus,
    /// Leakage rate (kg/h); `null` when no window produced an estimate.
    pub result: Option<f64>,
    pub message: Option<String>,
    /// Seconds since the Unix epoch; absent while running.
    pub finished_at: Option<u64>,
}

impl RunRecord {
    pub fn running() -> Self {
        Self {
            status: RunStatus::Running,
            result: None,
            message: None,
            finished_at: None,
        }
    }

    pub fn completed(result: Option<f64>, message: Option<String>) -> Self {
        Self {
            status: RunStatus::Completed,
            result,
            message,
            finished_at: Some(unix_now()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            result: None,
            message: Some(message.into()),
            finished_at: Some(unix_now()),
        }
    }

    /// Write the record to `dir/result.json`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(RESULT_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        fs::write(&path, json).map_err(|e| EngineError::io(&path, e))?;
        Ok(path)
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(RESULT_FILE);
        let text = fs::read_to_string(&path).map_err(|e| EngineError::io(&path, e))?;
        serde_json::from_str(&text).map_err(|e| EngineError::unreadable(&path, e))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Run guard
// ---------------------------------------------------------------------------

/// Exclusive ownership of a run directory for the lifetime of the value.
///
/// Acquired by creating a lock file that must not already exist; the file
/// is removed on drop, including when the run fails.
#[derive(Debug)]
pub struct RunGuard {
    lock_path: PathBuf,
}

impl RunGuard {
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| EngineError::io(dir, e))?;
        let lock_path = dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(EngineError::InvalidInput(format!(
                    "run already in progress in {}",
                    dir.display()
                )));
            }
            Err(e) => return Err(EngineError::io(&lock_path, e)),
        };
        writeln!(file, "{}", std::process::id()).map_err(|e| EngineError::io(&lock_path, e))?;
        log::debug!("acquired {}", lock_path.display());
        Ok(Self { lock_path })
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            log::warn!("could not remove {}: {e}", self.lock_path.display());
        }
    }
}

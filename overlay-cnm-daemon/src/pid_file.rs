//! Exclusive PID file held for the lifetime of a daemon run.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

/// A PID file owned by this process; removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Creates `path` (mode 0o600, parent 0o700) holding the current PID.
    ///
    /// # Errors
    ///
    /// Fails if the file already exists, whether another instance holds it
    /// or a crashed one left it behind.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)
                .with_context(|| format!("creating PID directory {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => anyhow!(
                    "PID file {} already exists (PID {}); is another instance running?",
                    path.display(),
                    recorded_pid(&path)
                ),
                _ => anyhow::Error::new(e).context(format!("creating PID file {}", path.display())),
            })?;

        let pid = std::process::id();
        // Owned from here on, so a failed write still removes the file.
        let pid_file = Self { path };
        writeln!(file, "{pid}")
            .with_context(|| format!("writing PID file {}", pid_file.path.display()))?;
        info!(pid, path = %pid_file.path.display(), "PID file written");
        Ok(pid_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "PID file removed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove PID file"),
        }
    }
}

fn recorded_pid(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim().to_owned())
        .unwrap_or_else(|_| "unknown".to_owned())
}

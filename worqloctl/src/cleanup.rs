//! Scoped ownership of transient files.
//!
//! Everything registered with a [`CleanupGuard`] is removed when the guard is
//! dropped: on success, on an early `?` return, and when the binary abandons
//! the operation future after an interrupt. Removal is best-effort.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file for removal when the guard drops.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for path in self.paths.drain(..).rev() {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed transient file"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    path = %path.display(),
                    error = %err,
                    "Failed to remove transient file"
                ),
            }
        }
    }
}

/// Marker file held for the duration of a certificate run. Contains the pid
/// of the holder; a marker whose pid is no longer alive is treated as stale
/// and taken over.
#[derive(Debug)]
pub struct RunMarker {
    path: PathBuf,
    _guard: CleanupGuard,
}

impl RunMarker {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) =
            path.parent().filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create {}", parent.display())
            })?;
        }

        match write_marker(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .ok()
                    .and_then(|raw| raw.trim().parse::<u32>().ok());
                if let Some(pid) = holder
                    && pid != std::process::id()
                    && pid_alive(pid)
                {
                    bail!(
                        "another certificate run (pid {pid}) holds {}; wait for it to finish",
                        path.display()
                    );
                }
                warn!(
                    marker = %path.display(),
                    "Taking over stale run marker from an interrupted run"
                );
                fs::remove_file(&path).with_context(|| {
                    format!("failed to remove stale marker {}", path.display())
                })?;
                write_marker(&path).with_context(|| {
                    format!("failed to create marker {}", path.display())
                })?;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to create marker {}", path.display())
                });
            }
        }

        let mut guard = CleanupGuard::new();
        guard.register(&path);
        Ok(Self {
            path,
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_marker(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{}", std::process::id())
}

fn pid_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    if !proc_root.is_dir() {
        // No procfs to ask; assume the holder is gone.
        return false;
    }
    proc_root.join(pid.to_string()).exists()
}

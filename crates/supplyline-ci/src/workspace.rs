//! Per-run filesystem layout.
//!
//! ```text
//! <root>/
//!   .supplyline.lock   exclusively locked for the lifetime of the run
//!   src/               checked-out source tree
//!   scratch/           per-stage tool input and output
//!   artifacts/         sbom.json, vuln.json (kept after the run)
//! ```
//!
//! Dropping the [`RunWorkspace`] removes `src/` and `scratch/` and unlocks
//! the lock file on every exit path, including errors and cancellation. The
//! lock is an OS file lock, so a run that dies without unwinding releases it
//! too; the lock file itself stays in place.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use supplyline_core::{PipelineError, Result};

/// SBOM artifact file name.
pub const SBOM_FILE: &str = "sbom.json";
/// Vulnerability report artifact file name.
pub const VULN_FILE: &str = "vuln.json";

const LOCK_FILE: &str = ".supplyline.lock";

/// Exclusive, self-cleaning run directory.
#[derive(Debug)]
pub struct RunWorkspace {
    root: PathBuf,
    lock: File,
}

impl RunWorkspace {
    /// Claim `root` for one run.
    ///
    /// Fails with [`PipelineError::Workspace`] when another run holds the
    /// lock. Leftovers from an earlier run (source tree, scratch output, stale
    /// artifacts) are removed before the run starts.
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            PipelineError::Workspace(format!("cannot create {}: {e}", root.display()))
        })?;
        let lock_path = root.join(LOCK_FILE);
        let mut lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                PipelineError::Workspace(format!("cannot open {}: {e}", lock_path.display()))
            })?;
        if let Err(e) = lock.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(PipelineError::Workspace(format!(
                    "{} is in use by another run",
                    root.display()
                )));
            }
            return Err(PipelineError::Workspace(format!(
                "cannot lock {}: {e}",
                lock_path.display()
            )));
        }
        lock.set_len(0)?;
        let _ = writeln!(lock, "{}", std::process::id());

        // From here on Drop unlocks if preparation fails.
        let workspace = Self {
            root: root.to_path_buf(),
            lock,
        };
        workspace.prepare()?;
        debug!(root = %workspace.root.display(), "workspace ready");
        Ok(workspace)
    }

    fn prepare(&self) -> Result<()> {
        reset_dir(&self.src_dir())?;
        reset_dir(&self.scratch_dir())?;
        fs::create_dir_all(self.artifacts_dir())?;
        for stale in [self.sbom_path(), self.vuln_path()] {
            match fs::remove_file(&stale) {
                Ok(()) => debug!(path = %stale.display(), "removed stale artifact"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source checkout directory.
    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn sbom_path(&self) -> PathBuf {
        self.artifacts_dir().join(SBOM_FILE)
    }

    pub fn vuln_path(&self) -> PathBuf {
        self.artifacts_dir().join(VULN_FILE)
    }

    /// Fresh, empty `scratch/<name>` directory.
    pub fn stage_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.scratch_dir().join(name);
        reset_dir(&dir)?;
        Ok(dir)
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        for dir in [self.src_dir(), self.scratch_dir()] {
            if let Err(e) = fs::remove_dir_all(&dir) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %dir.display(), error = %e, "failed to clean up workspace");
                }
            }
        }
        if let Err(e) = FileExt::unlock(&self.lock) {
            warn!(root = %self.root.display(), error = %e, "failed to release workspace lock");
        }
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| {
            PipelineError::Workspace(format!("cannot clear {}: {e}", dir.display()))
        })?;
    }
    fs::create_dir_all(dir).map_err(|e| {
        PipelineError::Workspace(format!("cannot create {}: {e}", dir.display()))
    })
}

/// Recursively copy `from` into `to`, skipping top-level entries named in
/// `skip`. Symlinks are recreated, not followed. Returns the number of
/// non-directory entries copied.
pub fn copy_tree(from: &Path, to: &Path, skip: &[&str]) -> Result<u64> {
    fs::create_dir_all(to)?;
    let walker = WalkDir::new(from)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() > 1 || !skip.iter().any(|s| e.file_name() == *s));

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry.path().strip_prefix(from).map_err(|e| {
            PipelineError::Workspace(format!("{}: {e}", entry.path().display()))
        })?;
        let dest = to.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &dest)?;
            copied += 1;
        } else {
            fs::copy(entry.path(), &dest)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    let target = fs::read_link(src)?;
    if dest.symlink_metadata().is_ok() {
        fs::remove_file(dest)?;
    }
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest)?;
    Ok(())
}

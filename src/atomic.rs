// src/atomic.rs
//! Atomic file writes: sibling temp file, flush + fsync, rename into place.
//!
//! A reader of the target path sees either the previous complete content or
//! the new complete content, never a mix.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use rand::Rng;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("target {0} has no file name")]
    InvalidTarget(PathBuf),
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("background write task failed: {0}")]
    Join(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A fully written, synced temp file that has not been renamed yet.
///
/// Dropping it without calling [`StagedWrite::commit`] removes the temp file and
/// leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.tmp
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(mut self) -> Result<PathBuf, WriteError> {
        fs::rename(&self.tmp, &self.target).map_err(io_err(&self.target))?;
        self.committed = true;
        sync_parent(&self.target);
        Ok(self.target.clone())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

fn temp_sibling(target: &Path) -> Result<PathBuf, WriteError> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| WriteError::InvalidTarget(target.to_path_buf()))?;
    let nonce: u32 = rand::rng().random();
    let tmp_name = format!(".{name}.{}.{nonce:08x}.tmp", std::process::id());
    Ok(match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(tmp_name),
        _ => PathBuf::from(tmp_name),
    })
}

/// Write `bytes` to a sibling temp file and fsync it, without renaming.
pub fn stage(path: &Path, bytes: &[u8]) -> Result<StagedWrite, WriteError> {
    let tmp = temp_sibling(path)?;
    let staged = StagedWrite {
        tmp,
        target: path.to_path_buf(),
        committed: false,
    };
    // From here on, an early return drops `staged` and removes the temp file.
    let mut f = File::create(&staged.tmp).map_err(io_err(&staged.tmp))?;
    f.write_all(bytes).map_err(io_err(&staged.tmp))?;
    f.flush().map_err(io_err(&staged.tmp))?;
    f.sync_all().map_err(io_err(&staged.tmp))?;
    Ok(staged)
}

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    stage(path, bytes)?.commit().map(|_| ())
}

/// [`write_atomic`] on the blocking pool.
pub async fn write_atomic_async(path: PathBuf, bytes: Vec<u8>) -> Result<(), WriteError> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|e| WriteError::Join(e.to_string()))?
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

/// `report.docx` -> `report_20250906_090000.docx`.
pub fn timestamped_path(base: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    let stamp = now.format("%Y%m%d_%H%M%S");
    let name = match base.extension() {
        Some(ext) => format!("{stem}_{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{stamp}"),
    };
    base.with_file_name(name)
}

/// Final report bytes bound to their destination. Written exactly once.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn persist(self) -> Result<PathBuf, WriteError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;
        }
        let path = self.path.clone();
        write_atomic_async(self.path, self.bytes).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamped_name_keeps_extension() {
        let now = Local.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        let p = timestamped_path(Path::new("out/report.docx"), now);
        assert_eq!(p, PathBuf::from("out/report_20250906_090000.docx"));
        let p = timestamped_path(Path::new("report"), now);
        assert_eq!(p, PathBuf::from("report_20250906_090000"));
    }

    #[test]
    fn temp_file_is_a_sibling() {
        let tmp = temp_sibling(Path::new("/var/data/report.md")).unwrap();
        assert_eq!(tmp.parent(), Some(Path::new("/var/data")));
        assert!(tmp.file_name().unwrap().to_string_lossy().ends_with(".tmp"));
        assert!(matches!(
            temp_sibling(Path::new("/")),
            Err(WriteError::InvalidTarget(_))
        ));
    }
}

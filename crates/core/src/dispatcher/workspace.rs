//! Working directories for pipelines.

use std::io;
use std::path::{Path, PathBuf};

use super::config::WorkspaceMode;

/// The directories one pipeline writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub request_id: i64,
    pub mode: WorkspaceMode,
    /// Where the fetch tool writes.
    pub workdir: PathBuf,
    /// Where the archive is written.
    pub archive_dir: PathBuf,
}

impl Workspace {
    pub fn for_request(
        mode: WorkspaceMode,
        work_root: &Path,
        scratch_root: &Path,
        request_id: i64,
    ) -> Self {
        let (workdir, archive_dir) = match mode {
            WorkspaceMode::PerRequest => {
                let name = format!("request-{}", request_id);
                (work_root.join(&name), scratch_root.join(&name))
            }
            WorkspaceMode::Shared => (work_root.to_path_buf(), scratch_root.to_path_buf()),
        };
        Self {
            request_id,
            mode,
            workdir,
            archive_dir,
        }
    }

    /// Create both directories.
    pub async fn prepare(&self) -> Result<(), (PathBuf, io::Error)> {
        for dir in [&self.workdir, &self.archive_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| (dir.clone(), e))?;
        }
        Ok(())
    }

    /// Remove everything this pipeline produced.
    ///
    /// Safe to call repeatedly; missing paths count as clean. Returns every
    /// path that could not be removed.
    pub async fn cleanup(&self) -> Vec<(PathBuf, io::Error)> {
        let mut failures = Vec::new();
        for dir in [&self.workdir, &self.archive_dir] {
            let result = match self.mode {
                WorkspaceMode::PerRequest => remove_dir_if_exists(dir).await,
                WorkspaceMode::Shared => clear_dir(dir).await,
            };
            if let Err(e) = result {
                failures.push((dir.clone(), e));
            }
        }
        failures
    }
}

async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

/// Delete the contents of `path`, keeping the directory.
async fn clear_dir(path: &Path) -> io::Result<()> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let entry_path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&entry_path).await
        } else {
            tokio::fs::remove_file(&entry_path).await
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }
    Ok(())
}

//! Finding the media folder a fetch produced.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Errors raised while looking for an artifact.
#[derive(Debug, Error)]
pub enum LocatorError {
    /// The fetch finished but left nothing recognisable behind.
    #[error("No downloaded media found in {}", workdir.display())]
    ArtifactNotFound { workdir: PathBuf },

    /// The working directory could not be read.
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How to pick the artifact folder inside a working directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorPolicy {
    /// First directory, in sorted walk order, holding a media file.
    #[default]
    Flat,
    /// Newest top-level directory, then the newest directory inside it.
    Freshness,
}

impl LocatorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorPolicy::Flat => "flat",
            LocatorPolicy::Freshness => "freshness",
        }
    }
}

/// Extensions recognised as media by default.
pub fn default_media_extensions() -> Vec<String> {
    ["m4a", "flac", "mp3", "aac", "alac", "wav", "ogg", "opus"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Locates the artifact folder left by the fetch tool.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    policy: LocatorPolicy,
    extensions: Vec<String>,
}

impl Default for ArtifactLocator {
    fn default() -> Self {
        Self::new(LocatorPolicy::default(), default_media_extensions())
    }
}

impl ArtifactLocator {
    pub fn new(policy: LocatorPolicy, extensions: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self { policy, extensions }
    }

    pub fn policy(&self) -> LocatorPolicy {
        self.policy
    }

    /// Find the artifact folder under `workdir`.
    ///
    /// Walks the filesystem synchronously; call from a blocking context.
    pub fn locate(&self, workdir: &Path) -> Result<PathBuf, LocatorError> {
        let found = match self.policy {
            LocatorPolicy::Flat => self.locate_flat(workdir),
            LocatorPolicy::Freshness => self.locate_freshest(workdir)?,
        };

        match found {
            Some(path) => {
                debug!("Located artifact {}", path.display());
                Ok(path)
            }
            None => Err(LocatorError::ArtifactNotFound {
                workdir: workdir.to_path_buf(),
            }),
        }
    }

    fn is_media(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions.iter().any(|known| *known == e)
            })
            .unwrap_or(false)
    }

    fn dir_has_media(&self, dir: &Path) -> bool {
        match fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).any(|entry| {
                entry.file_type().map(|t| t.is_file()).unwrap_or(false)
                    && self.is_media(&entry.path())
            }),
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                false
            }
        }
    }

    fn locate_flat(&self, workdir: &Path) -> Option<PathBuf> {
        WalkDir::new(workdir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_dir())
            .find(|entry| self.dir_has_media(entry.path()))
            .map(|entry| entry.into_path())
    }

    fn locate_freshest(&self, workdir: &Path) -> Result<Option<PathBuf>, LocatorError> {
        let Some(top) = newest_subdir(workdir)? else {
            return Ok(None);
        };
        newest_subdir(&top)
    }
}

fn entry_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Newest direct subdirectory; ties go to the greater name.
fn newest_subdir(dir: &Path) -> Result<Option<PathBuf>, LocatorError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LocatorError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    Ok(entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .max_by(|a, b| {
            entry_time(a)
                .cmp(&entry_time(b))
                .then_with(|| a.file_name().cmp(&b.file_name()))
        }))
}

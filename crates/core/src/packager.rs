//! Packaging a located artifact folder into a single archive.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Errors raised while producing an archive.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive task failed: {0}")]
    Task(String),
}

/// Configuration for packaging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagerConfig {
    /// Directory archives are written to.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Deflate level (0-9). Unset uses the library default.
    #[serde(default)]
    pub compression_level: Option<i64>,
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("cadenza-archives")
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            compression_level: None,
        }
    }
}

/// A finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Turns a folder into one file.
#[async_trait]
pub trait Packager: Send + Sync {
    /// Archive `folder` into `output_dir`, returning the archive.
    async fn package(&self, folder: &Path, output_dir: &Path)
        -> Result<PackagedArchive, PackageError>;
}

/// Deflate zip packager.
///
/// The archive is named after the folder and its entries are rooted at the
/// folder's basename, so `Album/01.m4a` unpacks into `Album/`.
#[derive(Debug, Clone, Default)]
pub struct ZipPackager {
    compression_level: Option<i64>,
}

impl ZipPackager {
    pub fn new(config: &PackagerConfig) -> Self {
        Self {
            compression_level: config.compression_level,
        }
    }

    /// Where the archive for `folder` lands inside `output_dir`.
    pub fn archive_path(folder: &Path, output_dir: &Path) -> Option<PathBuf> {
        let base = folder.file_name()?;
        let mut name = base.to_os_string();
        name.push(".zip");
        Some(output_dir.join(name))
    }
}

fn entry_name(base: &str, relative: &Path) -> String {
    let mut name = base.to_string();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            name.push('/');
            name.push_str(&part.to_string_lossy());
        }
    }
    name
}

fn write_zip(
    folder: &Path,
    archive: &Path,
    compression_level: Option<i64>,
) -> Result<u64, PackageError> {
    if !folder.is_dir() {
        return Err(PackageError::NotADirectory {
            path: folder.to_path_buf(),
        });
    }
    let base = folder
        .file_name()
        .map(|b| b.to_string_lossy().into_owned())
        .ok_or_else(|| PackageError::NotADirectory {
            path: folder.to_path_buf(),
        })?;

    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(archive) {
        Ok(()) => debug!("Removed stale archive {}", archive.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(compression_level);
    let mut zip = ZipWriter::new(BufWriter::new(File::create(archive)?));

    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(folder)
            .map_err(io::Error::other)?;
        let name = entry_name(&base, relative);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut zip)?;
        }
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    drop(writer);

    Ok(fs::metadata(archive)?.len())
}

#[async_trait]
impl Packager for ZipPackager {
    async fn package(
        &self,
        folder: &Path,
        output_dir: &Path,
    ) -> Result<PackagedArchive, PackageError> {
        let archive =
            Self::archive_path(folder, output_dir).ok_or_else(|| PackageError::NotADirectory {
                path: folder.to_path_buf(),
            })?;

        let folder_owned = folder.to_path_buf();
        let archive_owned = archive.clone();
        let level = self.compression_level;
        let size_bytes =
            tokio::task::spawn_blocking(move || write_zip(&folder_owned, &archive_owned, level))
                .await
                .map_err(|e| PackageError::Task(e.to_string()))??;

        info!(
            "Created archive {} ({} bytes)",
            archive.display(),
            size_bytes
        );
        Ok(PackagedArchive {
            path: archive,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn make_album(root: &Path) -> PathBuf {
        let album = root.join("Abbey Road");
        fs::create_dir_all(album.join("Artwork")).unwrap();
        fs::write(album.join("01 Come Together.m4a"), b"track one").unwrap();
        fs::write(album.join("Artwork/cover.jpg"), b"jpeg").unwrap();
        album
    }

    #[test]
    fn test_archive_path() {
        let path = ZipPackager::archive_path(Path::new("/w/Abbey Road"), Path::new("/tmp/s"));
        assert_eq!(path, Some(PathBuf::from("/tmp/s/Abbey Road.zip")));
        assert_eq!(ZipPackager::archive_path(Path::new("/"), Path::new("/tmp")), None);
    }

    #[tokio::test]
    async fn test_package_roots_entries_at_folder_name() {
        let temp = TempDir::new().unwrap();
        let album = make_album(temp.path());
        let scratch = temp.path().join("scratch");

        let archive = ZipPackager::default()
            .package(&album, &scratch)
            .await
            .unwrap();
        assert_eq!(archive.path, scratch.join("Abbey Road.zip"));
        assert!(archive.size_bytes > 0);

        let mut zip = ZipArchive::new(File::open(&archive.path).unwrap()).unwrap();
        let names: Vec<String> = zip.file_names().map(String::from).collect();
        assert!(names.contains(&"Abbey Road/01 Come Together.m4a".to_string()));
        assert!(names.contains(&"Abbey Road/Artwork/cover.jpg".to_string()));

        let mut contents = String::new();
        zip.by_name("Abbey Road/01 Come Together.m4a")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "track one");
    }

    #[tokio::test]
    async fn test_package_replaces_existing_archive() {
        let temp = TempDir::new().unwrap();
        let album = make_album(temp.path());
        let scratch = temp.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        fs::write(scratch.join("Abbey Road.zip"), b"not a zip").unwrap();

        let archive = ZipPackager::default()
            .package(&album, &scratch)
            .await
            .unwrap();
        assert!(ZipArchive::new(File::open(&archive.path).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_package_missing_folder() {
        let temp = TempDir::new().unwrap();
        let result = ZipPackager::default()
            .package(&temp.path().join("nope"), temp.path())
            .await;
        assert!(matches!(result, Err(PackageError::NotADirectory { .. })));
    }
}

//! Mock packager, publisher and notifier for testing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::dispatcher::{Notice, NoticeKind, Notifier};
use crate::packager::{PackageError, PackagedArchive, Packager};
use crate::publisher::{PublishError, Publisher};

/// Mock implementation of the Packager trait.
///
/// Writes a small placeholder file named after the folder instead of a real
/// archive.
#[derive(Debug, Default)]
pub struct MockPackager {
    folders: Arc<RwLock<Vec<PathBuf>>>,
    next_error: Arc<RwLock<Option<PackageError>>>,
}

impl MockPackager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folders that were packaged, in order.
    pub async fn packaged_folders(&self) -> Vec<PathBuf> {
        self.folders.read().await.clone()
    }

    pub async fn set_next_error(&self, error: PackageError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl Packager for MockPackager {
    async fn package(&self, folder: &Path, output_dir: &Path) -> Result<PackagedArchive, PackageError> {
        self.folders.write().await.push(folder.to_path_buf());
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        tokio::fs::create_dir_all(output_dir).await?;
        let path = output_dir.join(format!("{}.zip", name));
        tokio::fs::write(&path, b"mock archive").await?;
        Ok(PackagedArchive {
            path,
            size_bytes: 12,
        })
    }
}

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    pub archive: PathBuf,
    /// Whether the archive existed when publish was called.
    pub existed: bool,
}

/// Mock implementation of the Publisher trait.
///
/// Returns `https://gofile.io/d/mock-<n>` for the n-th publish.
#[derive(Debug, Default)]
pub struct MockPublisher {
    calls: Arc<RwLock<Vec<RecordedPublish>>>,
    next_error: Arc<RwLock<Option<PublishError>>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded_publishes(&self) -> Vec<RecordedPublish> {
        self.calls.read().await.clone()
    }

    pub async fn set_next_error(&self, error: PublishError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, archive: &Path) -> Result<String, PublishError> {
        let n = {
            let mut calls = self.calls.write().await;
            calls.push(RecordedPublish {
                archive: archive.to_path_buf(),
                existed: archive.exists(),
            });
            calls.len()
        };
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        Ok(format!("https://gofile.io/d/mock-{}", n))
    }
}

/// Notifier that keeps every notice for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Arc<RwLock<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notices(&self) -> Vec<Notice> {
        self.notices.read().await.clone()
    }

    /// Notice kinds sent for one request, in order.
    pub async fn kinds_for(&self, request_id: i64) -> Vec<NoticeKind> {
        self.notices
            .read()
            .await
            .iter()
            .filter(|n| n.request_id == request_id)
            .map(|n| n.kind.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: Notice) {
        self.notices.write().await.push(notice);
    }
}

//! Mock fetcher for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

use crate::fetcher::{FetchError, Fetcher, TrackEntry, TrackListing};
use crate::request::Selection;

/// A recorded fetch invocation for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    pub url: String,
    /// What the tool would have received on stdin.
    pub descriptor: Option<String>,
    pub workdir: PathBuf,
}

/// Mock implementation of the Fetcher trait.
///
/// By default every fetch succeeds and writes `Artist/Album/01 Track.m4a`
/// into the working directory.
///
/// # Example
///
/// ```rust,ignore
/// use cadenza_core::testing::MockFetcher;
///
/// let fetcher = MockFetcher::new();
/// fetcher.fail_url("https://music.apple.com/us/album/x/1", Some(1), "auth error").await;
/// fetcher.pause().await;
/// // ... submit requests, observe them in processing ...
/// fetcher.resume();
/// ```
#[derive(Debug)]
pub struct MockFetcher {
    calls: Arc<RwLock<Vec<RecordedFetch>>>,
    /// If set, the next fetch fails with this error.
    next_error: Arc<RwLock<Option<FetchError>>>,
    /// Per-URL failures: exit code and stderr.
    failures: Arc<RwLock<HashMap<String, (Option<i32>, String)>>>,
    /// Files written relative to the workdir on success.
    layout: Arc<RwLock<Vec<String>>>,
    delay_ms: Arc<RwLock<u64>>,
    listing: Arc<RwLock<Option<TrackListing>>>,
    gate: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            failures: Arc::new(RwLock::new(HashMap::new())),
            layout: Arc::new(RwLock::new(vec!["Artist/Album/01 Track.m4a".to_string()])),
            delay_ms: Arc::new(RwLock::new(0)),
            listing: Arc::new(RwLock::new(Some(sample_listing(3)))),
            gate,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get all recorded fetches.
    pub async fn recorded_fetches(&self) -> Vec<RecordedFetch> {
        self.calls.read().await.clone()
    }

    pub async fn fetch_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Configure the next fetch to fail with the given error.
    pub async fn set_next_error(&self, error: FetchError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make every fetch of `url` exit unsuccessfully.
    pub async fn fail_url(&self, url: &str, exit_code: Option<i32>, stderr: &str) {
        self.failures
            .write()
            .await
            .insert(url.to_string(), (exit_code, stderr.to_string()));
    }

    /// Files to create on success. An empty layout simulates a tool that
    /// exits 0 without producing anything.
    pub async fn set_layout(&self, files: Vec<String>) {
        *self.layout.write().await = files;
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay_ms.write().await = delay.as_millis() as u64;
    }

    /// Set the listing returned by `track_listing`; `None` makes it fail.
    pub async fn set_listing(&self, listing: Option<TrackListing>) {
        *self.listing.write().await = listing;
    }

    /// Hold every fetch until [`resume`](Self::resume) is called.
    pub async fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Fetches running right now.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that ever ran at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn wait_for_gate(&self) {
        let mut rx = self.gate.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    async fn run(&self, url: &str, workdir: &Path) -> Result<(), FetchError> {
        self.wait_for_gate().await;

        let delay = *self.delay_ms.read().await;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        if let Some((code, stderr)) = self.failures.read().await.get(url).cloned() {
            return Err(FetchError::failed(code, stderr));
        }

        for file in self.layout.read().await.iter() {
            let path = workdir.join(file);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, b"mock media").await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, url: &str, selection: &Selection, workdir: &Path) -> Result<(), FetchError> {
        self.calls.write().await.push(RecordedFetch {
            url: url.to_string(),
            descriptor: selection.descriptor(),
            workdir: workdir.to_path_buf(),
        });

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let result = self.run(url, workdir).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn track_listing(&self, _url: &str) -> Result<TrackListing, FetchError> {
        self.listing
            .read()
            .await
            .clone()
            .ok_or_else(|| FetchError::failed(Some(1), "album not found"))
    }
}

/// A listing with `tracks` numbered entries.
pub fn sample_listing(tracks: u32) -> TrackListing {
    TrackListing {
        title: "Mock Album".to_string(),
        artist: "Mock Artist".to_string(),
        tracks: (1..=tracks)
            .map(|index| TrackEntry {
                index,
                title: format!("Track {}", index),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TrackSelection;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_default_fetch_writes_layout() {
        let temp = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        fetcher
            .fetch("https://x", &Selection::Full, temp.path())
            .await
            .unwrap();

        assert!(temp.path().join("Artist/Album/01 Track.m4a").exists());
        let calls = fetcher.recorded_fetches().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].descriptor, None);
    }

    #[tokio::test]
    async fn test_records_descriptor_and_failures() {
        let temp = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.fail_url("https://x", Some(1), "auth error").await;
        let selection = Selection::Partial {
            tracks: TrackSelection::Indices(vec![1, 3]),
        };

        let err = fetcher.fetch("https://x", &selection, temp.path()).await.unwrap_err();
        assert!(err.to_string().contains("auth error"));
        assert_eq!(
            fetcher.recorded_fetches().await[0].descriptor.as_deref(),
            Some("1,3")
        );
    }

    #[tokio::test]
    async fn test_pause_holds_fetches() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.pause().await;

        let task = {
            let fetcher = Arc::clone(&fetcher);
            let dir = temp.path().to_path_buf();
            tokio::spawn(async move { fetcher.fetch("https://x", &Selection::Full, &dir).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.active(), 1);
        assert!(!task.is_finished());

        fetcher.resume();
        task.await.unwrap().unwrap();
        assert_eq!(fetcher.active(), 0);
        assert_eq!(fetcher.max_active(), 1);
    }
}

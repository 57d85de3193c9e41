//! Trait definitions for the fetcher module.

use async_trait::async_trait;
use std::path::Path;

use super::error::FetchError;
use super::tracklist::TrackListing;
use crate::request::Selection;

/// Something that can materialise a collection into a working directory.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the name of this fetcher implementation.
    fn name(&self) -> &str;

    /// Download `url` into `workdir`.
    ///
    /// Returns once the download has finished. Success means the tool
    /// reported success, not that an artifact exists.
    async fn fetch(&self, url: &str, selection: &Selection, workdir: &Path)
        -> Result<(), FetchError>;

    /// List the tracks of the collection at `url` without downloading.
    async fn track_listing(&self, url: &str) -> Result<TrackListing, FetchError>;
}

//! Testing utilities and mock implementations.
//!
//! Mocks stand in for the external fetch and upload tools so the dispatcher
//! and the HTTP API can be exercised end to end without them.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadenza_core::testing::{MockFetcher, MockPackager, MockPublisher, RecordingNotifier};
//!
//! let fetcher = MockFetcher::new();
//! fetcher.fail_url(&fixtures::album_url(1), Some(1), "auth error").await;
//! ```

mod mock_fetcher;
mod mock_stages;

pub use mock_fetcher::{sample_listing, MockFetcher, RecordedFetch};
pub use mock_stages::{MockPackager, MockPublisher, RecordedPublish, RecordingNotifier};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::request::{CreateRequest, Selection, TrackSelection};

    /// A URL that passes the default URL rules.
    pub fn album_url(n: u32) -> String {
        format!("https://music.apple.com/us/album/mock-album/{}", 1000 + n)
    }

    /// A full download request for user 1 in chat 10.
    pub fn full_request(url: &str) -> CreateRequest {
        CreateRequest {
            user_id: 1,
            chat_id: 10,
            url: url.to_string(),
            selection: Selection::Full,
        }
    }

    /// A partial download request for the given 1-based tracks.
    pub fn partial_request(url: &str, tracks: &[u32]) -> CreateRequest {
        CreateRequest {
            user_id: 1,
            chat_id: 10,
            url: url.to_string(),
            selection: Selection::Partial {
                tracks: TrackSelection::Indices(tracks.to_vec()),
            },
        }
    }

    /// Same request, different owner.
    pub fn owned_by(mut request: CreateRequest, user_id: i64) -> CreateRequest {
        request.user_id = user_id;
        request.chat_id = user_id * 10;
        request
    }
}

//! Invocation of the external media fetch tool.
//!
//! The tool is a black box: the fetcher only relies on its exit status,
//! its standard streams and the directory it writes into.

mod config;
mod error;
mod subprocess;
mod tracklist;
mod traits;

pub use config::FetcherConfig;
pub use error::FetchError;
pub use subprocess::SubprocessFetcher;
pub use tracklist::{parse_track_listing, TrackEntry, TrackListing};
pub use traits::Fetcher;

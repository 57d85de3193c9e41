//! Durable queue of download requests and their lifecycle.

mod sqlite_store;
mod store;
mod types;
mod validate;

pub(crate) use sqlite_store::{format_timestamp, parse_timestamp};
pub use sqlite_store::SqliteRequestStore;
pub use store::{
    CreateRequest, RequestFilter, RequestStore, RequestStoreError, StatusUpdate, UpdateOutcome,
};
pub use types::{Request, RequestStatus, Selection, TrackSelection};
pub use validate::{UrlRules, ValidationError};

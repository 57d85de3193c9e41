//! Append-only history of everything that happens to requests.
//!
//! Events are emitted through a cheap [`AuditHandle`] and written to an
//! [`AuditStore`] by a single background [`AuditWriter`].

mod events;
mod sqlite;
mod store;
mod writer;

pub use events::*;
pub use sqlite::*;
pub use store::*;
pub use writer::*;

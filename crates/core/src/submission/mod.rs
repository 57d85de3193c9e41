//! User-facing submission commands and pending track selections.

mod pending;
mod service;

pub use pending::{
    PendingSelection, PendingSelectionError, PendingSelectionStore, SqlitePendingSelectionStore,
};
pub use service::{SubmissionConfig, SubmissionError, SubmissionService};

//! Request dispatcher.
//!
//! A single drain loop admits queued requests in submission order while
//! keeping at most `max_concurrent` of them in processing, and runs each
//! admitted request through fetch, locate, package and publish.

mod config;
mod notifier;
mod pipeline;
mod runner;
mod types;
mod workspace;

pub use config::{DispatcherConfig, WorkspaceMode};
pub use notifier::{FanoutNotifier, LogNotifier, Notice, NoticeKind, Notifier};
pub use pipeline::PipelineStages;
pub use runner::{DispatchSignal, Dispatcher, INTERRUPTED_MESSAGE};
pub use types::{DispatcherError, DispatcherStatus, PipelineError, PipelineOutcome};
pub use workspace::Workspace;

//! HTTP front end of the cadenza download queue.

pub mod api;
pub mod metrics;
pub mod state;

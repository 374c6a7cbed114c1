//! Lead fan-out and completion tracking.
//!
//! A project's lead source is split into one lead per row, each lead is
//! processed by an external batch job, and once every lead has reported back
//! a single report is delivered to the project's recipient.

pub mod batch;
pub mod config;
pub mod error;
pub mod http;
pub mod ingest;
pub mod notify;
pub mod project;
pub mod state;
pub mod storage;
pub mod tracker;
pub mod video;
pub mod worker;

pub use config::Config;
pub use error::AppError;
pub use state::AppState;

pub mod client;

pub use client::{BatchJobSettings, BatchScheduler, HttpBatchClient, SubmittedJob};

pub mod database;
pub mod leads;
pub mod projects;
pub mod store;

pub use database::Database;
pub use leads::{LeadOutcome, LeadRow, OutcomeRecord, PublishClaim};
pub use projects::{NotificationState, ProjectRow};
pub use store::{RecordStore, SqliteStore, StoreFuture};

pub mod completion;
pub mod publisher;
pub mod watchdog;

pub use completion::{CompletionEvent, CompletionOutcome, CompletionTracker, FAILURE_MARKER};
pub use publisher::{PassthroughPublisher, PublishRequest, ResultPublisher};
pub use watchdog::{Redelivery, StalledProject, Watchdog};

pub mod aggregator;
pub mod mailer;
pub mod report;

pub use aggregator::{Aggregator, Finalization};
pub use mailer::{Notifier, ReportEmail, SendGridNotifier};
pub use report::{render_report, ReportArchive};

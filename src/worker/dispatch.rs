//! Routes transport messages to their handlers.
//!
//! The transport redelivers anything that is not acknowledged, so the only
//! decision made here is whether a failure is worth another attempt.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::AppError;
use crate::ingest::Ingestor;
use crate::tracker::CompletionTracker;
use crate::worker::limiter::HandlerLimiter;
use crate::worker::messages::Message;

/// What the transport should do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Handled; delete it.
    Ack,
    /// Transient failure; redeliver.
    Retry,
    /// Permanent failure; drop it.
    Discard,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Retry => "retry",
            Disposition::Discard => "discard",
        }
    }

    fn from_error(kind: &str, err: &AppError) -> Self {
        if err.is_retryable() {
            warn!(kind, error = %err, "[WORKER] Handler failed, will retry");
            Disposition::Retry
        } else {
            error!(kind, error = %err, "[WORKER] Handler failed permanently, discarding");
            Disposition::Discard
        }
    }
}

pub struct Dispatcher {
    ingestor: Arc<Ingestor>,
    tracker: Arc<CompletionTracker>,
    limiter: HandlerLimiter,
}

impl Dispatcher {
    pub fn new(
        ingestor: Arc<Ingestor>,
        tracker: Arc<CompletionTracker>,
        limiter: HandlerLimiter,
    ) -> Self {
        Self {
            ingestor,
            tracker,
            limiter,
        }
    }

    /// Decodes and handles one message body.
    pub async fn dispatch(&self, body: &str) -> Disposition {
        let message = match Message::decode(body) {
            Ok(message) => message,
            Err(err) => return Disposition::from_error("unknown", &err),
        };

        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(err) => return Disposition::from_error(message.kind(), &err),
        };

        let kind = message.kind();
        let result = match &message {
            Message::Ingest(request) => self.ingestor.ingest(request).await.map(|report| {
                debug!(
                    total = report.total_rows,
                    duplicate = report.duplicate,
                    "[WORKER] Ingest handled"
                );
            }),
            Message::Completion(event) => self.tracker.handle(event).await.map(|outcome| {
                debug!(?outcome, "[WORKER] Completion handled");
            }),
        };

        match result {
            Ok(()) => Disposition::Ack,
            Err(err) => Disposition::from_error(kind, &err),
        }
    }

    /// Handles a batch concurrently, bounded by the limiter.
    ///
    /// Dispositions are returned in input order.
    pub async fn dispatch_batch<S: AsRef<str>>(&self, bodies: &[S]) -> Vec<Disposition> {
        join_all(bodies.iter().map(|body| self.dispatch(body.as_ref()))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fanout::tests::{FakeScheduler, FakeSource};
    use crate::ingest::IngestOptions;
    use crate::notify::aggregator::tests::FakeNotifier;
    use crate::notify::Aggregator;
    use crate::storage::{Database, NotificationState, ProjectRow, RecordStore, SqliteStore};
    use crate::tracker::PassthroughPublisher;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<SqliteStore>,
        notifier: Arc<FakeNotifier>,
        dispatcher: Dispatcher,
    }

    async fn fixture(content: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::init(dir.path().join("worker.db")).await.unwrap();
        let store = Arc::new(SqliteStore::new(Arc::new(db)));
        store
            .save_project(&ProjectRow::new("p", "owner@example.com", "t.mp4", "leads.csv", None))
            .await
            .unwrap();

        let notifier = Arc::new(FakeNotifier::default());
        let aggregator = Arc::new(Aggregator::new(store.clone(), notifier.clone(), None, 300));
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            Arc::new(FakeSource::with("leads.csv", content)),
            Arc::new(FakeScheduler::default()),
            aggregator.clone(),
            IngestOptions::default(),
        ));
        let tracker = Arc::new(CompletionTracker::new(
            store.clone(),
            Arc::new(PassthroughPublisher),
            aggregator,
        ));

        Fixture {
            _dir: dir,
            store,
            notifier,
            dispatcher: Dispatcher::new(ingestor, tracker, HandlerLimiter::new(4).unwrap()),
        }
    }

    const INGEST: &str = r#"{"kind":"ingest","projectId":"p","recipient":"owner@example.com","templateVideoKey":"t.mp4","spreadsheetKey":"leads.csv"}"#;

    fn completion(lead_id: &str) -> String {
        format!(
            r#"{{"kind":"completion","leadId":"{lead_id}","success":true,"resultRef":"results/{lead_id}.mp4"}}"#
        )
    }

    #[tokio::test]
    async fn test_full_flow_through_messages() {
        let f = fixture("name,title\na,A\nb,B\nc,C\n").await;
        assert_eq!(f.dispatcher.dispatch(INGEST).await, Disposition::Ack);

        let mut bodies: Vec<String> = f
            .store
            .list_leads("p")
            .await
            .unwrap()
            .iter()
            .map(|lead| completion(&lead.id))
            .collect();
        // Redelivered copy of the first event
        bodies.push(bodies[0].clone());

        let dispositions = f.dispatcher.dispatch_batch(&bodies).await;
        assert_eq!(dispositions[1..3], [Disposition::Ack, Disposition::Ack]);
        // One copy of the first event may be told to retry while the other publishes
        let copies = [dispositions[0], dispositions[3]];
        assert!(copies.contains(&Disposition::Ack));
        assert!(copies
            .iter()
            .all(|d| matches!(d, Disposition::Ack | Disposition::Retry)));
        assert_eq!(f.dispatcher.dispatch(&bodies[0]).await, Disposition::Ack);

        let project = f.store.get_project("p").await.unwrap();
        assert_eq!(project.processed_lead_count, 3);
        assert_eq!(project.notification_state, NotificationState::Delivered);
        assert_eq!(f.notifier.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_discarded() {
        let f = fixture("name,title\na,A\n").await;

        assert_eq!(f.dispatcher.dispatch("{oops").await, Disposition::Discard);
        assert_eq!(
            f.dispatcher.dispatch(&completion("no-such-lead")).await,
            Disposition::Discard
        );
        let missing_ref = r#"{"kind":"completion","leadId":"x","success":true}"#;
        assert_eq!(f.dispatcher.dispatch(missing_ref).await, Disposition::Discard);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let db = Database::init(dir.path().join("retry.db")).await.unwrap();
        let store = Arc::new(SqliteStore::new(Arc::new(db)));
        store
            .save_project(&ProjectRow::new("p", "owner@example.com", "t.mp4", "leads.csv", None))
            .await
            .unwrap();

        let notifier = Arc::new(FakeNotifier::failing(1));
        let aggregator = Arc::new(Aggregator::new(store.clone(), notifier.clone(), None, 300));
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            Arc::new(FakeSource::with("leads.csv", "name,title\na,A\n")),
            Arc::new(FakeScheduler::default()),
            aggregator.clone(),
            IngestOptions::default(),
        ));
        let tracker = Arc::new(CompletionTracker::new(
            store.clone(),
            Arc::new(PassthroughPublisher),
            aggregator,
        ));
        let dispatcher = Dispatcher::new(ingestor, tracker, HandlerLimiter::new(1).unwrap());

        assert_eq!(dispatcher.dispatch(INGEST).await, Disposition::Ack);
        let lead = store.list_leads("p").await.unwrap().remove(0);
        let body = completion(&lead.id);

        assert_eq!(dispatcher.dispatch(&body).await, Disposition::Retry);
        assert_eq!(dispatcher.dispatch(&body).await, Disposition::Ack);

        let project = store.get_project("p").await.unwrap();
        assert_eq!(project.processed_lead_count, 1);
        assert_eq!(project.notification_state, NotificationState::Delivered);
        assert_eq!(notifier.sent_count(), 1);
    }

    #[test]
    fn test_disposition_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Disposition::Retry).unwrap(), "\"retry\"");
        assert_eq!(Disposition::Discard.as_str(), "discard");
    }
}

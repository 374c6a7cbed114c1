//! Transport message envelope.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::ingest::IngestRequest;
use crate::tracker::CompletionEvent;

/// One message from the transport, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    Ingest(IngestRequest),
    Completion(CompletionEvent),
}

impl Message {
    /// Decodes a message body. Anything undecodable is malformed.
    pub fn decode(body: &str) -> Result<Self, AppError> {
        serde_json::from_str(body.trim())
            .map_err(|e| AppError::MalformedMessage(format!("Undecodable message: {e}")))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ingest(_) => "ingest",
            Message::Completion(_) => "completion",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_completion() {
        let body = r#"{"kind":"completion","leadId":"l1","success":true,"resultRef":"results/p/l1.mp4"}"#;
        match Message::decode(body).unwrap() {
            Message::Completion(event) => {
                assert_eq!(event.lead_id, "l1");
                assert!(event.success);
                assert_eq!(event.result_ref.as_deref(), Some("results/p/l1.mp4"));
                assert!(event.folder_uri.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_ingest() {
        let body = r#"{"kind":"ingest","projectId":"p","recipient":"a@b.c","templateVideoKey":"t.mp4","spreadsheetKey":"s.csv"}"#;
        let message = Message::decode(body).unwrap();
        assert_eq!(message.kind(), "ingest");
        assert!(matches!(message, Message::Ingest(ref r) if r.spreadsheet_key == "s.csv"));
    }

    #[test]
    fn test_decode_rejects_unknown_kind_and_garbage() {
        for body in [
            r#"{"kind":"refund","leadId":"l1"}"#,
            r#"{"leadId":"l1","success":false}"#,
            "not json",
            r#"{"kind":"completion","success":true}"#,
        ] {
            assert!(matches!(
                Message::decode(body),
                Err(AppError::MalformedMessage(_))
            ));
        }
    }
}

//! Turns a lead's produced artifact into the link recorded on the lead.

use std::future::Future;
use std::pin::Pin;

use crate::error::AppError;

/// A successfully produced artifact awaiting publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub lead_id: String,
    /// Display title, used as the published name.
    pub title: String,
    /// Storage reference reported by the external processor.
    pub result_ref: String,
    /// Destination folder on the video host, when one was provisioned.
    pub folder_uri: Option<String>,
}

/// Publishes a produced artifact and returns the outcome link.
pub trait ResultPublisher: Send + Sync {
    fn publish<'a>(
        &'a self,
        request: &'a PublishRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>>;
}

/// Records the artifact reference itself as the outcome link.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPublisher;

impl ResultPublisher for PassthroughPublisher {
    fn publish<'a>(
        &'a self,
        request: &'a PublishRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
        Box::pin(async move { Ok(request.result_ref.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_returns_result_ref() {
        let request = PublishRequest {
            lead_id: "l1".to_string(),
            title: "Hello".to_string(),
            result_ref: "results/p/l1.mp4".to_string(),
            folder_uri: None,
        };
        let link = PassthroughPublisher.publish(&request).await.unwrap();
        assert_eq!(link, "results/p/l1.mp4");
    }
}

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use corelib::{FetchOutcome, IngestError};

/// Handle to an in-flight request's eventual outcome. Returned by
/// `RequestGovernor::submit` instead of requiring the caller to pass in a
/// callback.
pub struct PendingHandle {
    receiver: oneshot::Receiver<Result<FetchOutcome, IngestError>>,
}

impl PendingHandle {
    pub fn new(receiver: oneshot::Receiver<Result<FetchOutcome, IngestError>>) -> Self {
        Self { receiver }
    }

    /// Waits for the outcome, applying `deadline` as an upper bound. A
    /// `deadline` in the past resolves immediately to `Timeout`.
    pub async fn await_outcome(self, deadline: Option<DateTime<Utc>>) -> Result<FetchOutcome, IngestError> {
        let recv = self.receiver;
        match deadline {
            None => recv.await.unwrap_or(Err(IngestError::Cancelled)),
            Some(dl) => {
                let now = Utc::now();
                if dl <= now {
                    return Err(IngestError::Timeout);
                }
                let remaining = (dl - now).to_std().unwrap_or(std::time::Duration::ZERO);
                match tokio::time::timeout(remaining, recv).await {
                    Ok(result) => result.unwrap_or(Err(IngestError::Cancelled)),
                    Err(_) => Err(IngestError::Timeout),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{Quality, SourceKind};

    #[tokio::test]
    async fn no_deadline_waits_for_sender() {
        let (tx, rx) = oneshot::channel();
        let handle = PendingHandle::new(rx);
        tx.send(Ok(FetchOutcome {
            payload: Vec::new(),
            quality: Quality::new(1.0, 1.0, 1.0),
            source_kind: SourceKind::FreshApi,
        }))
        .unwrap();
        assert!(handle.await_outcome(None).await.is_ok());
    }

    #[tokio::test]
    async fn past_deadline_resolves_to_timeout_immediately() {
        let (_tx, rx) = oneshot::channel();
        let handle = PendingHandle::new(rx);
        let deadline = Utc::now() - chrono::Duration::seconds(1);
        let err = handle.await_outcome(Some(deadline)).await.unwrap_err();
        assert_eq!(err, IngestError::Timeout);
    }

    #[tokio::test]
    async fn dropped_sender_resolves_to_cancelled() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let handle = PendingHandle::new(rx);
        let err = handle.await_outcome(None).await.unwrap_err();
        assert_eq!(err, IngestError::Cancelled);
    }
}

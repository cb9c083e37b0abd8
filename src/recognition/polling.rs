//! Waiting for an asynchronous recognition operation to finish.
//!
//! The service has no way to notify us, so we poll with a linear backoff:
//! before attempt `n` we wait `n` backoff units. With the default policy of 10
//! attempts and 1 second, that's at most 55 seconds per page.
//!
//! Once we stop polling, the last status we saw decides the outcome. An
//! operation that is still `Running` may yet finish server-side, so it is
//! reported as a timeout, not a failure.

use tokio_util::sync::CancellationToken;

use super::{OperationHandle, OperationStatus, RecognitionBackend};
use crate::{config::PollPolicy, error::OcrError, prelude::*};

/// Poll `operation` until it reaches a terminal state, we run out of
/// attempts, or `cancel` fires.
pub async fn poll_until_terminal<B>(
    backend: &B,
    operation: &OperationHandle,
    page_name: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<B::Content, OcrError>
where
    B: RecognitionBackend + ?Sized,
{
    let mut attempt = 1;
    let status = loop {
        let delay = policy.delay_before(attempt);
        debug!(attempt, "Waiting {} second(s)...", delay.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                warn!(page = page_name, attempt, "Cancelled while waiting for text recognition");
                return Err(OcrError::RecognitionTimedOut {
                    page: page_name.to_owned(),
                });
            }
        }

        let status = backend.poll(operation, page_name).await?;
        debug!(attempt, "Text recognition server status: {}", status.label());
        if !status.is_pending() || attempt >= policy.max_attempts {
            break status;
        }
        attempt += 1;
    };

    match status {
        OperationStatus::Succeeded(content) => Ok(content),
        OperationStatus::Failed => Err(OcrError::RecognitionFailed {
            page: page_name.to_owned(),
        }),
        OperationStatus::NotStarted => Err(OcrError::RecognitionNeverStarted {
            page: page_name.to_owned(),
        }),
        OperationStatus::Running => Err(OcrError::RecognitionTimedOut {
            page: page_name.to_owned(),
        }),
    }
}

//! Text recognition backends.
//!
//! Both OCR services are driven through one [`RecognitionBackend`] trait. A
//! synchronous backend answers [`RecognitionBackend::submit`] with
//! [`Submission::Completed`], and never needs to be polled. An asynchronous
//! backend answers with [`Submission::Accepted`], and [`recognize_page`] then
//! runs the polling loop in [`polling`] until the operation reaches a terminal
//! state.

use tokio_util::sync::CancellationToken;

use crate::{
    config::PollPolicy, error::OcrError, imaging::pages::PageImage, models::PageContent,
    prelude::*,
};

pub mod client;
pub mod ocr;
pub mod polling;
pub mod recognize_text;

/// An opaque reference to a recognition operation running server-side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationHandle(pub String);

impl OperationHandle {
    /// The operation ID, as used in URLs.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The status of an asynchronous recognition operation.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationStatus<R> {
    /// Queued, but not yet started.
    NotStarted,
    /// In progress.
    Running,
    /// Finished, with a result.
    Succeeded(R),
    /// Finished, without a result.
    Failed,
}

impl<R> OperationStatus<R> {
    /// Should we keep polling?
    pub fn is_pending(&self) -> bool {
        matches!(self, OperationStatus::NotStarted | OperationStatus::Running)
    }

    /// The status name, as the service reports it.
    pub fn label(&self) -> &'static str {
        match self {
            OperationStatus::NotStarted => "Not Started",
            OperationStatus::Running => "Running",
            OperationStatus::Succeeded(_) => "Succeeded",
            OperationStatus::Failed => "Failed",
        }
    }
}

/// What a backend does with a submitted page.
#[derive(Clone, Debug, PartialEq)]
pub enum Submission<R> {
    /// The page was recognized immediately.
    Completed(R),
    /// The page was accepted for recognition, and must be polled.
    Accepted(OperationHandle),
}

/// An OCR service.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// The content this backend recognizes on each page.
    type Content: PageContent;

    /// Send a page to the service.
    async fn submit(&self, page: &PageImage) -> Result<Submission<Self::Content>, OcrError>;

    /// Check on an operation returned by [`RecognitionBackend::submit`].
    ///
    /// Backends which always complete immediately never see this called.
    async fn poll(
        &self,
        operation: &OperationHandle,
        page_name: &str,
    ) -> Result<OperationStatus<Self::Content>, OcrError>;
}

/// Recognize a single page, waiting for the service as long as `policy`
/// allows.
///
/// If `cancel` fires while we are waiting, the page fails with
/// [`OcrError::RecognitionTimedOut`].
#[instrument(level = "debug", skip_all, fields(page = %page.name()))]
pub async fn recognize_page<B>(
    backend: &B,
    page: &PageImage,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<B::Content, OcrError>
where
    B: RecognitionBackend + ?Sized,
{
    match backend.submit(page).await? {
        Submission::Completed(content) => Ok(content),
        Submission::Accepted(operation) => {
            debug!(operation_id = operation.as_str(), "Text recognition submitted");
            polling::poll_until_terminal(backend, &operation, &page.name(), policy, cancel)
                .await
        }
    }
}

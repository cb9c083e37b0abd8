//! Errors raised while turning a TIFF file into recognized text.
//!
//! Most of this program uses [`anyhow`], but the page pipeline needs to tell
//! its callers exactly _why_ a page could not be recognized. A page that the
//! service refused is very different from a page that is still being worked
//! on server-side when we run out of patience. [`OcrError`] carries that
//! classification, and it can be recovered from an [`anyhow::Error`] using
//! `downcast_ref`.

use std::error;

use reqwest::StatusCode;

use crate::retry::IsKnownTransient;

/// A boxed error, used to carry lower-level failures as a `source`.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// Why a document or one of its pages could not be recognized.
///
/// Every variant is fatal for the file being processed: a document is only
/// stored once all of its pages have been recognized.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// The input could not be read as a multi-page TIFF.
    #[error("could not decode {name:?} as a multi-page TIFF")]
    Decode {
        /// The name of the input file.
        name: String,
        /// The underlying decoder error.
        #[source]
        source: BoxError,
    },

    /// The page cannot be sent to the OCR service without violating one of
    /// its documented limits.
    #[error("cannot send {page:?} to the text recognition service: {reason}")]
    UnsupportedPage {
        /// The name of the page.
        page: String,
        /// Which limit the page violates.
        reason: String,
    },

    /// The OCR service rejected the page, or could not be reached, when we
    /// tried to submit it.
    #[error("could not submit {page:?} for text recognition")]
    Submission {
        /// The name of the page.
        page: String,
        /// What the service told us.
        #[source]
        source: ServiceError,
    },

    /// We could not ask the OCR service about an operation.
    #[error("could not check the status of text recognition operation {operation_id} for {page:?}")]
    StatusCheck {
        /// The name of the page.
        page: String,
        /// The operation we were asking about.
        operation_id: String,
        /// What the service told us.
        #[source]
        source: ServiceError,
    },

    /// The service finished the operation, but reported that it failed.
    #[error("text recognition server wasn't able to recognize text in {page:?}")]
    RecognitionFailed {
        /// The name of the page.
        page: String,
    },

    /// The service never started the operation before we gave up.
    #[error("text recognition server wasn't able to start recognizing text in {page:?}")]
    RecognitionNeverStarted {
        /// The name of the page.
        page: String,
    },

    /// The service was still running the operation when we gave up. The
    /// operation may still complete server-side.
    #[error(
        "text recognition server didn't respond in a reasonable time frame when recognizing text in {page:?}"
    )]
    RecognitionTimedOut {
        /// The name of the page.
        page: String,
    },

    /// A synchronous recognition request failed, or returned something we
    /// could not understand.
    #[error("text recognition failed for {page:?}")]
    Recognition {
        /// The name of the page.
        page: String,
        /// What the service told us.
        #[source]
        source: ServiceError,
    },
}

impl OcrError {
    /// Build a [`OcrError::Decode`] error from any lower-level error.
    pub fn decode(name: &str, source: impl Into<BoxError>) -> Self {
        OcrError::Decode {
            name: name.to_owned(),
            source: source.into(),
        }
    }

    /// Build a [`OcrError::UnsupportedPage`] error.
    pub fn unsupported_page(page: &str, reason: impl Into<String>) -> Self {
        OcrError::UnsupportedPage {
            page: page.to_owned(),
            reason: reason.into(),
        }
    }
}

impl IsKnownTransient for OcrError {
    fn is_known_transient(&self) -> bool {
        match self {
            OcrError::Submission { source, .. } | OcrError::Recognition { source, .. } => {
                source.is_known_transient()
            }
            // Polling failures and terminal classifications are never retried.
            _ => false,
        }
    }
}

/// A failed call to the OCR service.
#[derive(Debug, thiserror::Error)]
#[error("{}", describe(.status, .code, .message))]
pub struct ServiceError {
    /// The HTTP status, if we got far enough to receive one.
    pub status: Option<StatusCode>,

    /// The service's error code, if it sent one (e.g. `InvalidImageSize`).
    pub code: Option<String>,

    /// A human-readable description of the failure.
    pub message: String,
}

impl ServiceError {
    /// A failure with no HTTP status, typically a network error or a response
    /// we could not parse.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// A failure with an HTTP status.
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
        }
    }

    /// A response that arrived intact but did not have the shape we expected.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some("MalformedResponse".to_owned()),
            message: message.into(),
        }
    }
}

/// Format a [`ServiceError`] as `HTTP 400 Bad Request: InvalidImage: message`,
/// leaving out whichever parts we don't have.
fn describe(status: &Option<StatusCode>, code: &Option<String>, message: &str) -> String {
    let mut out = String::new();
    if let Some(status) = status {
        out.push_str(&format!("HTTP {status}: "));
    }
    if let Some(code) = code {
        out.push_str(&format!("{code}: "));
    }
    out.push_str(message);
    out
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status(),
            code: None,
            message: err.to_string(),
        }
    }
}

impl IsKnownTransient for ServiceError {
    fn is_known_transient(&self) -> bool {
        match self.status {
            Some(status) => status.is_known_transient(),
            // Malformed responses will not get better by asking again.
            None => self.code.as_deref() != Some("MalformedResponse"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classifications_are_not_transient() {
        let page = "scan.tif - Page 1 of 1".to_owned();
        assert!(!OcrError::RecognitionTimedOut { page: page.clone() }.is_known_transient());
        assert!(!OcrError::RecognitionFailed { page: page.clone() }.is_known_transient());
        assert!(
            !OcrError::StatusCheck {
                page,
                operation_id: "x".to_owned(),
                source: ServiceError::new("connection reset"),
            }
            .is_known_transient()
        );
    }

    #[test]
    fn submission_transience_follows_status() {
        let submission = |source| OcrError::Submission {
            page: "p".to_owned(),
            source,
        };
        assert!(
            submission(ServiceError::with_status(StatusCode::TOO_MANY_REQUESTS, "slow down"))
                .is_known_transient()
        );
        assert!(
            !submission(ServiceError::with_status(StatusCode::BAD_REQUEST, "bad image"))
                .is_known_transient()
        );
        assert!(submission(ServiceError::new("connection reset")).is_known_transient());
        assert!(!submission(ServiceError::malformed("no header")).is_known_transient());
    }

    #[test]
    fn service_errors_describe_what_they_know() {
        assert_eq!(ServiceError::new("connection reset").to_string(), "connection reset");
        assert_eq!(
            ServiceError::malformed("no header").to_string(),
            "MalformedResponse: no header"
        );
        assert_eq!(
            ServiceError::with_status(StatusCode::SERVICE_UNAVAILABLE, "busy").to_string(),
            "HTTP 503 Service Unavailable: busy"
        );
    }

    #[test]
    fn display_includes_page_name() {
        let err = OcrError::RecognitionNeverStarted {
            page: "scan.tif - Page 2 of 3".to_owned(),
        };
        assert!(err.to_string().contains("scan.tif - Page 2 of 3"));
    }
}

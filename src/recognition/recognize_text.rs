//! The asynchronous `recognize_text` backend.
//!
//! Submitting a page returns `202 Accepted` with an `Operation-Location`
//! header. The operation ID is the last 36 characters of that header, and we
//! poll `textOperations/{id}` until the service reports a terminal status.

use reqwest::Url;

use super::{
    OperationHandle, OperationStatus, RecognitionBackend, Submission,
    client::{ClientOptions, ServiceClient, parse_json},
};
use crate::{
    config::ServiceConfig,
    error::{OcrError, ServiceError},
    imaging::pages::PageImage,
    models::LinesPage,
    prelude::*,
};

/// Environment variable prefix for this backend's configuration.
pub const ENV_PREFIX: &str = "RECOGNIZE_TEXT";

/// Path of the submission endpoint.
const RECOGNIZE_TEXT_PATH: &str = "vision/v2.0/recognizeText";

/// Path of the status endpoint. The operation ID is appended.
const TEXT_OPERATIONS_PATH: &str = "vision/v2.0/textOperations/";

/// The header which tells us where to find our operation.
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";

/// Operation IDs are GUIDs, which are always this long.
const OPERATION_ID_LEN: usize = 36;

/// What kind of text to look for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RecognitionMode {
    /// Printed text.
    #[default]
    Printed,
    /// Handwriting.
    Handwritten,
}

impl RecognitionMode {
    fn as_query_value(self) -> &'static str {
        match self {
            RecognitionMode::Printed => "Printed",
            RecognitionMode::Handwritten => "Handwritten",
        }
    }
}

/// Client for the asynchronous text recognition endpoints.
pub struct RecognizeTextBackend {
    client: ServiceClient,
    submit_url: Url,
    operations_url: Url,
}

impl RecognizeTextBackend {
    /// Create a new backend.
    pub fn new(
        config: ServiceConfig,
        options: &ClientOptions,
        mode: RecognitionMode,
    ) -> Result<Self> {
        let mut submit_url = config.url(RECOGNIZE_TEXT_PATH)?;
        submit_url
            .query_pairs_mut()
            .append_pair("mode", mode.as_query_value());
        let operations_url = config.url(TEXT_OPERATIONS_PATH)?;
        Ok(Self {
            client: ServiceClient::new(config, options)?,
            submit_url,
            operations_url,
        })
    }

    fn operation_url(&self, operation: &OperationHandle) -> Result<Url, ServiceError> {
        self.operations_url
            .join(operation.as_str())
            .map_err(|e| ServiceError::new(format!("invalid operation ID: {e}")))
    }
}

#[async_trait]
impl RecognitionBackend for RecognizeTextBackend {
    type Content = LinesPage;

    #[instrument(level = "debug", skip_all, fields(page = %page.name()))]
    async fn submit(&self, page: &PageImage) -> Result<Submission<LinesPage>, OcrError> {
        let submission_error = |source| OcrError::Submission {
            page: page.name(),
            source,
        };

        let response = self
            .client
            .post_image(self.submit_url.clone(), page)
            .await
            .map_err(submission_error)?;
        let location = response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                submission_error(ServiceError::malformed(format!(
                    "response has no {OPERATION_LOCATION_HEADER} header"
                )))
            })?;
        let operation_id = operation_id_from_location(location).ok_or_else(|| {
            submission_error(ServiceError::malformed(format!(
                "cannot find an operation ID in {location:?}"
            )))
        })?;
        Ok(Submission::Accepted(OperationHandle(operation_id)))
    }

    async fn poll(
        &self,
        operation: &OperationHandle,
        page_name: &str,
    ) -> Result<OperationStatus<LinesPage>, OcrError> {
        let status_check_error = |source| OcrError::StatusCheck {
            page: page_name.to_owned(),
            operation_id: operation.as_str().to_owned(),
            source,
        };

        let url = self.operation_url(operation).map_err(status_check_error)?;
        let response = self.client.get_operation(url).await.map_err(status_check_error)?;
        let body = parse_json::<TextOperationResponse>(response)
            .await
            .map_err(status_check_error)?;
        body.into_status().map_err(status_check_error)
    }
}

/// Extract the operation ID from an `Operation-Location` URL.
///
/// This is just the last 36 characters, which is how the service's own SDK
/// does it.
fn operation_id_from_location(location: &str) -> Option<String> {
    let location = location.trim();
    let char_count = location.chars().count();
    if char_count < OPERATION_ID_LEN {
        return None;
    }
    Some(location.chars().skip(char_count - OPERATION_ID_LEN).collect())
}

/// A status check response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextOperationResponse {
    status: TextOperationStatus,
    #[serde(default)]
    recognition_result: Option<LinesPage>,
}

impl TextOperationResponse {
    fn into_status(self) -> Result<OperationStatus<LinesPage>, ServiceError> {
        match self.status {
            TextOperationStatus::NotStarted => Ok(OperationStatus::NotStarted),
            TextOperationStatus::Running => Ok(OperationStatus::Running),
            TextOperationStatus::Failed => Ok(OperationStatus::Failed),
            TextOperationStatus::Succeeded => match self.recognition_result {
                Some(result) => Ok(OperationStatus::Succeeded(result)),
                None => Err(ServiceError::malformed(
                    "operation succeeded without a recognitionResult",
                )),
            },
        }
    }
}

/// The operation statuses reported by the service.
#[derive(Debug, Deserialize)]
enum TextOperationStatus {
    #[serde(rename = "Not Started", alias = "NotStarted", alias = "notStarted")]
    NotStarted,
    #[serde(alias = "running")]
    Running,
    #[serde(alias = "failed")]
    Failed,
    #[serde(alias = "succeeded")]
    Succeeded,
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use axum::{
        Json, Router,
        extract::Path,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        config::PollPolicy,
        recognition::{client::tests::serve, polling::tests::test_page, recognize_page},
        retry::IsKnownTransient,
    };

    const OPERATION_ID: &str = "49a36324-fc4b-4387-aa06-090cfbf0064f";

    /// A submit endpoint which answers every page with `response`.
    fn submit_route(response: fn() -> Response) -> Router {
        Router::new().route(
            "/vision/v2.0/recognizeText",
            post(move || async move { response() }),
        )
    }

    fn accepted() -> Response {
        let location =
            format!("https://westus.api.cognitive.microsoft.com/vision/v2.0/textOperations/{OPERATION_ID}");
        (StatusCode::ACCEPTED, [(OPERATION_LOCATION_HEADER, location)]).into_response()
    }

    async fn backend_for(router: Router) -> RecognizeTextBackend {
        let config = serve(router).await;
        RecognizeTextBackend::new(config, &ClientOptions::default(), RecognitionMode::Printed)
            .unwrap()
    }

    fn expect_submission_error(err: OcrError) -> ServiceError {
        match err {
            OcrError::Submission { page, source } => {
                assert_eq!(page, "scan.tif - Page 1 of 1");
                source
            }
            other => panic!("expected a submission error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepted_pages_are_polled_until_they_succeed() {
        let polls = Arc::new(AtomicUsize::new(0));
        let router = submit_route(accepted).route(
            "/vision/v2.0/textOperations/{id}",
            get({
                let polls = polls.clone();
                move |Path(id): Path<String>| {
                    let polls = polls.clone();
                    async move {
                        if id != OPERATION_ID {
                            return StatusCode::NOT_FOUND.into_response();
                        }
                        if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                            return Json(json!({ "status": "Running" })).into_response();
                        }
                        Json(json!({
                            "status": "Succeeded",
                            "recognitionResult": {
                                "lines": [
                                    { "boundingBox": [0, 0, 10, 0, 10, 5, 0, 5], "text": "Dear Sir,", "words": [] },
                                    { "boundingBox": [0, 8, 10, 8, 10, 13, 0, 13], "text": "Thank you.", "words": [] }
                                ]
                            }
                        }))
                        .into_response()
                    }
                }
            }),
        );
        let backend = backend_for(router).await;

        let page = recognize_page(
            &backend,
            &test_page(),
            &PollPolicy::new(3, Duration::from_millis(1)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let lines = page.lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>();
        assert_eq!(lines, vec!["Dear Sir,", "Thank you."]);
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn accepted_without_operation_location_is_a_submission_error() {
        let backend = backend_for(submit_route(|| StatusCode::ACCEPTED.into_response())).await;
        let err = expect_submission_error(backend.submit(&test_page()).await.unwrap_err());
        assert_eq!(err.code.as_deref(), Some("MalformedResponse"));
        assert!(!err.is_known_transient());
    }

    #[tokio::test]
    async fn short_operation_location_is_a_submission_error() {
        let backend = backend_for(submit_route(|| {
            (StatusCode::ACCEPTED, [(OPERATION_LOCATION_HEADER, "textOperations/1234")])
                .into_response()
        }))
        .await;
        let err = expect_submission_error(backend.submit(&test_page()).await.unwrap_err());
        assert_eq!(err.code.as_deref(), Some("MalformedResponse"));
        assert!(err.message.contains("textOperations/1234"));
    }

    #[tokio::test]
    async fn busy_service_is_a_transient_submission_error() {
        let backend = backend_for(submit_route(|| {
            (StatusCode::SERVICE_UNAVAILABLE, "try again later").into_response()
        }))
        .await;
        let err = backend.submit(&test_page()).await.unwrap_err();
        assert!(err.is_known_transient());
        let err = expect_submission_error(err);
        assert_eq!(err.status, Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(err.message, "try again later");
    }

    #[tokio::test]
    async fn missing_operations_are_status_check_errors() {
        let router = submit_route(accepted).route(
            "/vision/v2.0/textOperations/{id}",
            get(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "error": { "code": "NotFound", "message": "Operation not found." } })),
                )
            }),
        );
        let backend = backend_for(router).await;
        let err = recognize_page(
            &backend,
            &test_page(),
            &PollPolicy::new(3, Duration::from_millis(1)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(!err.is_known_transient());
        match err {
            OcrError::StatusCheck {
                operation_id,
                source,
                ..
            } => {
                assert_eq!(operation_id, OPERATION_ID);
                assert_eq!(source.status, Some(StatusCode::NOT_FOUND));
                assert_eq!(source.code.as_deref(), Some("NotFound"));
            }
            other => panic!("expected a status check error, got {other:?}"),
        }
    }

    #[test]
    fn operation_id_is_last_36_characters() {
        let location = "https://westus.api.cognitive.microsoft.com/vision/v2.0/textOperations/49a36324-fc4b-4387-aa06-090cfbf0064f";
        assert_eq!(
            operation_id_from_location(location).as_deref(),
            Some("49a36324-fc4b-4387-aa06-090cfbf0064f")
        );
    }

    #[test]
    fn short_locations_have_no_operation_id() {
        assert_eq!(operation_id_from_location("textOperations/1234"), None);
        assert_eq!(operation_id_from_location(""), None);
    }

    #[test]
    fn urls_are_built_from_endpoint() {
        let config = ServiceConfig::new("http://localhost:5000/", "key").unwrap();
        let backend =
            RecognizeTextBackend::new(config, &ClientOptions::default(), RecognitionMode::Handwritten)
                .unwrap();
        assert_eq!(
            backend.submit_url.as_str(),
            "http://localhost:5000/vision/v2.0/recognizeText?mode=Handwritten"
        );
        let operation = OperationHandle("49a36324-fc4b-4387-aa06-090cfbf0064f".to_owned());
        assert_eq!(
            backend.operation_url(&operation).unwrap().as_str(),
            "http://localhost:5000/vision/v2.0/textOperations/49a36324-fc4b-4387-aa06-090cfbf0064f"
        );
    }

    fn parse(value: serde_json::Value) -> Result<OperationStatus<LinesPage>, ServiceError> {
        serde_json::from_value::<TextOperationResponse>(value)
            .unwrap()
            .into_status()
    }

    #[test]
    fn pending_statuses_are_parsed() {
        assert_eq!(
            parse(json!({ "status": "Not Started" })).unwrap(),
            OperationStatus::NotStarted
        );
        assert_eq!(
            parse(json!({ "status": "Running" })).unwrap(),
            OperationStatus::Running
        );
        assert_eq!(
            parse(json!({ "status": "Failed" })).unwrap(),
            OperationStatus::Failed
        );
    }

    #[test]
    fn succeeded_status_carries_lines() {
        let status = parse(json!({
            "status": "Succeeded",
            "recognitionResult": {
                "lines": [{
                    "boundingBox": [202, 618, 2047, 643, 2046, 840, 200, 813],
                    "text": "Our greatest glory is not",
                    "words": [
                        { "boundingBox": [204, 627, 481, 628, 481, 830, 204, 829], "text": "Our" },
                        { "boundingBox": [519, 628, 1057, 630, 1057, 832, 518, 830], "text": "greatest", "confidence": "Low" }
                    ]
                }]
            }
        }))
        .unwrap();
        let page = match status {
            OperationStatus::Succeeded(page) => page,
            other => panic!("expected success, got {other:?}"),
        };
        assert_eq!(page.lines[0].text, "Our greatest glory is not");
        assert_eq!(page.lines[0].words[1].confidence.as_deref(), Some("Low"));
    }

    #[test]
    fn success_without_result_is_malformed() {
        let err = parse(json!({ "status": "Succeeded" })).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("MalformedResponse"));
    }
}

//! The synchronous `ocr` backend.
//!
//! One request per page, answered with regions, lines and words, plus the
//! detected language and orientation.

use reqwest::Url;

use super::{
    OperationHandle, OperationStatus, RecognitionBackend, Submission,
    client::{ClientOptions, ServiceClient, parse_json},
};
use crate::{
    config::ServiceConfig,
    error::{OcrError, ServiceError},
    imaging::pages::PageImage,
    models::RegionsPage,
    prelude::*,
};

/// Environment variable prefix for this backend's configuration.
pub const ENV_PREFIX: &str = "OCR";

/// Path of the OCR endpoint, relative to the service's base URL.
const OCR_PATH: &str = "vision/v2.0/ocr";

/// Client for the synchronous OCR endpoint.
pub struct OcrBackend {
    client: ServiceClient,
    ocr_url: Url,
}

impl OcrBackend {
    /// Create a new backend. `language` is a BCP-47 hint, such as `en`.
    pub fn new(config: ServiceConfig, options: &ClientOptions, language: &str) -> Result<Self> {
        let mut ocr_url = config.url(OCR_PATH)?;
        ocr_url
            .query_pairs_mut()
            .append_pair("language", language)
            .append_pair("detectOrientation", "true");
        Ok(Self {
            client: ServiceClient::new(config, options)?,
            ocr_url,
        })
    }
}

#[async_trait]
impl RecognitionBackend for OcrBackend {
    type Content = RegionsPage;

    #[instrument(level = "debug", skip_all, fields(page = %page.name()))]
    async fn submit(&self, page: &PageImage) -> Result<Submission<RegionsPage>, OcrError> {
        let recognition_error = |source| OcrError::Recognition {
            page: page.name(),
            source,
        };

        let response = self
            .client
            .post_image(self.ocr_url.clone(), page)
            .await
            .map_err(recognition_error)?;
        let content = parse_json::<RegionsPage>(response)
            .await
            .map_err(recognition_error)?;
        debug!(
            language = %content.language,
            orientation = %content.orientation,
            regions = content.regions.len(),
            "Recognized page"
        );
        Ok(Submission::Completed(content))
    }

    async fn poll(
        &self,
        operation: &OperationHandle,
        page_name: &str,
    ) -> Result<OperationStatus<RegionsPage>, OcrError> {
        // We never hand out operations, so there is nothing to poll.
        Err(OcrError::StatusCheck {
            page: page_name.to_owned(),
            operation_id: operation.as_str().to_owned(),
            source: ServiceError::new(
                "the synchronous OCR service has no operations to poll",
            ),
        })
    }
}

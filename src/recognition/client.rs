//! HTTP plumbing shared by both OCR services.

use std::time::Duration;

use reqwest::{Response, StatusCode, Url, header};
use serde::de::DeserializeOwned;

use crate::{
    config::ServiceConfig,
    error::ServiceError,
    imaging::pages::PageImage,
    prelude::*,
    rate_limit::{RateLimit, RequestKind, RequestThrottle},
};

/// The header carrying our subscription key.
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Options for talking to an OCR service.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Timeout for each individual HTTP request.
    pub request_timeout: Duration,
    /// Limit on requests to the service, shared by all files.
    pub rate_limit: Option<RateLimit>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            rate_limit: None,
        }
    }
}

/// An authenticated, optionally rate-limited client for one OCR service.
pub struct ServiceClient {
    http: reqwest::Client,
    config: ServiceConfig,
    throttle: RequestThrottle,
}

impl ServiceClient {
    /// Create a new client.
    pub fn new(config: ServiceConfig, options: &ClientOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context("could not build HTTP client")?;
        Ok(Self {
            http,
            config,
            throttle: RequestThrottle::new(options.rate_limit),
        })
    }

    /// POST a page image. Non-2xx responses become errors.
    pub async fn post_image(&self, url: Url, page: &PageImage) -> Result<Response, ServiceError> {
        self.throttle.wait(RequestKind::Submit).await;
        trace!(%url, size = page.bytes.len(), "POST page image");
        let response = self
            .http
            .post(url)
            .header(SUBSCRIPTION_KEY_HEADER, self.config.subscription_key())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(page.bytes.clone())
            .send()
            .await?;
        check_status(response).await
    }

    /// GET the status of an operation. Non-2xx responses become errors.
    pub async fn get_operation(&self, url: Url) -> Result<Response, ServiceError> {
        self.throttle.wait(RequestKind::StatusCheck).await;
        trace!(%url, "GET");
        let response = self
            .http
            .get(url)
            .header(SUBSCRIPTION_KEY_HEADER, self.config.subscription_key())
            .send()
            .await?;
        check_status(response).await
    }
}

/// Turn a non-2xx response into a [`ServiceError`], using the service's error
/// body when there is one.
async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &body))
}

/// The error bodies we know about.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    /// `{"error": {"code": ..., "message": ...}}`
    Nested { error: ErrorDetail },
    /// `{"code": ..., "message": ...}`
    Flat(ErrorDetail),
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// Build a [`ServiceError`] from an HTTP status and response body.
fn error_from_body(status: StatusCode, body: &str) -> ServiceError {
    let detail = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody::Nested { error }) => Some(error),
        Ok(ErrorBody::Flat(detail)) => Some(detail),
        Err(_) => None,
    };
    let (code, message) = match detail {
        Some(ErrorDetail { code, message }) => (code, message),
        None => (None, None),
    };
    let message = message.unwrap_or_else(|| {
        let body = body.trim();
        if body.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        } else {
            body.to_owned()
        }
    });
    ServiceError {
        code,
        ..ServiceError::with_status(status, message)
    }
}

/// Parse a JSON response body. Bodies that don't match `T` are reported as
/// malformed.
pub async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        debug!("Unexpected response body: {body}");
        ServiceError::malformed(format!("could not parse response: {e}"))
    })
}

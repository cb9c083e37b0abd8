//! Configuration values passed explicitly into the pipeline.
//!
//! Nothing below the `cmd` layer reads the environment. The command-line
//! layer builds these values once, and hands them to the components that need
//! them.

use std::{env, time::Duration};

use reqwest::Url;

use crate::prelude::*;

/// How to reach one OCR service.
#[derive(Clone)]
pub struct ServiceConfig {
    /// The service's base URL, e.g. `https://westus.api.cognitive.microsoft.com/`
    /// or `http://localhost:5000/` for a local container. Always ends in `/`.
    endpoint: Url,

    /// The subscription key sent as `Ocp-Apim-Subscription-Key`.
    subscription_key: String,
}

impl ServiceConfig {
    /// Create a new configuration.
    pub fn new(endpoint: &str, subscription_key: impl Into<String>) -> Result<Self> {
        // `Url::join` replaces the last path segment unless the base ends in a
        // slash, so make sure it does.
        let mut endpoint = endpoint.trim().to_owned();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("invalid OCR endpoint URL {:?}", endpoint))?;
        Ok(Self {
            endpoint,
            subscription_key: subscription_key.into(),
        })
    }

    /// Read a configuration from `{prefix}_ENDPOINT` and
    /// `{prefix}_SUBSCRIPTION_KEY`.
    pub fn from_env(prefix: &str) -> Result<Self> {
        let endpoint_var = format!("{prefix}_ENDPOINT");
        let key_var = format!("{prefix}_SUBSCRIPTION_KEY");
        let endpoint = env::var(&endpoint_var)
            .with_context(|| format!("missing environment variable {endpoint_var}"))?;
        let key = env::var(&key_var)
            .with_context(|| format!("missing environment variable {key_var}"))?;
        Self::new(&endpoint, key)
    }

    /// The service's base URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The subscription key.
    pub fn subscription_key(&self) -> &str {
        &self.subscription_key
    }

    /// Resolve a path relative to the endpoint.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .with_context(|| format!("cannot build OCR URL for {:?}", path))
    }
}

// Keep the subscription key out of our logs.
impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("subscription_key", &"<redacted>")
            .finish()
    }
}

/// The image format we send to the OCR service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PageFormat {
    /// JPEG, which keeps scanned pages well under the upload limit.
    #[default]
    Jpeg,
    /// PNG, lossless but much larger.
    Png,
}

impl PageFormat {
    /// The MIME type for this format.
    pub fn mime_type(self) -> &'static str {
        match self {
            PageFormat::Jpeg => "image/jpeg",
            PageFormat::Png => "image/png",
        }
    }
}

/// Limits on the page images we send to the OCR service.
#[derive(Clone, Debug)]
pub struct PageLimits {
    /// Pages wider than this are scaled down.
    pub max_width: u32,
    /// Pages taller than this are scaled down.
    pub max_height: u32,
    /// Fitted pages narrower than this are rejected.
    pub min_width: u32,
    /// Fitted pages shorter than this are rejected.
    pub min_height: u32,
    /// Encoded pages larger than this are rejected.
    pub max_bytes: usize,
    /// The format to encode pages in.
    pub format: PageFormat,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            max_width: 3200,
            max_height: 3200,
            min_width: 40,
            min_height: 40,
            max_bytes: 4 * 1024 * 1024,
            format: PageFormat::Jpeg,
        }
    }
}

/// How patiently we wait for an asynchronous recognition operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// The maximum number of status checks. Always at least 1.
    pub max_attempts: u32,
    /// Before attempt `n`, we wait `n * backoff_unit`.
    pub backoff_unit: Duration,
}

impl PollPolicy {
    /// Create a new policy.
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// How long to wait before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }

    /// The longest we will ever wait in total, ignoring request latency.
    pub fn worst_case_wait(&self) -> Duration {
        (1..=self.max_attempts).map(|a| self.delay_before(a)).sum()
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_trailing_slash() {
        let config = ServiceConfig::new("http://localhost:5000/vision", "key").unwrap();
        assert_eq!(config.endpoint().as_str(), "http://localhost:5000/vision/");
        assert_eq!(
            config.url("vision/v2.0/ocr").unwrap().as_str(),
            "http://localhost:5000/vision/vision/v2.0/ocr"
        );
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(ServiceConfig::new("not a url", "key").is_err());
    }

    #[test]
    fn debug_output_hides_key() {
        let config = ServiceConfig::new("http://localhost:5000", "sekrit").unwrap();
        assert!(!format!("{config:?}").contains("sekrit"));
    }

    #[test]
    fn default_poll_policy_waits_at_most_55_seconds() {
        let policy = PollPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.delay_before(1), Duration::from_secs(1));
        assert_eq!(policy.delay_before(10), Duration::from_secs(10));
        assert_eq!(policy.worst_case_wait(), Duration::from_secs(55));
    }

    #[test]
    fn poll_policy_always_polls_at_least_once() {
        assert_eq!(PollPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}

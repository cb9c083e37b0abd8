//! Throttling requests to an OCR service.
//!
//! `--rate-limit` is written as `N/s` or `N/m`. One [`RequestThrottle`] is
//! shared by every file being recognized, and both page submissions and
//! status checks draw from the same bucket, because the service counts them
//! against the same quota.

use std::{fmt, str::FromStr, time::Duration};

use leaky_bucket::RateLimiter;

use crate::prelude::*;

/// A request budget, such as `10/s` or `600/m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    requests: usize,
    period: Duration,
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (requests, unit) = s
            .split_once('/')
            .ok_or_else(|| anyhow!("expected a rate limit like \"10/s\", got {s:?}"))?;
        let requests = requests
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid request count in rate limit {s:?}"))?;
        if requests == 0 {
            return Err(anyhow!("rate limit {s:?} would never allow a request"));
        }
        let period = match unit.trim() {
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            other => return Err(anyhow!("unknown rate limit period {other:?} (use s or m)")),
        };
        Ok(Self { requests, period })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = if self.period.as_secs() == 60 { "m" } else { "s" };
        write!(f, "{}/{unit}", self.requests)
    }
}

/// Which kind of request is waiting on the throttle, for logs.
#[derive(Debug, Clone, Copy)]
pub enum RequestKind {
    /// Uploading a page.
    Submit,
    /// Checking on an operation.
    StatusCheck,
}

/// Gate in front of every request to one OCR service.
pub struct RequestThrottle {
    limiter: Option<RateLimiter>,
}

impl RequestThrottle {
    /// A throttle enforcing `limit`, or no throttle at all.
    ///
    /// The bucket starts full and refills once per period, so a second run
    /// started right after the first may briefly exceed a per-minute budget.
    pub fn new(limit: Option<RateLimit>) -> Self {
        let limiter = limit.map(|limit| {
            debug!(%limit, "Throttling OCR requests");
            RateLimiter::builder()
                .initial(limit.requests)
                .refill(limit.requests)
                .max(limit.requests)
                .interval(limit.period)
                .build()
        });
        Self { limiter }
    }

    /// Wait until we may send another request.
    pub async fn wait(&self, kind: RequestKind) {
        if let Some(limiter) = &self.limiter {
            if limiter.balance() == 0 {
                trace!(?kind, "Waiting for OCR request budget");
            }
            limiter.acquire_one().await;
        }
    }
}

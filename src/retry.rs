//! Support utilities for [`keen_retry`]'s retry API.
//!
//! Pages are not retried by default. When `--transient-retries` is set, a page
//! whose submission failed for a known transient reason is submitted again,
//! with exponential backoff.

use std::fmt;

use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use reqwest::StatusCode;

use crate::{error::OcrError, prelude::*};

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// Build an [`RetryResult::Fatal`] value.
pub(crate) fn retry_result_fatal<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Fatal { input: (), error }
}

/// Is this error a known transient error?
///
/// By default, we assume errors are not transient, until they're been observed
/// in the wild, investigated and determined to be transient. The prevents us
/// from doing large numbers of retries with exponential backoff on errors that
/// will never resolve.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for StatusCode {
    fn is_known_transient(&self) -> bool {
        let transient_failures = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ];
        transient_failures.contains(self)
    }
}

/// Convert a plain [`Result`] into a [`RetryResult`], using
/// [`IsKnownTransient`] to decide which errors deserve another attempt.
pub(crate) trait IntoRetryResult<T, E> {
    /// Perform the conversion.
    fn into_retry_result(self) -> RetryResult<(), (), T, E>;
}

impl<T, E> IntoRetryResult<T, E> for Result<T, E>
where
    E: IsKnownTransient + fmt::Debug,
{
    fn into_retry_result(self) -> RetryResult<(), (), T, E> {
        match self {
            Ok(output) => retry_result_ok(output),
            Err(error) if error.is_known_transient() => {
                debug!("Potentially transient error: {:?}", error);
                RetryResult::Transient { input: (), error }
            }
            Err(error) => retry_result_fatal(error),
        }
    }
}

/// Run `op`, and if it fails with a known transient error, run it again up to
/// `re_attempts` more times with exponential backoff.
///
/// With `re_attempts == 0`, this is just `op().await`.
pub async fn with_transient_retries<T, F, Fut>(
    re_attempts: u8,
    op: F,
) -> Result<T, OcrError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, OcrError>>,
{
    if re_attempts == 0 {
        return op().await;
    }

    // If we have a transient failure, back off exponentially.
    let jitter = ExponentialJitter::FromBackoffRange {
        backoff_range_millis: 1_000..=30_000,
        re_attempts,
        jitter_ratio: 0.2,
    };

    let op = &op;
    let resolved = op()
        .await
        .into_retry_result()
        .retry_with_async(|_| async move { op().await.into_retry_result() })
        .with_exponential_jitter(|| jitter)
        .await
        .inspect_recovered(|_, _, retry_errors_list| {
            warn!(
                "suceeded after retrying {} times (failed attempts: [{}])",
                retry_errors_list.len(),
                keen_retry::loggable_retry_errors(retry_errors_list)
            )
        })
        .inspect_given_up(|_, retry_errors_list, fatal_error| {
            error!(
                "FAILED after exhausting all {} retrying attempts with error {fatal_error:?}. Previous transient failures: [{}]",
                retry_errors_list.len(),
                keen_retry::loggable_retry_errors(retry_errors_list)
            )
        });

    match resolved {
        ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => {
            Ok(output)
        }
        ResolvedResult::Fatal { error, .. } => Err(error),
        ResolvedResult::GivenUp { fatal_error, .. }
        | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error),
    }
}

//! Command-line entry points.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use clap::Args;
use futures::StreamExt as _;
use tokio_util::sync::CancellationToken;

use crate::{async_utils::BoxedStream, prelude::*, ui::Ui};

pub mod print;
pub mod recognize;
pub mod schema;

/// Common options for subcommands that process data streams.
#[derive(Debug, Clone, Args)]
pub struct StreamOpts {
    /// Limit processing to the first N input files.
    #[clap(long)]
    take_first: Option<usize>,

    /// Max number of files to process at a time. Pages within a file are
    /// always processed one at a time.
    #[clap(short = 'j', long = "jobs", default_value = "4")]
    pub job_count: usize,

    /// What portion of input files should we allow to fail? Specified as a
    /// number between 0.0 and 1.0.
    #[clap(long, default_value = "0.0")]
    pub allowed_failure_rate: f32,
}

impl StreamOpts {
    /// Apply any necessary stream opts to our input stream.
    pub fn apply_stream_input_opts<T>(
        &self,
        input: BoxedStream<Result<T>>,
    ) -> BoxedStream<Result<T>>
    where
        T: 'static,
    {
        if let Some(take_first) = self.take_first {
            input.take(take_first).boxed()
        } else {
            input
        }
    }
}

/// Counts of processed and failed files.
#[derive(Debug, Default)]
pub struct FileCounters {
    total: AtomicUsize,
    failures: AtomicUsize,
}

impl FileCounters {
    /// Record one file's outcome.
    pub fn record<T>(&self, result: &Result<T>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Report our totals, and fail if too many files failed.
    pub fn finish(&self, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        let total = self.total.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        if total == 0 {
            ui.display_message("🤷", "No input files");
            return Ok(());
        }
        let failure_rate = failures as f32 / total as f32;
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of files failed, but only {:.2}% were allowed",
                failures,
                total,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ))
        } else {
            if failures > 0 {
                ui.display_message("❌", &format!("{failures} files could not be processed"));
            }
            ui.display_message("✅", &format!("{} files recognized", total - failures));
            Ok(())
        }
    }
}

/// Stop reading `input` once `cancel` fires, so that no new files are started.
pub fn until_cancelled<T>(input: BoxedStream<T>, cancel: &CancellationToken) -> BoxedStream<T>
where
    T: Send + 'static,
{
    input.take_until(cancel.clone().cancelled_owned()).boxed()
}

/// Create a token which is cancelled on Ctrl-C, or once `deadline` has
/// passed.
pub fn cancel_on_interrupt(deadline: Option<Duration>) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        let interrupted = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => warn!("Interrupted, cancelling outstanding work"),
                Err(err) => {
                    warn!("Could not listen for Ctrl-C: {err}");
                    std::future::pending::<()>().await
                }
            }
        };
        let deadline_passed = async {
            match deadline {
                Some(deadline) => {
                    tokio::time::sleep(deadline).await;
                    warn!("Deadline passed, cancelling outstanding work");
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = interrupted => {}
            _ = deadline_passed => {}
            _ = token.cancelled() => return,
        }
        token.cancel();
    });
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_rate_is_enforced() {
        let ui = Ui::init_for_tests();
        let counters = FileCounters::default();
        counters.record::<()>(&Ok(()));
        counters.record::<()>(&Err(anyhow!("bad file")));
        assert!(counters.finish(&ui, 0.0).is_err());
        assert!(counters.finish(&ui, 0.5).is_ok());
    }

    #[test]
    fn no_input_is_not_a_failure() {
        let ui = Ui::init_for_tests();
        assert!(FileCounters::default().finish(&ui, 0.0).is_ok());
    }

    #[tokio::test]
    async fn no_input_is_read_after_cancellation() {
        let cancel = CancellationToken::new();
        let input = futures::stream::iter(1..=5).boxed();
        let mut input = until_cancelled(input, &cancel);
        assert_eq!(input.next().await, Some(1));
        assert_eq!(input.next().await, Some(2));
        cancel.cancel();
        assert_eq!(input.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels() {
        let cancel = cancel_on_interrupt(Some(Duration::from_secs(5)));
        tokio::time::timeout(Duration::from_secs(6), cancel.cancelled())
            .await
            .unwrap();
    }
}

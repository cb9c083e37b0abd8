//! Terminal output other than logs: the file progress bar, the spinner shown
//! while counting input files, and the end-of-run summary.
//!
//! Logs go through [`SafeStderrWriter`], which pauses the bars while a line is
//! written. The writer follows `substudy` by Eric Kidd (Apache-2.0 OR MIT).

use std::{io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressFinish, ProgressStyle};

const TICK: Duration = Duration::from_millis(250);
const BAR_TEMPLATE: &str =
    "  📄 {msg:20} {pos:>4}/{len:4} {elapsed_precise} {wide_bar:.cyan/blue} {eta_precise}";
const SPINNER_TEMPLATE: &str = "{spinner} {msg}";

/// Shared handle to our progress bars.
#[derive(Clone)]
pub struct Ui {
    bars: Arc<MultiProgress>,
}

impl Ui {
    /// Set up progress output on stderr.
    pub fn init() -> Ui {
        Ui {
            bars: Arc::new(MultiProgress::new()),
        }
    }

    /// A UI which never draws anything.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        Ui {
            bars: Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden())),
        }
    }

    /// Stop drawing bars, because recognized documents are going to stdout.
    pub fn hide_progress_bars(&self) {
        self.bars.set_draw_target(ProgressDrawTarget::hidden());
    }

    /// A log writer that won't tear through the bars.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Progress over input files. With no known count (for example, input
    /// piped on stdin) this is a spinner instead.
    pub fn file_progress(&self, size_hint: (usize, Option<usize>)) -> ProgressBar {
        let pb = match size_hint {
            (_, Some(len)) if len > 0 => {
                let style = ProgressStyle::default_bar()
                    .template(BAR_TEMPLATE)
                    .expect("bad progress bar template");
                ProgressBar::new(len as u64).with_style(style)
            }
            _ => spinner(),
        };
        self.add(pb, "Recognizing files", "Recognized files")
    }

    /// Spinner shown while we count the records in an input listing.
    pub fn counting_spinner(&self) -> ProgressBar {
        self.add(spinner(), "🧮 Counting input files", "🧮 Counted input files")
    }

    /// Print one summary line above the bars.
    pub fn display_message(&self, emoji: &str, msg: &str) {
        let line = format!("{emoji} {msg}");
        // Hidden bars swallow `println`.
        if self.bars.is_hidden() || self.bars.println(&line).is_err() {
            eprintln!("{line}");
        }
    }

    fn add(&self, pb: ProgressBar, msg: &'static str, done_msg: &'static str) -> ProgressBar {
        let pb = self.bars.add(pb);
        #[cfg(test)]
        pb.set_draw_target(ProgressDrawTarget::hidden());
        pb.set_message(msg);
        pb.enable_steady_tick(TICK);
        pb.with_finish(ProgressFinish::WithMessage(done_msg.into()))
    }
}

fn spinner() -> ProgressBar {
    let style = ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE)
        .expect("bad spinner template");
    ProgressBar::new_spinner().with_style(style)
}

/// Writes to stderr with the progress bars suspended.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.bars.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui.bars.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.bars.suspend(|| io::stderr().flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_input_counts_get_a_bar() {
        let ui = Ui::init_for_tests();
        assert_eq!(ui.file_progress((3, Some(3))).length(), Some(3));
        assert_eq!(ui.file_progress((0, None)).length(), None);
        assert_eq!(ui.file_progress((0, Some(0))).length(), None);
    }
}

//! I/O utilities.
//!
//! This module is responsible for reading our input listings, which may be
//! JSONL or CSV, and for opening output files. There are a few complicating
//! factors:
//!
//! 1. We use async streams from Tokio, because that's an easy way to handle a
//!    large (but limited) number of failible network operations in parallel.
//! 2. We support automatic format detection from filenames or the first byte
//!    of the file.
//!
//! In general, Tokio and async Rust involve some occasional magic. We try to
//! keep all of it in this file.

use std::{pin::Pin, sync::Arc, task::Context};

use futures::{TryStreamExt, stream::StreamExt as _};
use peekable::tokio::AsyncPeekable;
use serde::de::DeserializeOwned;
use serde_json::Map;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf},
};
use tokio_stream::wrappers::LinesStream;

use crate::{prelude::*, ui::Ui};

use super::{BoxedStream, size_hint::WithSizeHintExt};

/// A smart async reader that uses [`AsyncPeekable`] to detect whether the input
/// is JSONL, or something else (which we assume is CSV).
pub struct SmartReader {
    /// Do we expect our input to be JSONL?
    is_json_like: bool,

    /// A human-readable description of the input source, for error messages.
    description: String,

    /// Our reader. There's some [`Pin`] stuff going on here because we're
    /// defining an async reader, and we don't want the value to get moved while
    /// an async function holds pointers into it.
    reader: Pin<Box<dyn AsyncBufRead + Unpin + Send + Sync + 'static>>,
}

impl SmartReader {
    /// Create a new `SmartReader` from an existing reader.
    pub async fn new_from_reader(
        description: String,
        reader: impl AsyncRead + Unpin + Send + Sync + 'static,
    ) -> Result<Self> {
        let reader = BufReader::new(reader);
        let mut peekable = AsyncPeekable::new(Box::new(reader));
        let mut buffer = vec![0; 1];
        // Empty input is fine. It just isn't JSON.
        let is_json_like = match peekable.peek_exact(&mut buffer).await {
            Ok(_) => buffer[0] == b'{',
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {description}"));
            }
        };
        Ok(Self {
            is_json_like,
            description,
            reader: Box::pin(BufReader::new(peekable)),
        })
    }

    /// Create a new `SmartReader` from a [`Path`].
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().unwrap_or_default();
        let is_json_like = ext == "json" || ext == "jsonl";
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open file at path: {:?}", path))?;
        Ok(Self {
            is_json_like,
            description: path.to_string_lossy().into_owned(),
            reader: Box::pin(BufReader::new(file)),
        })
    }

    /// Create a new `SmartReader` from either a [`Path`] or standard input.
    pub async fn new_from_path_or_stdin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::new_from_path(path).await,
            None => {
                let stdin = tokio::io::stdin();
                Self::new_from_reader("stdin".to_owned(), stdin).await
            }
        }
    }

    /// Is our input JSON-like?
    pub fn is_json_like(&self) -> bool {
        self.is_json_like
    }

    /// Where our input comes from.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl AsyncRead for SmartReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        // `Pin` is the most mysterious of arts in Rust.
        //
        // See https://stackoverflow.com/a/75728106 and
        // https://users.rust-lang.org/t/impl-future-around-a-poll-method-that-returns-a-ref/39202/4
        Pin::get_mut(self).reader.as_mut().poll_read(cx, buf)
    }
}

impl AsyncBufRead for SmartReader {
    fn poll_fill_buf(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> std::task::Poll<std::io::Result<&[u8]>> {
        Pin::get_mut(self).reader.as_mut().poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::get_mut(self).reader.as_mut().consume(amt)
    }
}

/// Count JSONL or CSV records in a file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn count_jsonl_or_csv_records(
    ui: &Ui,
    path: &Path,
) -> Result<(usize, Option<usize>)> {
    // If this isn't a file, we can't count records. This may happen if our
    // input is a named pipe.
    if !path.is_file() {
        return Ok((0, None));
    }

    let spinner = ui.counting_spinner();

    let reader = SmartReader::new_from_path_or_stdin(Some(path)).await?;
    let count = if reader.is_json_like() {
        let lines = LinesStream::new(reader.lines());
        lines
            .try_fold(0, |acc, line| async move {
                Ok(if line.trim().is_empty() { acc } else { acc + 1 })
            })
            .await?
    } else {
        csv_async::AsyncReaderBuilder::new()
            .create_reader(reader)
            .into_byte_records()
            .try_fold(0, |acc, _record| async move { Ok(acc + 1) })
            .await?
    };
    spinner.finish_with_message(format!("Found {count} input files"));
    Ok((count, Some(count)))
}

/// Read JSONL or CSV records from a file or stdin, and deserialize each one
/// as a `T`.
///
/// CSV columns are all read as strings.
pub async fn read_jsonl_or_csv<T>(ui: &Ui, path: Option<&Path>) -> Result<BoxedStream<Result<T>>>
where
    T: DeserializeOwned + Send + 'static,
{
    let size_hint = match path {
        Some(path) => count_jsonl_or_csv_records(ui, path).await?,
        None => (0, None),
    };

    let reader = SmartReader::new_from_path_or_stdin(path).await?;
    let description = Arc::new(reader.description.clone());
    if reader.is_json_like() {
        let lines = LinesStream::new(reader.lines())
            .try_filter(|line| futures::future::ready(!line.trim().is_empty()))
            .with_size_hint(size_hint);
        Ok(Box::pin(lines.map(move |line| {
            let line = line?;
            serde_json::from_str::<T>(&line).with_context(|| {
                format!(
                    "Failed to parse JSON from line in {:?}: {:?}",
                    description, line
                )
            })
        })))
    } else {
        let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(reader);
        let headers = Arc::new(
            reader
                .headers()
                .await
                .with_context(|| {
                    format!("Failed to read CSV headers from {:?}", description)
                })?
                .to_owned(),
        );
        Ok(Box::pin(
            reader
                .into_records()
                .with_size_hint(size_hint)
                .map(move |record| {
                    let record = record.with_context(|| {
                        format!("Failed to read CSV record from {:?}", description)
                    })?;
                    let map: Map<String, Value> = headers
                        .iter()
                        .zip(record.iter())
                        .map(|(header, value)| {
                            (header.to_owned(), Value::String(value.to_owned()))
                        })
                        .collect();
                    serde_json::from_value::<T>(Value::Object(map)).with_context(|| {
                        format!("Invalid CSV record in {:?}: {:?}", description, record)
                    })
                }),
        ))
    }
}

/// Create an [`AsyncWrite`] for a file or stdout. Files are either truncated
/// or appended to.
pub async fn create_writer(
    path: Option<&Path>,
    append: bool,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

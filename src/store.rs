//! The document store: an append-only JSONL file of [`StoredDocument`]
//! records, one per recognized input file.
//!
//! Several files may finish at once, so writes go through an async mutex, and
//! each record is flushed as soon as it is written. A `print --follow` reader
//! watching the same file sees each document as soon as it lands.

use std::{collections::VecDeque, time::Duration};

use futures::{StreamExt as _, stream};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader, BufWriter},
    sync::Mutex,
};
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;

use crate::{
    async_utils::{
        BoxedStream,
        io::{SmartReader, create_writer},
    },
    models::StoredDocument,
    prelude::*,
};

/// How often a follower checks for newly appended records.
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Somewhere to put recognized documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store a document.
    async fn put(&self, document: &StoredDocument) -> Result<()>;
}

/// A [`DocumentStore`] which appends JSONL records to a file or standard
/// output.
pub struct JsonlDocumentStore {
    description: String,
    writer: Mutex<BufWriter<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>>>,
}

impl JsonlDocumentStore {
    /// Open a store at `path`, appending to any existing records. With no
    /// path, records are written to standard output.
    pub async fn open(path: Option<&Path>) -> Result<Self> {
        let description = match path {
            Some(path) => path.display().to_string(),
            None => "stdout".to_owned(),
        };
        Ok(Self::from_writer(description, create_writer(path, true).await?))
    }

    /// Wrap an existing writer.
    pub fn from_writer(
        description: String,
        writer: Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>,
    ) -> Self {
        Self {
            description,
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }
}

#[async_trait]
impl DocumentStore for JsonlDocumentStore {
    #[instrument(level = "debug", skip_all, fields(name = %document.name()))]
    async fn put(&self, document: &StoredDocument) -> Result<()> {
        let mut json = serde_json::to_string(document).with_context(|| {
            format!("Failed to serialize document {:?}", document.name())
        })?;
        json.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(json.as_bytes())
            .await
            .with_context(|| format!("Failed to write document to {}", self.description))?;
        writer
            .flush()
            .await
            .with_context(|| format!("Failed to flush {}", self.description))?;
        debug!(store = %self.description, "Stored document");
        Ok(())
    }
}

/// Parse one JSONL record.
fn parse_record(description: &str, line: &str) -> Result<StoredDocument> {
    serde_json::from_str(line).with_context(|| {
        format!("Failed to parse document from line in {description:?}: {line:?}")
    })
}

/// Read every document currently in a store (or standard input).
pub async fn read_documents(path: Option<&Path>) -> Result<BoxedStream<Result<StoredDocument>>> {
    let reader = SmartReader::new_from_path_or_stdin(path).await?;
    let description = reader.description().to_owned();
    let lines = LinesStream::new(reader.lines());
    Ok(Box::pin(lines.filter_map(move |line| {
        let result = match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(parse_record(&description, &line)),
            Err(e) => Some(
                Err(e).with_context(|| format!("Failed to read from {description:?}")),
            ),
        };
        async move { result }
    })))
}

/// State for [`follow_documents`].
struct Follower {
    description: String,
    reader: BufReader<File>,
    partial: String,
    complete: VecDeque<String>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl Follower {
    /// Wait for the next complete, non-blank line, or `None` once cancelled.
    async fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(line) = self.complete.pop_front() {
                return Some(Ok(line));
            }
            let read = self.reader.read_line(&mut self.partial).await;
            match read {
                Err(e) => {
                    return Some(Err(e).with_context(|| {
                        format!("Failed to read from {:?}", self.description)
                    }));
                }
                Ok(0) => {
                    // At the end of the file, possibly mid-line. Wait for the
                    // writer to append more.
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = self.cancel.cancelled() => return None,
                    }
                }
                Ok(_) if self.partial.ends_with('\n') => {
                    let line = std::mem::take(&mut self.partial);
                    if !line.trim().is_empty() {
                        self.complete.push_back(line);
                    }
                }
                Ok(_) => {}
            }
        }
    }
}

/// Read every document in a store, then keep waiting for new ones until
/// `cancel` fires.
///
/// A partially written last line is held back until its newline arrives.
pub async fn follow_documents(
    path: &Path,
    cancel: CancellationToken,
) -> Result<BoxedStream<Result<StoredDocument>>> {
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open file at path: {:?}", path))?;
    let follower = Follower {
        description: path.display().to_string(),
        reader: BufReader::new(file),
        partial: String::new(),
        complete: VecDeque::new(),
        poll_interval: FOLLOW_POLL_INTERVAL,
        cancel,
    };
    Ok(Box::pin(stream::unfold(follower, |mut follower| async move {
        let line = follower.next_line().await?;
        let record = line.and_then(|line| parse_record(&follower.description, &line));
        Some((record, follower))
    })))
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt as _;
    use tokio::io::AsyncWriteExt as _;

    use super::*;
    use crate::models::{Document, Line, LinesPage, Page};

    fn document(name: &str, lines: &[&str]) -> StoredDocument {
        let page = Page {
            original_width: 100,
            original_height: 100,
            scaled_width: 100,
            scaled_height: 100,
            content: LinesPage {
                lines: lines
                    .iter()
                    .map(|t| Line {
                        text: (*t).to_owned(),
                        ..Line::default()
                    })
                    .collect(),
            },
        };
        Document::assemble(name, vec![page]).into_stored()
    }

    #[tokio::test]
    async fn stored_documents_can_be_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.jsonl");
        let store = JsonlDocumentStore::open(Some(&path)).await.unwrap();
        store.put(&document("a.tif", &["alpha"])).await.unwrap();
        store.put(&document("b.tif", &["beta"])).await.unwrap();

        let docs: Vec<_> = read_documents(Some(&path))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(docs, vec![document("a.tif", &["alpha"]), document("b.tif", &["beta"])]);
    }

    #[tokio::test]
    async fn reopening_a_store_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.jsonl");
        for name in ["a.tif", "b.tif"] {
            let store = JsonlDocumentStore::open(Some(&path)).await.unwrap();
            store.put(&document(name, &[])).await.unwrap();
        }
        let docs: Vec<_> = read_documents(Some(&path))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn bad_records_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.jsonl");
        tokio::fs::write(&path, "{\"type\":\"ocr\",\"name\":\"a.tif\",\"pages\":[]}\n\n{\"nope\n")
            .await
            .unwrap();
        let results: Vec<_> = read_documents(Some(&path)).await.unwrap().collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn followers_wait_for_complete_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.jsonl");
        let first = serde_json::to_string(&document("a.tif", &["alpha"])).unwrap();
        let second = serde_json::to_string(&document("b.tif", &["beta"])).unwrap();
        let (second_head, second_tail) = second.split_at(10);
        tokio::fs::write(&path, format!("{first}\n{second_head}"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let mut docs = follow_documents(&path, cancel.clone()).await.unwrap();
        assert_eq!(docs.try_next().await.unwrap().unwrap().name(), "a.tif");

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(format!("{second_tail}\n").as_bytes())
            .await
            .unwrap();
        file.flush().await.unwrap();
        assert_eq!(docs.try_next().await.unwrap().unwrap().name(), "b.tif");

        cancel.cancel();
        assert!(docs.try_next().await.unwrap().is_none());
    }
}

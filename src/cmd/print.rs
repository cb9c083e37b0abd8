//! The `print` subcommand.

use clap::Args;
use futures::StreamExt as _;

use super::cancel_on_interrupt;
use crate::{
    models::StoredDocument,
    prelude::*,
    printer::print_documents,
    store::{follow_documents, read_documents},
};

/// Print command line arguments.
#[derive(Debug, Args)]
pub struct PrintOpts {
    /// The JSONL document store to read. Defaults to standard input.
    pub store_path: Option<PathBuf>,

    /// Maximum number of documents to print per batch.
    #[clap(long, default_value = "16", value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: u64,

    /// Keep watching the store for new documents until interrupted.
    #[clap(long, requires = "store_path")]
    pub follow: bool,
}

/// The `print` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_print(opts: &PrintOpts) -> Result<()> {
    let documents = match (&opts.store_path, opts.follow) {
        (Some(path), true) => follow_documents(path, cancel_on_interrupt(None)).await?,
        (path, _) => read_documents(path.as_deref()).await?,
    };

    let batch_size = usize::try_from(opts.batch_size).unwrap_or(usize::MAX);
    let mut batches = documents.ready_chunks(batch_size);
    let mut printed = 0;
    while let Some(batch) = batches.next().await {
        let batch = batch.into_iter().collect::<Result<Vec<StoredDocument>>>()?;
        debug!(count = batch.len(), "Printing batch of documents");
        print_documents(&batch);
        printed += batch.len();
    }
    info!("Printed {printed} documents");
    Ok(())
}


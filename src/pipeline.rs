//! Turning one TIFF file into one recognized [`Document`].
//!
//! Pages are recognized one at a time, in frame order, so the document's pages
//! always match the TIFF's frames. Any failure aborts the whole file: we never
//! produce a document with missing pages.

use futures::TryStreamExt as _;
use tokio_util::sync::CancellationToken;

use crate::{
    async_utils::blocking_iter_streams::BlockingIterStream,
    config::{PageLimits, PollPolicy},
    error::OcrError,
    imaging::pages::PageIter,
    models::{Document, Page},
    prelude::*,
    recognition::{RecognitionBackend, recognize_page},
    retry::with_transient_retries,
};

/// Options controlling how we recognize each file.
#[derive(Clone, Debug, Default)]
pub struct PipelineOptions {
    /// Size and format limits for pages we send.
    pub limits: PageLimits,
    /// How long to wait for asynchronous operations.
    pub poll_policy: PollPolicy,
    /// How many times to retry a page after a known transient failure.
    pub transient_retries: u8,
}

/// Recognize every page of a TIFF file.
///
/// `bytes` is dropped, along with every decoded frame, before this returns.
#[instrument(level = "info", skip_all, fields(name = %name))]
pub async fn recognize_file<B>(
    backend: &B,
    name: &str,
    bytes: Vec<u8>,
    options: &PipelineOptions,
    cancel: &CancellationToken,
) -> Result<Document<B::Content>>
where
    B: RecognitionBackend + ?Sized,
{
    info!("Processing {} bytes...", bytes.len());

    let iter = PageIter::from_bytes(name, bytes, options.limits.clone())?;
    let total_pages = iter.total_pages();
    let mut page_images = BlockingIterStream::new(iter);

    let mut pages = Vec::with_capacity(total_pages);
    while let Some(image) = page_images.try_next().await? {
        let page_name = image.name();
        if cancel.is_cancelled() {
            warn!("Cancelled before recognizing {page_name}");
            return Err(OcrError::RecognitionTimedOut { page: page_name }.into());
        }
        info!("Recognizing {page_name} ({}x{})...", image.scaled_width, image.scaled_height);
        let content = with_transient_retries(options.transient_retries, || {
            recognize_page(backend, &image, &options.poll_policy, cancel)
        })
        .await?;
        pages.push(Page::new(&image, content));
    }

    info!("Finished processing!");
    Ok(Document::assemble(name, pages))
}

//! The `recognize` subcommand.

use std::{sync::Arc, time::Duration};

use clap::Args;
use futures::StreamExt as _;
use schemars::JsonSchema;
use tokio_util::sync::CancellationToken;

use super::{FileCounters, StreamOpts, cancel_on_interrupt, until_cancelled};
use crate::{
    async_utils::io::read_jsonl_or_csv,
    config::{PageFormat, PageLimits, PollPolicy, ServiceConfig},
    models::{Backend, PageContent},
    pipeline::{PipelineOptions, recognize_file},
    prelude::*,
    rate_limit::RateLimit,
    recognition::{
        RecognitionBackend,
        client::ClientOptions,
        ocr::{self, OcrBackend},
        recognize_text::{self, RecognitionMode, RecognizeTextBackend},
    },
    store::{DocumentStore, JsonlDocumentStore},
    ui::Ui,
};

/// One input file.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct FileInput {
    /// The document name to store. Defaults to the file name of `path`.
    #[serde(default)]
    pub name: Option<String>,

    /// Path to a multi-page TIFF.
    pub path: PathBuf,
}

impl FileInput {
    /// The name to use for this document.
    pub fn document_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self
                .path
                .file_name()
                .unwrap_or(self.path.as_os_str())
                .to_string_lossy()
                .into_owned(),
        }
    }
}

/// Page size and format options.
#[derive(Debug, Clone, Args)]
pub struct PageOpts {
    /// Pages wider than this are scaled down.
    #[clap(long, default_value = "3200")]
    max_width: u32,

    /// Pages taller than this are scaled down.
    #[clap(long, default_value = "3200")]
    max_height: u32,

    /// Pages narrower than this, after scaling, are rejected.
    #[clap(long, default_value = "40")]
    min_width: u32,

    /// Pages shorter than this, after scaling, are rejected.
    #[clap(long, default_value = "40")]
    min_height: u32,

    /// Encoded pages larger than this many bytes are rejected.
    #[clap(long, default_value = "4194304")]
    max_page_bytes: usize,

    /// The image format to send.
    #[clap(long, value_enum, default_value = "jpeg")]
    page_format: PageFormat,
}

impl PageOpts {
    fn to_limits(&self) -> PageLimits {
        PageLimits {
            max_width: self.max_width,
            max_height: self.max_height,
            min_width: self.min_width,
            min_height: self.min_height,
            max_bytes: self.max_page_bytes,
            format: self.page_format,
        }
    }
}

/// Options for talking to the OCR service.
#[derive(Debug, Clone, Args)]
pub struct ServiceOpts {
    /// Maximum number of times to check on an asynchronous operation.
    #[clap(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    max_poll_attempts: u32,

    /// Before status check N, wait N times this many milliseconds.
    #[clap(long, default_value = "1000")]
    poll_backoff_ms: u64,

    /// Language hint for the `ocr` backend.
    #[clap(long, default_value = "en")]
    language: String,

    /// What kind of text the `recognize-text` backend should look for.
    #[clap(long, value_enum, default_value = "printed")]
    mode: RecognitionMode,

    /// Rate limit for requests to the service, e.g. "10/s" or "100/m".
    #[clap(long)]
    rate_limit: Option<RateLimit>,

    /// Timeout for each HTTP request, in seconds.
    #[clap(long, default_value = "30")]
    request_timeout: u64,

    /// How many times to resubmit a page after a known transient failure,
    /// such as HTTP 429 or 503.
    #[clap(long, default_value = "0")]
    transient_retries: u8,

    /// Give up on outstanding pages after this many seconds.
    #[clap(long)]
    deadline: Option<u64>,
}

impl ServiceOpts {
    fn client_options(&self) -> ClientOptions {
        ClientOptions {
            request_timeout: Duration::from_secs(self.request_timeout),
            rate_limit: self.rate_limit,
        }
    }
}

/// Recognize command line arguments.
#[derive(Debug, Args)]
pub struct RecognizeOpts {
    /// A JSONL or CSV file listing TIFFs to recognize, with a `path` and an
    /// optional `name` for each. Defaults to standard input.
    pub input_path: Option<PathBuf>,

    /// Which OCR service to use.
    #[clap(long, value_enum, default_value = "recognize-text")]
    pub backend: Backend,

    /// The JSONL document store to append recognized documents to. Defaults
    /// to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub stream_opts: StreamOpts,

    #[clap(flatten)]
    pub page_opts: PageOpts,

    #[clap(flatten)]
    pub service_opts: ServiceOpts,
}

/// The `recognize` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_recognize(ui: Ui, opts: &RecognizeOpts) -> Result<()> {
    let service = &opts.service_opts;
    match opts.backend {
        Backend::Ocr => {
            let config = ServiceConfig::from_env(ocr::ENV_PREFIX)?;
            info!(endpoint = %config.endpoint(), "Using synchronous OCR service");
            let backend = OcrBackend::new(config, &service.client_options(), &service.language)?;
            recognize_all(ui, Arc::new(backend), opts).await
        }
        Backend::RecognizeText => {
            let config = ServiceConfig::from_env(recognize_text::ENV_PREFIX)?;
            info!(endpoint = %config.endpoint(), "Using asynchronous text recognition service");
            let backend =
                RecognizeTextBackend::new(config, &service.client_options(), service.mode)?;
            recognize_all(ui, Arc::new(backend), opts).await
        }
    }
}

/// Recognize every file in our input using `backend`.
async fn recognize_all<B>(ui: Ui, backend: Arc<B>, opts: &RecognizeOpts) -> Result<()>
where
    B: RecognitionBackend + 'static,
{
    let service = &opts.service_opts;
    let pipeline_opts = Arc::new(PipelineOptions {
        limits: opts.page_opts.to_limits(),
        poll_policy: PollPolicy::new(
            service.max_poll_attempts,
            Duration::from_millis(service.poll_backoff_ms),
        ),
        transient_retries: service.transient_retries,
    });
    let backend_kind = <B::Content as PageContent>::BACKEND;
    debug!(
        backend = ?backend_kind,
        ?pipeline_opts,
        max_wait_per_page = ?pipeline_opts.poll_policy.worst_case_wait(),
        "Starting recognition"
    );

    let store: Arc<dyn DocumentStore> =
        Arc::new(JsonlDocumentStore::open(opts.output_path.as_deref()).await?);
    let cancel = cancel_on_interrupt(service.deadline.map(Duration::from_secs));

    let input = read_jsonl_or_csv::<FileInput>(&ui, opts.input_path.as_deref()).await?;
    let input = until_cancelled(opts.stream_opts.apply_stream_input_opts(input), &cancel);

    let pb = ui.file_progress(input.size_hint());

    let counters = FileCounters::default();
    let results = input
        .map(|input| {
            let backend = backend.clone();
            let store = store.clone();
            let pipeline_opts = pipeline_opts.clone();
            let cancel = cancel.clone();
            async move {
                let input = input?;
                recognize_one(&*backend, &*store, &input, &pipeline_opts, &cancel).await
            }
        })
        .buffered(opts.stream_opts.job_count.max(1));
    let mut results = pb.clone().wrap_stream(results);

    while let Some(result) = results.next().await {
        if let Err(err) = &result {
            error!("{err:?}");
        }
        counters.record(&result);
    }
    pb.finish_using_style();
    if cancel.is_cancelled() {
        warn!("Cancelled, so remaining input files were not recognized");
    }

    counters.finish(&ui, opts.stream_opts.allowed_failure_rate)
}

/// Recognize one file and store the result.
async fn recognize_one<B>(
    backend: &B,
    store: &dyn DocumentStore,
    input: &FileInput,
    options: &PipelineOptions,
    cancel: &CancellationToken,
) -> Result<()>
where
    B: RecognitionBackend + ?Sized,
{
    let name = input.document_name();
    let bytes = tokio::fs::read(&input.path)
        .await
        .with_context(|| format!("Failed to read {:?}", input.path))?;
    let document = recognize_file(backend, &name, bytes, options, cancel)
        .await
        .with_context(|| format!("Failed to recognize {name:?}"))?;
    store.put(&document.into_stored()).await
}

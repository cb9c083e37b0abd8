//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;
use tokio::io::AsyncWriteExt as _;

use super::recognize::FileInput;
use crate::{async_utils::io::create_writer, models::StoredDocument, prelude::*};

/// The different schema types we support.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SchemaType {
    /// A recognized document, as written to the document store.
    Document,
    /// One record of the `recognize` input listing.
    FileInput,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::Document => schema_for!(StoredDocument),
        SchemaType::FileInput => schema_for!(FileInput),
    };

    let mut wtr = create_writer(schema_opts.output_path.as_deref(), false).await?;
    let mut schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;
    schema_str.push('\n');
    wtr.write_all(schema_str.as_bytes())
        .await
        .context("failed to write schema")?;
    wtr.flush().await.context("failed to flush schema")?;
    Ok(())
}

//! Rendering stored documents as plain text.

use crate::{imaging::pages::page_name, models::StoredDocument, prelude::*};

/// Indentation for each line of recognized text.
const INDENT: &str = "    ";

/// Render a document: a header line per page, followed by that page's text,
/// indented.
pub fn render_document(document: &StoredDocument) -> String {
    let pages = document.page_lines();
    let total_pages = pages.len();
    let mut out = String::new();
    for (i, lines) in pages.iter().enumerate() {
        out.push_str(&page_name(document.name(), i + 1, total_pages));
        out.push('\n');
        for line in lines {
            out.push_str(INDENT);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Log a batch of documents.
pub fn print_documents(documents: &[StoredDocument]) {
    for document in documents {
        print_document(document);
    }
}

/// Log the recognized text of one document.
#[instrument(level = "info", skip_all, fields(name = %document.name(), backend = ?document.backend()))]
pub fn print_document(document: &StoredDocument) {
    info!("Showing recognized text...");
    let rendered = render_document(document);
    if !rendered.is_empty() {
        info!("\n{}", rendered.trim_end());
    }
    info!("Finished showing recognized text!");
}

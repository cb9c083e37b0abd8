//! Recognized documents, as stored in the document store.
//!
//! A [`Document`] holds one [`Page`] per TIFF frame, in frame order. The page
//! content depends on which backend recognized it: the `ocr` backend returns a
//! region/line/word hierarchy plus layout metadata ([`RegionsPage`]), while the
//! `recognize_text` backend returns a flat list of lines ([`LinesPage`]).
//!
//! Field names are camelCase, and `width`/`height` are the scaled size. We
//! write `type` as `ocr` or `recognize_text`, but also read the `MSOCR` and
//! `OneOCR` tags used by older stores.

use std::fmt::Debug;

use schemars::JsonSchema;
use serde::{Deserializer, de::DeserializeOwned};

use crate::{imaging::pages::PageImage, prelude::*};

/// The backends we know how to talk to.
#[derive(
    Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Synchronous OCR, returning regions, lines and words in one round trip.
    Ocr,
    /// Asynchronous text recognition, which must be polled until it finishes.
    RecognizeText,
}

/// Content recognized on one page, for a particular backend.
pub trait PageContent:
    Clone + Debug + Serialize + DeserializeOwned + JsonSchema + Send + Sync + 'static
{
    /// The backend which produces this kind of page.
    const BACKEND: Backend;

    /// The recognized text, one entry per line, in reading order.
    fn text_lines(&self) -> Vec<String>;

    /// Wrap a document of these pages in the tagged record we store.
    fn into_stored(document: Document<Self>) -> StoredDocument;
}

/// A recognized document.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document<C> {
    /// The name of the input file.
    pub name: String,

    /// One entry per page, in the same order as the frames in the input.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        bound(deserialize = "C: Deserialize<'de>")
    )]
    #[schemars(with = "Vec<Page<C>>")]
    pub pages: Vec<Page<C>>,
}

impl<C: PageContent> Document<C> {
    /// Assemble a document from its recognized pages.
    ///
    /// This does no validation, and zero pages is fine.
    pub fn assemble(name: impl Into<String>, pages: Vec<Page<C>>) -> Self {
        Self {
            name: name.into(),
            pages,
        }
    }

    /// Convert into the tagged record we store.
    pub fn into_stored(self) -> StoredDocument {
        C::into_stored(self)
    }
}

/// A stored document, tagged with the backend that produced it.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoredDocument {
    /// Pages recognized by the synchronous `ocr` backend.
    #[serde(alias = "MSOCR")]
    Ocr(Document<RegionsPage>),
    /// Pages recognized by the asynchronous `recognize_text` backend.
    #[serde(alias = "OneOCR")]
    RecognizeText(Document<LinesPage>),
}

impl StoredDocument {
    /// The backend which produced this document.
    pub fn backend(&self) -> Backend {
        match self {
            StoredDocument::Ocr(_) => Backend::Ocr,
            StoredDocument::RecognizeText(_) => Backend::RecognizeText,
        }
    }

    /// The name of the input file.
    pub fn name(&self) -> &str {
        match self {
            StoredDocument::Ocr(doc) => &doc.name,
            StoredDocument::RecognizeText(doc) => &doc.name,
        }
    }

    /// The recognized text of each page, one entry per line.
    pub fn page_lines(&self) -> Vec<Vec<String>> {
        fn lines<C: PageContent>(doc: &Document<C>) -> Vec<Vec<String>> {
            doc.pages.iter().map(|p| p.content.text_lines()).collect()
        }
        match self {
            StoredDocument::Ocr(doc) => lines(doc),
            StoredDocument::RecognizeText(doc) => lines(doc),
        }
    }
}

/// One recognized page.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<C> {
    /// Width of the frame before it was scaled to fit the service's limits.
    pub original_width: u32,

    /// Height of the frame before scaling.
    pub original_height: u32,

    /// Width of the image sent to the service.
    #[serde(rename = "width")]
    pub scaled_width: u32,

    /// Height of the image sent to the service.
    #[serde(rename = "height")]
    pub scaled_height: u32,

    /// What the backend recognized.
    #[serde(flatten)]
    pub content: C,
}

impl<C> Page<C> {
    /// Build a page from the image we sent and what came back.
    pub fn new(image: &PageImage, content: C) -> Self {
        Self {
            original_width: image.original_width,
            original_height: image.original_height,
            scaled_width: image.scaled_width,
            scaled_height: image.scaled_height,
            content,
        }
    }
}

/// A page recognized by the `ocr` backend.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionsPage {
    /// BCP-47 language code of the text.
    #[serde(default, deserialize_with = "null_as_default")]
    #[schemars(with = "String")]
    pub language: String,

    /// Angle, in degrees, of the detected text.
    #[serde(default, deserialize_with = "null_as_default")]
    #[schemars(with = "f64")]
    pub text_angle: f64,

    /// Orientation of the text (`Up`, `Down`, `Left`, `Right` or `NotDetected`).
    #[serde(default, deserialize_with = "null_as_default")]
    #[schemars(with = "String")]
    pub orientation: String,

    /// Regions of text, in reading order.
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl PageContent for RegionsPage {
    const BACKEND: Backend = Backend::Ocr;

    fn text_lines(&self) -> Vec<String> {
        self.regions
            .iter()
            .flat_map(|region| &region.lines)
            .map(|line| {
                line.words
                    .iter()
                    .map(|w| w.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    fn into_stored(document: Document<Self>) -> StoredDocument {
        StoredDocument::Ocr(document)
    }
}

/// A block of text found by the `ocr` backend.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    /// `"left,top,width,height"` in page pixels.
    #[serde(default)]
    pub bounding_box: String,

    /// Lines in this region.
    #[serde(default)]
    pub lines: Vec<RegionLine>,
}

/// A line of text found by the `ocr` backend.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionLine {
    /// `"left,top,width,height"` in page pixels.
    #[serde(default)]
    pub bounding_box: String,

    /// Words in this line.
    #[serde(default)]
    pub words: Vec<RegionWord>,
}

/// A word found by the `ocr` backend.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionWord {
    /// `"left,top,width,height"` in page pixels.
    #[serde(default)]
    pub bounding_box: String,

    /// The recognized text.
    pub text: String,
}

/// A page recognized by the `recognize_text` backend.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinesPage {
    /// Lines of text, in reading order.
    #[serde(default)]
    pub lines: Vec<Line>,
}

impl PageContent for LinesPage {
    const BACKEND: Backend = Backend::RecognizeText;

    fn text_lines(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.text.clone()).collect()
    }

    fn into_stored(document: Document<Self>) -> StoredDocument {
        StoredDocument::RecognizeText(document)
    }
}

/// A line of text found by the `recognize_text` backend.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    /// Four corners (x, y), clockwise from top-left.
    #[serde(default)]
    pub bounding_box: Vec<i32>,

    /// The text of the whole line.
    pub text: String,

    /// Words in this line.
    #[serde(default)]
    pub words: Vec<Word>,
}

/// A word found by the `recognize_text` backend.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    /// Four corners (x, y), clockwise from top-left.
    #[serde(default)]
    pub bounding_box: Vec<i32>,

    /// The recognized text.
    pub text: String,

    /// `"Low"` when the service is unsure of this word.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn lines_page(texts: &[&str]) -> Page<LinesPage> {
        Page {
            original_width: 6400,
            original_height: 4800,
            scaled_width: 3200,
            scaled_height: 2400,
            content: LinesPage {
                lines: texts
                    .iter()
                    .map(|t| Line {
                        bounding_box: vec![0, 0, 10, 0, 10, 10, 0, 10],
                        text: (*t).to_owned(),
                        words: vec![],
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn stored_document_uses_camel_case_field_names() {
        let doc = Document::assemble("scan.tif", vec![lines_page(&["hello"])]).into_stored();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["type"], "recognize_text");
        assert_eq!(value["name"], "scan.tif");
        let page = &value["pages"][0];
        assert_eq!(page["originalWidth"], 6400);
        assert_eq!(page["originalHeight"], 4800);
        assert_eq!(page["width"], 3200);
        assert_eq!(page["height"], 2400);
        assert_eq!(page["lines"][0]["text"], "hello");
    }

    #[test]
    fn assembled_document_reads_back_unchanged() {
        let pages = vec![lines_page(&["one"]), lines_page(&["two"]), lines_page(&["three"])];
        let doc = Document::assemble("scan.tif", pages.clone()).into_stored();
        let json = serde_json::to_string(&doc).unwrap();
        let read_back: StoredDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(read_back, doc);
        assert_eq!(read_back.name(), "scan.tif");
        assert_eq!(
            read_back.page_lines(),
            vec![vec!["one"], vec!["two"], vec!["three"]]
        );
    }

    #[test]
    fn empty_document_is_allowed() {
        let doc = Document::<RegionsPage>::assemble("empty.tif", vec![]);
        assert!(doc.pages.is_empty());
        assert_eq!(doc.into_stored().backend(), Backend::Ocr);
    }

    #[test]
    fn null_or_missing_pages_read_as_empty() {
        let null_pages: StoredDocument =
            serde_json::from_value(json!({ "type": "ocr", "name": "a.tif", "pages": null }))
                .unwrap();
        assert!(null_pages.page_lines().is_empty());
        let missing_pages: StoredDocument =
            serde_json::from_value(json!({ "type": "recognize_text", "name": "b.tif" }))
                .unwrap();
        assert!(missing_pages.page_lines().is_empty());
    }

    #[test]
    fn older_store_tags_are_accepted() {
        let one_ocr: StoredDocument = serde_json::from_value(json!({
            "type": "OneOCR",
            "name": "memo.tif",
            "pages": [{
                "originalWidth": 2550, "originalHeight": 3300, "width": 2550, "height": 3300,
                "lines": [{ "boundingBox": [1, 2, 3, 4, 5, 6, 7, 8], "text": "To whom",
                            "words": [{ "boundingBox": [1, 2, 3, 4, 5, 6, 7, 8], "text": "To", "confidence": null }] }]
            }]
        }))
        .unwrap();
        assert_eq!(one_ocr.backend(), Backend::RecognizeText);
        assert_eq!(one_ocr.page_lines(), vec![vec!["To whom"]]);

        let ms_ocr: StoredDocument = serde_json::from_value(json!({
            "type": "MSOCR",
            "name": "memo.tif",
            "pages": [{
                "originalWidth": 40, "originalHeight": 40, "width": 40, "height": 40,
                "language": "en", "textAngle": null, "orientation": null, "regions": []
            }]
        }))
        .unwrap();
        assert_eq!(ms_ocr.backend(), Backend::Ocr);
        // We always write our own tags.
        assert_eq!(serde_json::to_value(&ms_ocr).unwrap()["type"], "ocr");
    }

    #[test]
    fn region_lines_join_words_with_single_spaces() {
        let page: RegionsPage = serde_json::from_value(json!({
            "language": "en",
            "textAngle": -1.5,
            "orientation": "Up",
            "regions": [{
                "boundingBox": "21,16,304,451",
                "lines": [
                    { "boundingBox": "28,16,288,41", "words": [
                        { "boundingBox": "28,16,288,41", "text": "NOTHING" }
                    ]},
                    { "boundingBox": "27,66,283,52", "words": [
                        { "boundingBox": "27,66,126,52", "text": "EXISTS" },
                        { "boundingBox": "166,66,117,52", "text": "EXCEPT" }
                    ]}
                ]
            }]
        }))
        .unwrap();
        assert_eq!(page.text_angle, -1.5);
        assert_eq!(page.text_lines(), vec!["NOTHING", "EXISTS EXCEPT"]);
    }
}

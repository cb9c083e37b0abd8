//! Turning TIFF frames into images the OCR services will accept.

pub mod fit;
pub mod pages;

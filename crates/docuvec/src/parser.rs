//! Document parser contract and a stub implementation.
//!
//! The document parser is out of scope for this crate: production
//! deployments supply their own [`Parser`] for PDF/DOCX/PPTX, mapping
//! pages to rasters and text. [`PlainTextParser`] exists so the ingestion
//! pipeline below has something to exercise in tests and local use.

use std::path::Path;

use async_trait::async_trait;
use docuvec_core::models::DocumentStructure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read '{0}': {1}")]
    Io(String, String),
    #[error("parser timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// One rasterized page plus its extracted text, prior to chunking and
/// embedding.
pub struct ParsedPage {
    pub page: u32,
    pub image_bytes: Vec<u8>,
    pub image_width: u32,
    pub image_height: u32,
    pub image_path: String,
    pub thumb_path: String,
    pub format: String,
    pub mimetype: String,
    pub text: String,
}

/// The full output of a parse pass (SPEC_FULL.md §4.4 stage 1).
pub struct ParsedDocument {
    pub pages: Vec<ParsedPage>,
    pub structure_by_page: std::collections::BTreeMap<u32, DocumentStructure>,
}

#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, file_ref: &Path) -> Result<ParsedDocument, ParseError>;
}

/// Treats the whole input file as a single page of fixed dimensions, with
/// its raw bytes interpreted as UTF-8 text (lossily). No structure is
/// extracted. Good enough to drive the pipeline end-to-end without a real
/// document parser.
pub struct PlainTextParser {
    pub page_width: u32,
    pub page_height: u32,
}

impl PlainTextParser {
    pub fn new() -> Self {
        Self {
            page_width: 1275,
            page_height: 1650,
        }
    }
}

impl Default for PlainTextParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Parser for PlainTextParser {
    async fn parse(&self, file_ref: &Path) -> Result<ParsedDocument, ParseError> {
        let bytes = tokio::fs::read(file_ref)
            .await
            .map_err(|e| ParseError::Io(file_ref.display().to_string(), e.to_string()))?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let page = ParsedPage {
            page: 1,
            image_bytes: bytes,
            image_width: self.page_width,
            image_height: self.page_height,
            image_path: format!("{}#page=1", file_ref.display()),
            thumb_path: format!("{}#page=1&thumb", file_ref.display()),
            format: "text".to_string(),
            mimetype: "text/plain".to_string(),
            text,
        };

        Ok(ParsedDocument {
            pages: vec![page],
            structure_by_page: std::collections::BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn plain_text_parser_produces_one_page_with_full_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Hello, document.").unwrap();

        let parser = PlainTextParser::new();
        let parsed = parser.parse(file.path()).await.unwrap();
        assert_eq!(parsed.pages.len(), 1);
        assert_eq!(parsed.pages[0].text, "Hello, document.");
        assert_eq!(parsed.pages[0].page, 1);
    }

    #[tokio::test]
    async fn plain_text_parser_errors_on_missing_file() {
        let parser = PlainTextParser::new();
        let err = parser.parse(Path::new("/nonexistent/path.txt")).await;
        assert!(err.is_err());
    }
}

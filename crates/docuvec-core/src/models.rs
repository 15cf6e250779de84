//! Data model shared by every component: pages, text chunks, the enhanced
//! structure layer, and the bounding boxes that tie them to page images.

use serde::{Deserialize, Serialize};

/// `[x1, y1, x2, y2]` in pixels, origin top-left, relative to the original
/// page raster. Callers must not assume `x1 < x2` / `y1 < y2` hold without
/// calling [`BBox::is_valid`]; constructors that come from a parser are
/// treated as untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// `x1 < x2`, `y1 < y2`, and all coordinates fall within the page image.
    pub fn is_valid(&self, image_width: f32, image_height: f32) -> bool {
        self.x1 < self.x2
            && self.y1 < self.y2
            && self.x1 >= 0.0
            && self.y1 >= 0.0
            && self.x2 <= image_width
            && self.y2 <= image_height
    }
}

/// Structural role of a text chunk within its parent page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Text,
    ListItem,
    TableCell,
    Caption,
    Code,
    Formula,
}

/// A heading extracted from the document, cross-linked to the chunks that
/// fall under it. `chunk_ids` is populated by the ingestion pipeline after
/// chunking (invariant 4 in SPEC_FULL.md §3: every id here must resolve to
/// a chunk whose `parent_heading` equals this heading's `text`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub text: String,
    pub level: u8,
    pub page: u32,
    pub bbox: Option<BBox>,
    #[serde(default)]
    pub chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    pub id: String,
    pub page: u32,
    pub bbox: Option<BBox>,
    pub num_rows: u32,
    pub num_cols: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureRef {
    pub id: String,
    pub page: u32,
    pub bbox: Option<BBox>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlockRef {
    pub id: String,
    pub page: u32,
    pub bbox: Option<BBox>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaRef {
    pub id: String,
    pub page: u32,
    pub bbox: Option<BBox>,
}

/// Hierarchical metadata extracted from a parsed document, scoped to one
/// page. Stored compressed via [`crate::codec`] inside the page's visual
/// record (see SPEC_FULL.md §6.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DocumentStructure {
    #[serde(default)]
    pub headings: Vec<Heading>,
    #[serde(default)]
    pub tables: Vec<TableRef>,
    #[serde(default)]
    pub pictures: Vec<PictureRef>,
    #[serde(default)]
    pub code_blocks: Vec<CodeBlockRef>,
    #[serde(default)]
    pub formulas: Vec<FormulaRef>,
}

impl DocumentStructure {
    pub fn is_empty(&self) -> bool {
        self.headings.is_empty()
            && self.tables.is_empty()
            && self.pictures.is_empty()
            && self.code_blocks.is_empty()
            && self.formulas.is_empty()
    }

    pub fn max_heading_depth(&self) -> u8 {
        self.headings.iter().map(|h| h.level).max().unwrap_or(0)
    }
}

/// Per-chunk structural context, used for bidirectional highlighting
/// between a rendered page region and its corresponding markdown text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChunkContext {
    pub parent_heading: Option<String>,
    pub parent_heading_level: Option<u8>,
    pub section_path: Option<String>,
    pub element_type: Option<ElementType>,
    #[serde(default)]
    pub related_tables: Vec<String>,
    #[serde(default)]
    pub related_pictures: Vec<String>,
    pub bbox: Option<BBox>,
    #[serde(default)]
    pub is_page_boundary: bool,
}

impl ChunkContext {
    pub fn is_empty(&self) -> bool {
        self.parent_heading.is_none()
            && self.section_path.is_none()
            && self.element_type.is_none()
            && self.related_tables.is_empty()
            && self.related_pictures.is_empty()
            && self.bbox.is_none()
    }
}

/// A single rasterized page belonging to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub doc_id: String,
    pub page: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub image_path: String,
    pub thumb_path: String,
    pub format: String,
    pub mimetype: String,
}

/// A text chunk extracted from the document. `chunk_id` follows
/// `"{doc_id}-chunk{NNNN}"` (zero-padded to 4 digits, invariant 3 in
/// SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    pub word_count: u32,
    pub page: u32,
    #[serde(default)]
    pub page_nums: Vec<u32>,
    #[serde(default)]
    pub context: ChunkContext,
}

impl TextChunk {
    pub fn text_preview(&self) -> String {
        self.text.chars().take(200).collect()
    }

    pub fn has_context(&self) -> bool {
        !self.context.is_empty()
    }
}

/// Format a zero-indexed chunk ordinal as `"{doc_id}-chunk{NNNN}"`.
pub fn format_chunk_id(doc_id: &str, ordinal: u32) -> String {
    format!("{doc_id}-chunk{ordinal:04}")
}

/// Extract the numeric suffix from a chunk id produced by
/// [`format_chunk_id`]. Returns `None` if the id's prefix does not match
/// `doc_id` or the suffix is not a valid `chunkNNNN` tail.
pub fn parse_chunk_ordinal(doc_id: &str, chunk_id: &str) -> Option<u32> {
    let prefix = format!("{doc_id}-chunk");
    chunk_id.strip_prefix(&prefix)?.parse().ok()
}

/// A document ingested into the system: its pages and text chunks plus
/// optional structure, keyed by a stable `doc_id` (SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub filename: String,
    pub timestamp: i64,
    pub pages: Vec<Page>,
    pub chunks: Vec<TextChunk>,
    #[serde(default)]
    pub structure_by_page: std::collections::BTreeMap<u32, DocumentStructure>,
}

impl Document {
    pub fn structure_for_page(&self, page: u32) -> Option<&DocumentStructure> {
        self.structure_by_page.get(&page)
    }
}

//! Wire encoding for the two payloads the vector store cannot index
//! natively: full multi-vector sequences and enhanced document structure.
//!
//! Sequences are serialized as little-endian `f32` bytes (the same
//! primitive the teacher's `vec_to_blob`/`blob_to_vec` use for single
//! vectors) and DEFLATE-compressed. Structures are serialized as compact
//! JSON, DEFLATE-compressed, and base64-encoded so they fit in a flat
//! string metadata field (SPEC_FULL.md §4.1, §6.4).

use std::io::{Read, Write};

use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::embedding::MultiVector;
use crate::models::DocumentStructure;

/// Quantization scheme used when encoding a sequence. Only `F32` is
/// implemented today (Open Question decision, see DESIGN.md): storage is
/// float32 losslessly through DEFLATE, not a lossy reduced-precision
/// format. The variant is still recorded in the header so a future
/// `Int8`/`F16` codec can be introduced without breaking old records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    F32,
}

impl Quantization {
    fn tag(self) -> u8 {
        match self {
            Quantization::F32 => 0,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Quantization::F32),
            other => Err(CodecError::SchemaMismatch(format!(
                "unknown quantization tag {other}"
            ))),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("encoded size {got} exceeds limit {limit}")]
    SizeExceeded { got: usize, limit: usize },
}

/// Per-metadata-field size limit enforced by [`encode_structure`]
/// (SPEC_FULL.md §4.1: reference 50 KB).
pub const STRUCTURE_SIZE_LIMIT: usize = 50 * 1024;

const SEQUENCE_HEADER_LEN: usize = 1 + 4 + 4; // quantization tag, dims, token count

/// Compress a multi-vector sequence into a compact byte string.
pub fn encode_sequence(mv: &MultiVector) -> Result<Vec<u8>, CodecError> {
    let dims = mv.dims() as u32;
    let tokens = mv.len() as u32;

    let mut raw = Vec::with_capacity(SEQUENCE_HEADER_LEN + mv.as_flat_slice().len() * 4);
    raw.push(Quantization::F32.tag());
    raw.extend_from_slice(&dims.to_le_bytes());
    raw.extend_from_slice(&tokens.to_le_bytes());
    for v in mv.as_flat_slice() {
        raw.extend_from_slice(&v.to_le_bytes());
    }

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| CodecError::CorruptPayload(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::CorruptPayload(e.to_string()))
}

/// Inverse of [`encode_sequence`].
pub fn decode_sequence(bytes: &[u8]) -> Result<MultiVector, CodecError> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| CodecError::CorruptPayload(e.to_string()))?;

    if raw.len() < SEQUENCE_HEADER_LEN {
        return Err(CodecError::CorruptPayload("truncated header".into()));
    }

    let _quant = Quantization::from_tag(raw[0])?;
    let dims = u32::from_le_bytes(raw[1..5].try_into().unwrap()) as usize;
    let tokens = u32::from_le_bytes(raw[5..9].try_into().unwrap()) as usize;

    let body = &raw[SEQUENCE_HEADER_LEN..];
    if body.len() != dims * tokens * 4 {
        return Err(CodecError::CorruptPayload(format!(
            "expected {} bytes of vector data, got {}",
            dims * tokens * 4,
            body.len()
        )));
    }

    let rows: Vec<f32> = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();

    MultiVector::from_flat(dims, rows)
        .ok_or_else(|| CodecError::SchemaMismatch("dims/token count inconsistent".into()))
}

/// Serialize, compress, and base64-encode a [`DocumentStructure`] for
/// storage in a flat metadata field.
pub fn encode_structure(structure: &DocumentStructure) -> Result<String, CodecError> {
    let json = serde_json::to_vec(structure)
        .map_err(|e| CodecError::SchemaMismatch(e.to_string()))?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(&json)
        .map_err(|e| CodecError::CorruptPayload(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CodecError::CorruptPayload(e.to_string()))?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(&compressed);
    if encoded.len() > STRUCTURE_SIZE_LIMIT {
        return Err(CodecError::SizeExceeded {
            got: encoded.len(),
            limit: STRUCTURE_SIZE_LIMIT,
        });
    }
    Ok(encoded)
}

/// `encode_sequence` followed by base64, for storage in a flat string
/// metadata field (store metadata values are strings/numbers/booleans
/// only — see `docuvec_core::store`'s flatness rule).
pub fn encode_sequence_b64(mv: &MultiVector) -> Result<String, CodecError> {
    let bytes = encode_sequence(mv)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Inverse of [`encode_sequence_b64`].
pub fn decode_sequence_b64(ascii: &str) -> Result<MultiVector, CodecError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(ascii)
        .map_err(|e| CodecError::CorruptPayload(e.to_string()))?;
    decode_sequence(&bytes)
}

/// Inverse of [`encode_structure`].
pub fn decode_structure(ascii: &str) -> Result<DocumentStructure, CodecError> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(ascii)
        .map_err(|e| CodecError::CorruptPayload(e.to_string()))?;

    let mut decoder = DeflateDecoder::new(&compressed[..]);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| CodecError::CorruptPayload(e.to_string()))?;

    serde_json::from_slice(&json).map_err(|e| CodecError::SchemaMismatch(e.to_string()))
}

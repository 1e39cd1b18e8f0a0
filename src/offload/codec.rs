//! Byte-level encoding of the cold form.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::sandbox::SandboxDocument;

/// Format tag written into every metadata descriptor produced by this codec.
pub const BINARY_FORMAT_V1: &str = "binary_v1";

/// Errors raised while encoding or decoding cold-storage files.
#[derive(Debug, Error)]
pub enum OffloadError {
    /// Underlying file or stream operation failed.
    #[error("offload I/O failed: {0}")]
    Io(#[from] io::Error),
    /// A JSON descriptor or sidecar could not be parsed or produced.
    #[error("offload JSON failed: {0}")]
    Json(#[from] serde_json::Error),
    /// The binary vectors file does not follow the expected layout.
    #[error("malformed vectors file: {0}")]
    Malformed(String),
    /// No descriptor exists for the requested id.
    #[error("no offloaded index '{0}'")]
    NotFound(String),
    /// The id cannot be used as a file name.
    #[error("invalid index id '{0}'")]
    InvalidId(String),
}

/// On-disk metadata descriptor, one per offloaded index.
///
/// Serialized key names are part of the format; readers accept descriptors without
/// `vectorsFile`/`format` as the legacy all-in-one-JSON form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffloadMetadata {
    /// Canonical index identifier.
    pub id: String,
    /// RFC 3339 instant the live index was created.
    pub created: String,
    /// RFC 3339 instant the index was written to disk.
    pub offloaded_at: String,
    /// Effective creation options, minus inline providers.
    pub options: Value,
    /// Number of documents the index held at offload time.
    pub document_count: u64,
    /// Embedding dimension established during the index's lifetime, if any.
    pub embedding_dimension: Option<usize>,
    /// File name of the documents sidecar (or the legacy all-in-one array).
    pub documents_file: String,
    /// File name of the binary vectors file; absent in the legacy form.
    #[serde(default)]
    pub vectors_file: Option<String>,
    /// Format tag; `"binary_v1"` for files written by this codec.
    #[serde(default)]
    pub format: Option<String>,
}

impl OffloadMetadata {
    /// Whether the descriptor points at a binary vectors file.
    pub fn is_binary_v1(&self) -> bool {
        self.format.as_deref() == Some(BINARY_FORMAT_V1) && self.vectors_file.is_some()
    }
}

/// One entry of the documents sidecar: everything but the vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarDocument {
    /// Document identifier.
    pub id: String,
    /// Stored text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Stored metadata, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Whether a vector for this document exists in the binary file.
    pub has_vector: bool,
}

impl SidecarDocument {
    /// Project a sandbox document onto its sidecar entry.
    pub fn from_document(doc: &SandboxDocument, dimension: usize) -> Self {
        Self {
            id: doc.id.clone(),
            text: doc.text.clone(),
            metadata: doc.metadata.clone(),
            has_vector: doc
                .vector
                .as_ref()
                .is_some_and(|vector| vector.len() == dimension),
        }
    }
}

/// Decoded contents of a binary vectors file, preserving file order.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorsFile {
    /// Embedding dimension shared by every entry.
    pub dimension: usize,
    /// `(id, vector)` pairs in the order they were written.
    pub entries: Vec<(String, Vec<f32>)>,
}

impl VectorsFile {
    /// Vector for the given document id, if present.
    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.entries
            .iter()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, vector)| vector.as_slice())
    }
}

/// Encode document vectors into the binary layout.
///
/// Documents whose vector is absent or whose length differs from `dimension` are skipped; the
/// leading count reflects only the entries actually written. Returns that count.
pub fn write_vectors<W: Write>(
    writer: &mut W,
    documents: &[SandboxDocument],
    dimension: usize,
) -> Result<u32, OffloadError> {
    let eligible: Vec<(&str, &[f32])> = documents
        .iter()
        .filter_map(|doc| match &doc.vector {
            Some(vector) if vector.len() == dimension => Some((doc.id.as_str(), vector.as_slice())),
            _ => None,
        })
        .collect();

    writer.write_all(&(eligible.len() as u32).to_le_bytes())?;
    writer.write_all(&(dimension as u32).to_le_bytes())?;

    for (id, vector) in &eligible {
        let id_bytes = id.as_bytes();
        writer.write_all(&(id_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(id_bytes)?;
        for value in *vector {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    Ok(eligible.len() as u32)
}

/// Decode a binary vectors file back into its `(id, vector)` entries.
pub fn read_vectors<R: Read>(reader: &mut R) -> Result<VectorsFile, OffloadError> {
    let doc_count = read_u32(reader, "document count")?;
    let dimension = read_u32(reader, "dimension")? as usize;

    let mut entries = Vec::with_capacity(doc_count as usize);
    for entry in 0..doc_count {
        let id_len = read_u32(reader, "id length")? as usize;
        let mut id_bytes = vec![0_u8; id_len];
        reader
            .read_exact(&mut id_bytes)
            .map_err(|_| OffloadError::Malformed(format!("truncated id in entry {entry}")))?;
        let id = String::from_utf8(id_bytes)
            .map_err(|_| OffloadError::Malformed(format!("non-UTF-8 id in entry {entry}")))?;

        let mut vector = Vec::with_capacity(dimension);
        let mut buffer = [0_u8; 4];
        for _ in 0..dimension {
            reader.read_exact(&mut buffer).map_err(|_| {
                OffloadError::Malformed(format!("truncated vector for document '{id}'"))
            })?;
            vector.push(f32::from_le_bytes(buffer));
        }
        entries.push((id, vector));
    }

    Ok(VectorsFile { dimension, entries })
}

fn read_u32<R: Read>(reader: &mut R, field: &str) -> Result<u32, OffloadError> {
    let mut buffer = [0_u8; 4];
    reader
        .read_exact(&mut buffer)
        .map_err(|_| OffloadError::Malformed(format!("truncated {field}")))?;
    Ok(u32::from_le_bytes(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, vector: Option<Vec<f32>>) -> SandboxDocument {
        SandboxDocument {
            id: id.to_string(),
            vector,
            text: None,
            metadata: None,
        }
    }

    #[test]
    fn two_three_dimensional_documents_encode_to_42_bytes() {
        let docs = vec![
            doc("a", Some(vec![0.1, 0.2, 0.3])),
            doc("b", Some(vec![0.4, 0.5, 0.6])),
        ];
        let mut buffer = Vec::new();
        let written = write_vectors(&mut buffer, &docs, 3).unwrap();

        assert_eq!(written, 2);
        assert_eq!(buffer.len(), 42);

        let decoded = read_vectors(&mut buffer.as_slice()).unwrap();
        assert_eq!(decoded.dimension, 3);
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0].0, "a");
        assert_eq!(decoded.entries[0].1, vec![0.1, 0.2, 0.3]);
        assert_eq!(decoded.entries[1].1, vec![0.4, 0.5, 0.6]);
    }

    #[test]
    fn round_trip_preserves_order_and_bit_patterns() {
        let values = vec![f32::MIN_POSITIVE, -0.0, 1.5e-20, 3.4e38];
        let docs = vec![
            doc("second:first", Some(values.clone())),
            doc("z", Some(vec![1.0, 2.0, 3.0, 4.0])),
        ];
        let mut buffer = Vec::new();
        write_vectors(&mut buffer, &docs, 4).unwrap();

        let decoded = read_vectors(&mut buffer.as_slice()).unwrap();
        assert_eq!(decoded.entries[0].0, "second:first");
        for (expected, actual) in values.iter().zip(decoded.entries[0].1.iter()) {
            assert_eq!(expected.to_bits(), actual.to_bits());
        }
    }

    #[test]
    fn writer_skips_missing_and_mismatched_vectors() {
        let docs = vec![
            doc("ok", Some(vec![1.0, 2.0])),
            doc("no-vector", None),
            doc("short", Some(vec![1.0])),
        ];
        let mut buffer = Vec::new();
        let written = write_vectors(&mut buffer, &docs, 2).unwrap();

        assert_eq!(written, 1);
        let decoded = read_vectors(&mut buffer.as_slice()).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].0, "ok");
    }

    #[test]
    fn truncated_input_is_malformed_not_a_panic() {
        let docs = vec![doc("a", Some(vec![0.1, 0.2, 0.3]))];
        let mut buffer = Vec::new();
        write_vectors(&mut buffer, &docs, 3).unwrap();
        buffer.truncate(buffer.len() - 2);

        let error = read_vectors(&mut buffer.as_slice()).unwrap_err();
        assert!(matches!(error, OffloadError::Malformed(_)));
    }

    #[test]
    fn metadata_serializes_with_wire_key_names() {
        let metadata = OffloadMetadata {
            id: "ws:a".to_string(),
            created: "2026-01-01T00:00:00Z".to_string(),
            offloaded_at: "2026-01-02T00:00:00Z".to_string(),
            options: serde_json::json!({}),
            document_count: 3,
            embedding_dimension: Some(384),
            documents_file: "ws:a.documents.json".to_string(),
            vectors_file: Some("ws:a.vectors.bin".to_string()),
            format: Some(BINARY_FORMAT_V1.to_string()),
        };

        let value = serde_json::to_value(&metadata).unwrap();
        for key in [
            "id",
            "created",
            "offloadedAt",
            "options",
            "documentCount",
            "embeddingDimension",
            "documentsFile",
            "vectorsFile",
            "format",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(value["format"], BINARY_FORMAT_V1);
    }

    #[test]
    fn legacy_metadata_without_format_deserializes() {
        let raw = serde_json::json!({
            "id": "old",
            "created": "2024-01-01T00:00:00Z",
            "offloadedAt": "2024-01-02T00:00:00Z",
            "options": {},
            "documentCount": 1,
            "embeddingDimension": null,
            "documentsFile": "old.documents.json"
        });

        let metadata: OffloadMetadata = serde_json::from_value(raw).unwrap();
        assert!(!metadata.is_binary_v1());
        assert!(metadata.format.is_none());
    }
}

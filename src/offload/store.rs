//! Offload directory management.
//!
//! One triple of files per index id, flat in a single directory:
//! `{id}.metadata.json`, `{id}.documents.json`, `{id}.vectors.bin`. The colon of namespaced
//! ids is kept literally in file names; hosts whose filesystem rejects colons must hand the
//! manager a directory on a filesystem that accepts them or apply their own deterministic,
//! invertible encoding before ids reach this store. The directory belongs to exactly one
//! manager instance; the on-disk form is cache-like, not a durability guarantee.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use walkdir::WalkDir;

use super::codec::{
    BINARY_FORMAT_V1, OffloadError, OffloadMetadata, SidecarDocument, read_vectors, write_vectors,
};
use crate::sandbox::SandboxDocument;

const METADATA_SUFFIX: &str = ".metadata.json";
const DOCUMENTS_SUFFIX: &str = ".documents.json";
const VECTORS_SUFFIX: &str = ".vectors.bin";

/// An offloaded index read back from disk, vectors reattached.
#[derive(Debug, Clone)]
pub struct OffloadedIndex {
    /// The on-disk descriptor.
    pub metadata: OffloadMetadata,
    /// Documents in sidecar order; entries present in the binary file carry their vector.
    pub documents: Vec<SandboxDocument>,
}

/// Filesystem access to one offload directory.
pub struct OffloadStore {
    dir: PathBuf,
}

impl OffloadStore {
    /// Open (creating if needed) the offload directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, OffloadError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory this store owns.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a descriptor exists for the id.
    pub fn contains(&self, id: &str) -> bool {
        validate_id(id).is_ok() && self.metadata_path(id).exists()
    }

    /// Write the cold triple for an index: documents sidecar, vectors binary, then metadata.
    ///
    /// The three writes are best-effort cache storage. On any failure, files already written
    /// are deleted and the error is returned, leaving no partial triple behind.
    pub fn write(
        &self,
        id: &str,
        created: &str,
        options: Value,
        embedding_dimension: Option<usize>,
        documents: &[SandboxDocument],
    ) -> Result<OffloadMetadata, OffloadError> {
        validate_id(id)?;

        let dimension = embedding_dimension
            .or_else(|| {
                documents
                    .iter()
                    .find_map(|doc| doc.vector.as_ref().map(Vec::len))
            })
            .unwrap_or(0);

        let documents_name = format!("{id}{DOCUMENTS_SUFFIX}");
        let vectors_name = format!("{id}{VECTORS_SUFFIX}");

        let result = self.write_triple(
            id,
            created,
            options,
            embedding_dimension,
            dimension,
            documents,
            &documents_name,
            &vectors_name,
        );
        if result.is_err() {
            let _ = fs::remove_file(self.dir.join(&documents_name));
            let _ = fs::remove_file(self.dir.join(&vectors_name));
            let _ = fs::remove_file(self.metadata_path(id));
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn write_triple(
        &self,
        id: &str,
        created: &str,
        options: Value,
        embedding_dimension: Option<usize>,
        dimension: usize,
        documents: &[SandboxDocument],
        documents_name: &str,
        vectors_name: &str,
    ) -> Result<OffloadMetadata, OffloadError> {
        let sidecar: Vec<SidecarDocument> = documents
            .iter()
            .map(|doc| SidecarDocument::from_document(doc, dimension))
            .collect();
        fs::write(
            self.dir.join(documents_name),
            serde_json::to_vec(&sidecar)?,
        )?;

        let mut encoded = Vec::new();
        write_vectors(&mut encoded, documents, dimension)?;
        fs::write(self.dir.join(vectors_name), encoded)?;

        let metadata = OffloadMetadata {
            id: id.to_string(),
            created: created.to_string(),
            offloaded_at: now_rfc3339(),
            options,
            document_count: documents.len() as u64,
            embedding_dimension,
            documents_file: documents_name.to_string(),
            vectors_file: Some(vectors_name.to_string()),
            format: Some(BINARY_FORMAT_V1.to_string()),
        };
        fs::write(
            self.metadata_path(id),
            serde_json::to_vec_pretty(&metadata)?,
        )?;

        Ok(metadata)
    }

    /// Read an offloaded index back, combining sidecar and binary vectors.
    ///
    /// Sidecar documents without a binary entry are kept text-only. Legacy descriptors (no
    /// `format`/`vectorsFile`) load the documents file as a full-document array instead.
    pub fn read(&self, id: &str) -> Result<OffloadedIndex, OffloadError> {
        validate_id(id)?;
        let metadata_path = self.metadata_path(id);
        if !metadata_path.exists() {
            return Err(OffloadError::NotFound(id.to_string()));
        }

        let metadata: OffloadMetadata =
            serde_json::from_reader(BufReader::new(File::open(&metadata_path)?))?;
        let documents_path = self.dir.join(&metadata.documents_file);

        if !metadata.is_binary_v1() {
            let documents: Vec<SandboxDocument> =
                serde_json::from_reader(BufReader::new(File::open(&documents_path)?))?;
            return Ok(OffloadedIndex {
                metadata,
                documents,
            });
        }

        let sidecar: Vec<SidecarDocument> =
            serde_json::from_reader(BufReader::new(File::open(&documents_path)?))?;

        let vectors_name = metadata.vectors_file.as_deref().ok_or_else(|| {
            OffloadError::Malformed("binary_v1 descriptor is missing vectorsFile".to_string())
        })?;
        let mut vectors_reader = BufReader::new(File::open(self.dir.join(vectors_name))?);
        let vectors = read_vectors(&mut vectors_reader)?;
        let mut by_id: HashMap<&str, &Vec<f32>> = vectors
            .entries
            .iter()
            .map(|(entry_id, vector)| (entry_id.as_str(), vector))
            .collect();

        let documents = sidecar
            .into_iter()
            .map(|entry| {
                let vector = by_id.remove(entry.id.as_str()).cloned();
                SandboxDocument {
                    id: entry.id,
                    vector,
                    text: entry.text,
                    metadata: entry.metadata,
                }
            })
            .collect();

        Ok(OffloadedIndex {
            metadata,
            documents,
        })
    }

    /// Parse just the metadata descriptor for the id.
    pub fn read_metadata(&self, id: &str) -> Result<OffloadMetadata, OffloadError> {
        validate_id(id)?;
        let path = self.metadata_path(id);
        if !path.exists() {
            return Err(OffloadError::NotFound(id.to_string()));
        }
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    /// Delete the triple for the id. Missing files are not fatal; returns whether the
    /// descriptor existed.
    pub fn delete(&self, id: &str) -> Result<bool, OffloadError> {
        validate_id(id)?;
        let metadata_path = self.metadata_path(id);
        let existed = metadata_path.exists();

        for path in [
            metadata_path,
            self.dir.join(format!("{id}{DOCUMENTS_SUFFIX}")),
            self.dir.join(format!("{id}{VECTORS_SUFFIX}")),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(existed)
    }

    /// Scan the directory for descriptors, skipping malformed files.
    ///
    /// Results are filtered to the namespace prefix when given and sorted by `offloadedAt`
    /// descending.
    pub fn list(&self, namespace: Option<&str>) -> Vec<OffloadMetadata> {
        let mut descriptors: Vec<OffloadMetadata> = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.ends_with(METADATA_SUFFIX))
            })
            .filter_map(|entry| {
                let file = File::open(entry.path()).ok()?;
                match serde_json::from_reader(BufReader::new(file)) {
                    Ok(metadata) => Some(metadata),
                    Err(err) => {
                        tracing::warn!(
                            path = %entry.path().display(),
                            error = %err,
                            "Skipping malformed offload descriptor"
                        );
                        None
                    }
                }
            })
            .collect();

        if let Some(namespace) = namespace {
            let prefix = format!("{namespace}:");
            descriptors.retain(|metadata| metadata.id.starts_with(&prefix));
        }

        descriptors.sort_by_key(|metadata| {
            std::cmp::Reverse(parse_rfc3339(&metadata.offloaded_at).unwrap_or(OffsetDateTime::UNIX_EPOCH))
        });
        descriptors
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{METADATA_SUFFIX}"))
    }
}

fn validate_id(id: &str) -> Result<(), OffloadError> {
    if id.is_empty() || id.contains(['/', '\\']) || id.contains('\0') {
        return Err(OffloadError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

fn parse_rfc3339(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, vector: Option<Vec<f32>>, text: Option<&str>) -> SandboxDocument {
        SandboxDocument {
            id: id.to_string(),
            vector,
            text: text.map(str::to_string),
            metadata: None,
        }
    }

    fn store() -> (tempfile::TempDir, OffloadStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = OffloadStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn write_read_round_trip_keeps_vectors_and_text() {
        let (_guard, store) = store();
        let docs = vec![
            doc("d1", Some(vec![0.25, -0.5]), Some("alpha")),
            doc("d2", None, Some("text only")),
        ];

        let metadata = store
            .write("ws:a", "2026-01-01T00:00:00Z", json!({"namespace": "ws"}), Some(2), &docs)
            .unwrap();
        assert_eq!(metadata.document_count, 2);
        assert!(metadata.is_binary_v1());
        assert!(store.contains("ws:a"));

        let loaded = store.read("ws:a").unwrap();
        assert_eq!(loaded.documents.len(), 2);
        assert_eq!(loaded.documents[0].vector.as_deref(), Some(&[0.25, -0.5][..]));
        assert!(loaded.documents[1].vector.is_none());
        assert_eq!(loaded.documents[1].text.as_deref(), Some("text only"));
    }

    #[test]
    fn delete_removes_the_triple_and_tolerates_repeats() {
        let (_guard, store) = store();
        store
            .write("x", "2026-01-01T00:00:00Z", json!({}), None, &[])
            .unwrap();

        assert!(store.delete("x").unwrap());
        assert!(!store.contains("x"));
        assert!(!store.delete("x").unwrap());
    }

    #[test]
    fn list_filters_by_namespace_and_skips_malformed() {
        let (_guard, store) = store();
        store
            .write("ws:a", "2026-01-01T00:00:00Z", json!({}), None, &[])
            .unwrap();
        store
            .write("other:b", "2026-01-01T00:00:00Z", json!({}), None, &[])
            .unwrap();
        fs::write(store.dir().join("junk.metadata.json"), b"{not json").unwrap();

        let all = store.list(None);
        assert_eq!(all.len(), 2);

        let scoped = store.list(Some("ws"));
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "ws:a");
    }

    #[test]
    fn legacy_descriptor_loads_full_documents() {
        let (_guard, store) = store();
        let documents = json!([
            { "id": "d1", "vector": [1.0, 2.0], "text": "legacy" }
        ]);
        fs::write(
            store.dir().join("old.documents.json"),
            serde_json::to_vec(&documents).unwrap(),
        )
        .unwrap();
        fs::write(
            store.dir().join("old.metadata.json"),
            serde_json::to_vec(&json!({
                "id": "old",
                "created": "2024-01-01T00:00:00Z",
                "offloadedAt": "2024-01-02T00:00:00Z",
                "options": {},
                "documentCount": 1,
                "embeddingDimension": 2,
                "documentsFile": "old.documents.json"
            }))
            .unwrap(),
        )
        .unwrap();

        let loaded = store.read("old").unwrap();
        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.documents[0].vector.as_deref(), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn ids_with_path_separators_are_rejected() {
        let (_guard, store) = store();
        let error = store
            .write("../escape", "2026-01-01T00:00:00Z", json!({}), None, &[])
            .unwrap_err();
        assert!(matches!(error, OffloadError::InvalidId(_)));
    }
}

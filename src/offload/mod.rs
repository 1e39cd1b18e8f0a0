//! Cold-storage codec and offload directory management.
//!
//! An offloaded index is a triple of flat files in the offload directory: a JSON metadata
//! descriptor, a JSON documents sidecar without vectors, and a little-endian binary vectors
//! file. The codec is pure functions over byte streams; [`OffloadStore`] layers directory
//! naming, partial-failure cleanup, and namespace-aware listing on top.

pub mod codec;
pub mod store;

pub use codec::{
    BINARY_FORMAT_V1, OffloadError, OffloadMetadata, SidecarDocument, VectorsFile, read_vectors,
    write_vectors,
};
pub use store::{OffloadStore, OffloadedIndex};

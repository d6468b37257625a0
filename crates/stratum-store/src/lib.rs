//! OCI image layout access, digest-chain maintenance, and layer packing for Stratum.
//!
//! This crate provides the storage layer: the JSON object kinds that form the
//! OCI digest chain (`ImageIndex` → `ImageManifest` → `ImageConfig`) with their
//! `Descriptor` references, `OciLayout` for reading and atomically writing
//! content-addressed blobs, the digest-chain rewriter that repropagates
//! digests after a direct config edit, chain verification, and deterministic
//! tar packing of root filesystem directories into layer blobs.

pub mod chain;
pub mod layers;
pub mod layout;
pub mod oci;

pub use chain::{
    inject_architecture_variant, rewrite_config, verify_chain, ChainFailure, ChainReport,
    ChainUpdate, ConfigEdit,
};
pub use layers::{list_layer_entries, pack_layer, LayerStats};
pub use layout::{ImageRef, OciLayout, REF_NAME_ANNOTATION};
pub use oci::{
    canonical_json, sha256_digest, split_digest, Descriptor, ImageConfig, ImageIndex,
    ImageManifest, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("layout corruption at {}: {reason}", path.display())]
    LayoutCorruption { path: PathBuf, reason: String },
    #[error("invalid digest '{0}', expected '<algorithm>:<hex>'")]
    InvalidDigest(String),
    #[error("invalid image reference: {0}")]
    InvalidReference(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::LayoutCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

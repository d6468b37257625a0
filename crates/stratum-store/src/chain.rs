//! Digest-chain maintenance for direct edits of the image config.
//!
//! The index references a manifest, which references a config, each by
//! SHA-256 digest and size. Changing the config's bytes therefore changes
//! every ancestor. [`rewrite_config`] repropagates the new digests bottom-up
//! and writes each new blob before the parent that links to it, so an
//! interrupted rewrite leaves only unreferenced blobs behind, never a
//! dangling reference.

use crate::layout::OciLayout;
use crate::oci::{split_digest, Descriptor, ImageConfig, ImageManifest};
use crate::StoreError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use tracing::{debug, info};

/// A set of shallow config edits, applied in order.
#[derive(Debug, Clone, Default)]
pub struct ConfigEdit {
    fields: Vec<(String, Value)>,
}

impl ConfigEdit {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.push((key.to_owned(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn apply(&self, config: &mut ImageConfig) {
        for (key, value) in &self.fields {
            config.merge(key, value.clone());
        }
    }
}

/// Descriptors produced by a chain rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainUpdate {
    pub config: Descriptor,
    pub manifest: Descriptor,
}

/// Apply `edit` to the config of the first manifest in the index and
/// repropagate config → manifest → index.
pub fn rewrite_config(layout: &OciLayout, edit: &ConfigEdit) -> Result<ChainUpdate, StoreError> {
    let mut index = layout.read_index()?;
    let manifest_desc = index.manifests.first_mut().ok_or_else(|| {
        StoreError::corrupt(layout.index_path(), "index does not reference any manifest")
    })?;

    let mut manifest: ImageManifest = layout.read_blob_json(&manifest_desc.digest)?;
    let mut config: ImageConfig = layout.read_blob_json(&manifest.config.digest)?;
    debug!(
        "rewriting config {} of manifest {}",
        manifest.config.digest, manifest_desc.digest
    );

    edit.apply(&mut config);

    let (config_digest, config_size) = layout.write_blob_json(&config)?;
    manifest.config.relink(&config_digest, config_size);

    let (manifest_digest, manifest_size) = layout.write_blob_json(&manifest)?;
    manifest_desc.relink(&manifest_digest, manifest_size);
    let update = ChainUpdate {
        config: manifest.config.clone(),
        manifest: manifest_desc.clone(),
    };

    layout.write_index(&index)?;
    info!(
        "config {config_digest} linked via manifest {manifest_digest} in {}",
        layout.index_path().display()
    );
    Ok(update)
}

/// Stamp an architecture variant (e.g. `v8`) into the image config.
pub fn inject_architecture_variant(
    layout: &OciLayout,
    variant: &str,
) -> Result<ChainUpdate, StoreError> {
    rewrite_config(layout, &ConfigEdit::new().set("variant", variant))
}

#[derive(Debug, Default)]
pub struct ChainReport {
    pub checked: usize,
    pub passed: usize,
    pub failed: Vec<ChainFailure>,
}

impl ChainReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct ChainFailure {
    pub digest: String,
    pub reason: String,
}

/// Replay the read path over every manifest in the index and check each
/// descriptor (manifest, config, layers) against the bytes on disk.
pub fn verify_chain(layout: &OciLayout) -> Result<ChainReport, StoreError> {
    let index = layout.read_index()?;
    let mut report = ChainReport::default();

    for manifest_desc in &index.manifests {
        if !check_descriptor(layout, manifest_desc, &mut report) {
            continue;
        }
        let manifest: ImageManifest = match layout.read_blob_json(&manifest_desc.digest) {
            Ok(m) => m,
            Err(e) => {
                report.failed.push(ChainFailure {
                    digest: manifest_desc.digest.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        check_descriptor(layout, &manifest.config, &mut report);
        for layer in &manifest.layers {
            check_descriptor(layout, layer, &mut report);
        }
    }

    Ok(report)
}

fn check_descriptor(layout: &OciLayout, desc: &Descriptor, report: &mut ChainReport) -> bool {
    report.checked += 1;
    match descriptor_mismatch(layout, desc) {
        None => {
            report.passed += 1;
            true
        }
        Some(reason) => {
            report.failed.push(ChainFailure {
                digest: desc.digest.clone(),
                reason,
            });
            false
        }
    }
}

fn descriptor_mismatch(layout: &OciLayout, desc: &Descriptor) -> Option<String> {
    let (algo, _) = match split_digest(&desc.digest) {
        Ok(parts) => parts,
        Err(e) => return Some(e.to_string()),
    };
    let path = match layout.blob_path(&desc.digest) {
        Ok(p) => p,
        Err(e) => return Some(e.to_string()),
    };
    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => return Some(format!("blob {} unreadable: {e}", path.display())),
    };

    if algo != "sha256" {
        debug!("not hashing {} (unsupported algorithm {algo})", desc.digest);
        return None;
    }

    // Layers can be large; hash them as a stream.
    let mut hasher = Sha256::new();
    let size = match io::copy(&mut file, &mut hasher) {
        Ok(n) => n,
        Err(e) => return Some(format!("blob {} unreadable: {e}", path.display())),
    };
    let actual = format!("sha256:{:x}", hasher.finalize());

    if actual != desc.digest {
        Some(format!("content hashes to {actual}"))
    } else if size != desc.size {
        Some(format!("size is {size}, descriptor says {}", desc.size))
    } else {
        None
    }
}

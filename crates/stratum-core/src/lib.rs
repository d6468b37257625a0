//! Image assembly for Stratum.
//!
//! This crate ties the storage layer and the external tool adapters together
//! into the `ImageStore`: acquiring and creating images, duplicating and
//! unpacking them, adding layers, editing their config, embedding control
//! data, and exporting them. `pack` runs the whole sequence that turns a
//! prepared root filesystem into an OCI archive.

pub mod control;
pub mod image;
pub mod pack;

pub use control::ControlData;
pub use image::{Image, ImageStore};
pub use pack::{pack, pack_at, PackOptions, PackResult};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] stratum_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] stratum_runtime::RuntimeError),
    #[error("invalid digest '{0}'")]
    InvalidDigest(String),
    #[error("invalid pack options: {0}")]
    InvalidOptions(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata serialization error: {0}")]
    Metadata(#[from] serde_yaml::Error),
}

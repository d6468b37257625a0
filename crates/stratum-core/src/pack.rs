use crate::control::ControlData;
use crate::image::ImageStore;
use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

pub const BARE_BASE: &str = "bare";
const BASE_TAG: &str = "base";

pub const ANNOTATION_VERSION: &str = "org.opencontainers.image.version";
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";
pub const ANNOTATION_BASE_DIGEST: &str = "org.opencontainers.image.base.digest";

/// Everything `pack` needs to turn a prepared root filesystem into an
/// OCI archive.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    pub name: String,
    pub version: String,
    /// `bare`, or an image on a registry.
    pub base: String,
    pub arch: String,
    pub variant: Option<String>,
    /// Root filesystem to add as the image's new layer.
    pub prime_dir: PathBuf,
    /// Holds `images/` and `bundles/`.
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<(String, String)>,
    pub annotations: Vec<(String, String)>,
}

impl PackOptions {
    fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [
            ("name", &self.name),
            ("version", &self.version),
            ("base", &self.base),
            ("arch", &self.arch),
        ] {
            if value.is_empty() {
                return Err(CoreError::InvalidOptions(format!("{field} must not be empty")));
            }
        }
        if self.name.contains(':') || self.name.contains('/') {
            return Err(CoreError::InvalidOptions(format!(
                "name '{}' must not contain ':' or '/'",
                self.name
            )));
        }
        Ok(())
    }

    pub fn archive_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.oci.tar", self.name, self.version))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PackResult {
    pub archive: PathBuf,
    /// Hex digest of the base image.
    pub base_digest: String,
    /// The packed image, tagged with the version.
    pub image: String,
    pub image_dir: PathBuf,
    pub rootfs: PathBuf,
    pub created: String,
}

/// Assemble `opts.prime_dir` on top of the base image and export the result.
pub fn pack(store: &ImageStore<'_>, opts: &PackOptions) -> Result<PackResult, CoreError> {
    pack_at(store, opts, Utc::now())
}

/// `pack` with a fixed creation time.
pub fn pack_at(
    store: &ImageStore<'_>,
    opts: &PackOptions,
    now: DateTime<Utc>,
) -> Result<PackResult, CoreError> {
    opts.validate()?;
    let image_dir = opts.work_dir.join("images");
    let bundle_dir = opts.work_dir.join("bundles");
    let variant = opts.variant.as_deref();

    info!("retrieving base {}", opts.base);
    let (base_image, source) = if opts.base == BARE_BASE {
        store.create_new(&format!("{BARE_BASE}:latest"), &image_dir, &opts.arch, variant)?
    } else {
        store.acquire(&opts.base, &image_dir, &opts.arch, variant)?
    };

    info!("extracting {}", base_image.image_name());
    let rootfs = store.unpack(&base_image, &bundle_dir)?;

    let project_base = store.duplicate(
        &base_image,
        &format!("{}:{BASE_TAG}", opts.name),
        &image_dir,
    )?;
    let base_digest = hex::encode(store.digest(&source)?);
    info!("base digest {base_digest}");

    info!("creating new layer from {}", opts.prime_dir.display());
    let (image, _) = store.add_layer(&project_base, &opts.version, &opts.prime_dir)?;

    if !opts.entrypoint.is_empty() {
        store.set_entrypoint(&image, &opts.entrypoint)?;
        if opts.cmd.is_empty() {
            store.set_cmd(&image, &[])?;
        }
    }
    if !opts.cmd.is_empty() {
        store.set_cmd(&image, &opts.cmd)?;
    }
    if !opts.env.is_empty() {
        store.set_env(&image, &opts.env)?;
    }

    info!("adding metadata");
    let control = ControlData::new(&opts.name, &opts.version, now);
    store.set_annotations(&image, &annotations(opts, &control.created, &base_digest))?;
    store.set_control_data(&image, &control)?;

    let archive = opts.archive_path();
    if let Some(parent) = archive.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    info!("exporting to OCI archive {}", archive.display());
    store.export_to_archive(&image, &opts.version, &archive)?;

    Ok(PackResult {
        archive,
        base_digest,
        image: image.image_name().to_owned(),
        image_dir: image.path().to_path_buf(),
        rootfs,
        created: control.created,
    })
}

/// User annotations followed by the generated ones. A user value for a
/// generated key is replaced.
fn annotations(opts: &PackOptions, created: &str, base_digest: &str) -> Vec<(String, String)> {
    let generated = [
        (ANNOTATION_VERSION, opts.version.as_str()),
        (ANNOTATION_CREATED, created),
        (ANNOTATION_BASE_DIGEST, base_digest),
    ];
    let mut out: Vec<(String, String)> = opts
        .annotations
        .iter()
        .filter(|(k, _)| !generated.iter().any(|(g, _)| *g == k.as_str()))
        .cloned()
        .collect();
    out.extend(
        generated
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned())),
    );
    out
}

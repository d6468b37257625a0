use crate::oci::{canonical_json, sha256_digest, split_digest, ImageIndex};
use crate::{fsync_dir, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const INDEX_FILE: &str = "index.json";
const OCI_LAYOUT_FILE: &str = "oci-layout";
const OCI_LAYOUT_VERSION: &str = "1.0.0";
const DEFAULT_TAG: &str = "latest";

/// Annotation an index entry uses to carry its tag.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// A `name:tag` reference to an image inside a layout directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    /// Parse `name:tag`. A missing tag defaults to `latest`; a colon that
    /// belongs to a registry port (`host:5000/name`) is not a tag separator.
    pub fn parse(reference: &str) -> Result<Self, StoreError> {
        if reference.is_empty() {
            return Err(StoreError::InvalidReference("empty reference".to_owned()));
        }
        let (name, tag) = match reference.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (reference, DEFAULT_TAG),
        };
        if name.is_empty() || tag.is_empty() {
            return Err(StoreError::InvalidReference(reference.to_owned()));
        }
        Ok(Self {
            name: name.to_owned(),
            tag: tag.to_owned(),
        })
    }

    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            name: self.name.clone(),
            tag: tag.to_owned(),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// On-disk OCI image layout: `index.json`, `oci-layout`, and
/// content-addressed `blobs/<algorithm>/<hex>`.
///
/// Blob and index writes go through a `NamedTempFile` in the destination
/// directory followed by a rename, so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Split an engine-style image path `<dir>/<name>:<tag>` into the layout
    /// at `<dir>/<name>` and the reference inside it.
    pub fn from_image_path(image: &Path) -> Result<(Self, ImageRef), StoreError> {
        let invalid = || StoreError::InvalidReference(image.display().to_string());
        let file_name = image.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
        let reference = ImageRef::parse(file_name)?;
        let dir = image.parent().unwrap_or_else(|| Path::new(""));
        Ok((Self::new(dir.join(&reference.name)), reference))
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    #[inline]
    pub fn oci_layout_path(&self) -> PathBuf {
        self.root.join(OCI_LAYOUT_FILE)
    }

    #[inline]
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn blob_path(&self, digest: &str) -> Result<PathBuf, StoreError> {
        let (algo, hex) = split_digest(digest)?;
        Ok(self.blobs_dir().join(algo).join(hex))
    }

    /// Create an empty layout. Existing content is left alone.
    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.blobs_dir().join("sha256"))?;
        if !self.oci_layout_path().exists() {
            let marker = serde_json::json!({ "imageLayoutVersion": OCI_LAYOUT_VERSION });
            atomic_write(&self.root, &self.oci_layout_path(), &canonical_json(&marker)?)?;
        }
        if !self.index_path().exists() {
            self.write_index(&ImageIndex {
                schema_version: 2,
                media_type: Some(crate::oci::MEDIA_TYPE_OCI_INDEX.to_owned()),
                manifests: Vec::new(),
                extra: serde_json::Map::new(),
            })?;
        }
        Ok(())
    }

    pub fn read_index(&self) -> Result<ImageIndex, StoreError> {
        let path = self.index_path();
        let data = fs::read(&path)
            .map_err(|e| StoreError::corrupt(&path, format!("cannot read index: {e}")))?;
        serde_json::from_slice(&data)
            .map_err(|e| StoreError::corrupt(&path, format!("malformed index: {e}")))
    }

    /// Read a blob, verifying that its bytes hash to `digest`.
    pub fn read_blob(&self, digest: &str) -> Result<Vec<u8>, StoreError> {
        let path = self
            .blob_path(digest)
            .map_err(|_| StoreError::corrupt(self.index_path(), format!("bad digest '{digest}'")))?;
        let data = fs::read(&path)
            .map_err(|e| StoreError::corrupt(&path, format!("cannot read blob: {e}")))?;

        if digest.starts_with("sha256:") {
            let actual = sha256_digest(&data);
            if actual != digest {
                return Err(StoreError::corrupt(
                    &path,
                    format!("content hashes to {actual}, expected {digest}"),
                ));
            }
        }
        Ok(data)
    }

    pub fn read_blob_json<T: DeserializeOwned>(&self, digest: &str) -> Result<T, StoreError> {
        let data = self.read_blob(digest)?;
        serde_json::from_slice(&data).map_err(|e| {
            let path = self.blob_path(digest).unwrap_or_else(|_| self.blobs_dir());
            StoreError::corrupt(path, format!("malformed JSON blob: {e}"))
        })
    }

    /// Store `data` as a sha256 blob and return its digest and size.
    /// Idempotent: an existing blob with the same digest is kept.
    pub fn write_blob(&self, data: &[u8]) -> Result<(String, u64), StoreError> {
        let digest = sha256_digest(data);
        let dest = self.blob_path(&digest)?;
        let size = data.len() as u64;

        if dest.exists() {
            debug!("blob {digest} already present");
            return Ok((digest, size));
        }

        let dir = self.blobs_dir().join("sha256");
        fs::create_dir_all(&dir)?;
        atomic_write(&dir, &dest, data)?;
        debug!("wrote blob {digest} ({size} bytes)");
        Ok((digest, size))
    }

    /// Canonically serialize `value` and store it as a blob.
    pub fn write_blob_json<T: Serialize>(&self, value: &T) -> Result<(String, u64), StoreError> {
        self.write_blob(&canonical_json(value)?)
    }

    /// Replace `index.json`. This is the only non-content-addressed write.
    pub fn write_index(&self, index: &ImageIndex) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        atomic_write(&self.root, &self.index_path(), &canonical_json(index)?)
    }
}

fn atomic_write(dir: &Path, dest: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{Descriptor, MEDIA_TYPE_OCI_MANIFEST};

    fn test_layout() -> (tempfile::TempDir, OciLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::new(dir.path().join("img"));
        layout.initialize().unwrap();
        (dir, layout)
    }

    #[test]
    fn layout_paths_are_correct() {
        let layout = OciLayout::new("/tmp/images/bare");
        assert_eq!(layout.index_path(), PathBuf::from("/tmp/images/bare/index.json"));
        assert_eq!(layout.oci_layout_path(), PathBuf::from("/tmp/images/bare/oci-layout"));
        assert_eq!(
            layout.blob_path("sha256:abcd").unwrap(),
            PathBuf::from("/tmp/images/bare/blobs/sha256/abcd")
        );
    }

    #[test]
    fn blob_path_rejects_traversal() {
        let layout = OciLayout::new("/tmp/images/bare");
        assert!(layout.blob_path("sha256:../../etc").is_err());
    }

    #[test]
    fn initialize_creates_empty_index() {
        let (_dir, layout) = test_layout();
        assert!(layout.oci_layout_path().is_file());
        let index = layout.read_index().unwrap();
        assert_eq!(index.schema_version, 2);
        assert!(index.manifests.is_empty());
    }

    #[test]
    fn initialize_is_idempotent() {
        let (_dir, layout) = test_layout();
        let mut index = layout.read_index().unwrap();
        index
            .manifests
            .push(Descriptor::new(MEDIA_TYPE_OCI_MANIFEST, "sha256:aa", 1));
        layout.write_index(&index).unwrap();

        layout.initialize().unwrap();
        assert_eq!(layout.read_index().unwrap().manifests.len(), 1);
    }

    #[test]
    fn write_and_read_blob() {
        let (_dir, layout) = test_layout();
        let (digest, size) = layout.write_blob(b"hello layer").unwrap();
        assert_eq!(size, 11);
        assert_eq!(digest, sha256_digest(b"hello layer"));
        assert_eq!(layout.read_blob(&digest).unwrap(), b"hello layer");
    }

    #[test]
    fn write_blob_is_idempotent() {
        let (_dir, layout) = test_layout();
        let first = layout.write_blob(b"same").unwrap();
        let second = layout.write_blob(b"same").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tampered_blob_is_reported_as_corruption() {
        let (_dir, layout) = test_layout();
        let (digest, _) = layout.write_blob(b"original").unwrap();
        fs::write(layout.blob_path(&digest).unwrap(), b"tampered").unwrap();
        let err = layout.read_blob(&digest).unwrap_err();
        assert!(matches!(err, StoreError::LayoutCorruption { .. }));
    }

    #[test]
    fn missing_index_is_reported_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OciLayout::new(dir.path());
        let err = layout.read_index().unwrap_err();
        assert!(matches!(err, StoreError::LayoutCorruption { .. }));
    }

    #[test]
    fn malformed_index_is_reported_as_corruption() {
        let (_dir, layout) = test_layout();
        fs::write(layout.index_path(), b"{not json").unwrap();
        assert!(matches!(
            layout.read_index().unwrap_err(),
            StoreError::LayoutCorruption { .. }
        ));
    }

    #[test]
    fn layout_from_image_path() {
        let (layout, reference) = OciLayout::from_image_path(Path::new("/c/bare:latest")).unwrap();
        assert_eq!(layout.root(), Path::new("/c/bare"));
        assert_eq!(reference.to_string(), "bare:latest");

        let (layout, reference) = OciLayout::from_image_path(Path::new("images/app")).unwrap();
        assert_eq!(layout.root(), Path::new("images/app"));
        assert_eq!(reference.tag, "latest");

        assert!(OciLayout::from_image_path(Path::new("/")).is_err());
    }

    #[test]
    fn parse_image_ref() {
        let r = ImageRef::parse("ubuntu:22.04").unwrap();
        assert_eq!(r.name, "ubuntu");
        assert_eq!(r.tag, "22.04");
        assert_eq!(r.to_string(), "ubuntu:22.04");
    }

    #[test]
    fn parse_image_ref_defaults_tag() {
        let r = ImageRef::parse("bare").unwrap();
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn parse_image_ref_with_registry_port() {
        let r = ImageRef::parse("localhost:5000/app").unwrap();
        assert_eq!(r.name, "localhost:5000/app");
        assert_eq!(r.tag, "latest");

        let r = ImageRef::parse("localhost:5000/app:1.0").unwrap();
        assert_eq!(r.name, "localhost:5000/app");
        assert_eq!(r.tag, "1.0");
    }

    #[test]
    fn parse_image_ref_rejects_empty_parts() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse(":tag").is_err());
        assert!(ImageRef::parse("name:").is_err());
    }
}

use crate::control::ControlData;
use crate::CoreError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use stratum_runtime::{
    ConfigArg, ConfigField, CopyOptions, Locator, OciEngine, ToolConfig, Transport,
};
use stratum_store::{inject_architecture_variant, pack_layer, LayerStats, OciLayout};
use tracing::{debug, info, warn};

const DEFAULT_TAG: &str = "latest";
const CONTROL_DIR: &str = ".rock";
const CONTROL_FILE: &str = "metadata.yaml";

/// A named, tagged image stored in the OCI layout under `path`.
///
/// Immutable: operations that produce a different image return a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Image {
    image_name: String,
    path: PathBuf,
}

impl Image {
    pub fn new(image_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            image_name: image_name.into(),
            path: path.into(),
        }
    }

    /// `name:tag`
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    /// Directory holding the image's layout.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `path/name:tag`, the engine's way of addressing this image.
    pub fn image_path(&self) -> PathBuf {
        self.path.join(&self.image_name)
    }

    pub fn name(&self) -> &str {
        self.split().0
    }

    pub fn tag(&self) -> &str {
        self.split().1
    }

    /// The same image name under another tag.
    pub fn tagged_path(&self, tag: &str) -> PathBuf {
        self.path.join(format!("{}:{tag}", self.name()))
    }

    pub fn layout(&self) -> OciLayout {
        OciLayout::new(self.path.join(self.name()))
    }

    fn split(&self) -> (&str, &str) {
        match self.image_name.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (&self.image_name, DEFAULT_TAG),
        }
    }
}

impl std::fmt::Display for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.image_path().display())
    }
}

/// Image operations on top of an engine and a transport.
pub struct ImageStore<'a> {
    engine: &'a dyn OciEngine,
    transport: &'a dyn Transport,
    archive_entrypoint: Vec<String>,
    archive_cmd: Vec<String>,
}

impl<'a> ImageStore<'a> {
    pub fn new(engine: &'a dyn OciEngine, transport: &'a dyn Transport) -> Self {
        Self::from_config(engine, transport, &ToolConfig::default())
    }

    pub fn from_config(
        engine: &'a dyn OciEngine,
        transport: &'a dyn Transport,
        config: &ToolConfig,
    ) -> Self {
        Self {
            engine,
            transport,
            archive_entrypoint: config.archive_entrypoint.clone(),
            archive_cmd: config.archive_cmd.clone(),
        }
    }

    /// Pull `image_name` from a registry into `image_dir`.
    pub fn acquire(
        &self,
        image_name: &str,
        image_dir: &Path,
        arch: &str,
        variant: Option<&str>,
    ) -> Result<(Image, Locator), CoreError> {
        fs::create_dir_all(image_dir)?;
        let source = Locator::Registry(image_name.to_owned());
        let destination = Locator::Oci(image_dir.join(image_name));
        let options = CopyOptions::platform(arch, variant.map(str::to_owned));

        info!("retrieving {source} for {arch}");
        self.transport.copy(&source, &destination, &options)?;
        Ok((Image::new(image_name, image_dir), source))
    }

    /// Build an empty image locally. With `variant`, the variant is written
    /// into the config and the digest chain is repropagated.
    pub fn create_new(
        &self,
        image_name: &str,
        image_dir: &Path,
        arch: &str,
        variant: Option<&str>,
    ) -> Result<(Image, Locator), CoreError> {
        fs::create_dir_all(image_dir)?;
        let image = Image::new(image_name, image_dir);
        let image_path = image.image_path();

        info!("creating new image {image_name} for {arch}");
        self.engine.init_layout(&image_dir.join(image.name()))?;
        self.engine.new_image(&image_path)?;
        self.engine.config(
            &image_path,
            &[ConfigArg::Architecture(arch.to_owned()), ConfigArg::NoHistory],
        )?;

        if let Some(variant) = variant {
            let update = inject_architecture_variant(&image.layout(), variant)?;
            debug!(
                "variant {variant} stamped, manifest now {}",
                update.manifest.digest
            );
        }

        Ok((image, Locator::Oci(image_path)))
    }

    pub fn duplicate(
        &self,
        image: &Image,
        new_name: &str,
        new_dir: &Path,
    ) -> Result<Image, CoreError> {
        let source = Locator::Oci(image.image_path());
        let destination = Locator::Oci(new_dir.join(new_name));
        debug!("copying {source} to {destination}");
        self.transport
            .copy(&source, &destination, &CopyOptions::default())?;
        Ok(Image::new(new_name, new_dir))
    }

    /// Unpack into `bundle_dir/<name>-<tag>` and return its `rootfs`. Any
    /// existing bundle at that path is removed first.
    pub fn unpack(&self, image: &Image, bundle_dir: &Path) -> Result<PathBuf, CoreError> {
        fs::create_dir_all(bundle_dir)?;
        let bundle = bundle_dir.join(image.image_name().replace(':', "-"));
        match fs::remove_dir_all(&bundle) {
            Ok(()) => debug!("removed stale bundle {}", bundle.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.engine.unpack(&image.image_path(), &bundle)?;
        Ok(bundle.join("rootfs"))
    }

    /// Package `layer_root` and add it on top of `image`, storing the result
    /// as `tag`. Returns the tagged image.
    pub fn add_layer(
        &self,
        image: &Image,
        tag: &str,
        layer_root: &Path,
    ) -> Result<(Image, LayerStats), CoreError> {
        let staged = StagedFile::new(
            image
                .path()
                .join(format!(".temp_layer.{}.tar", std::process::id())),
        )?;
        let stats = pack_layer(layer_root, staged.path())?;
        info!(
            "adding layer from {} ({} entries)",
            layer_root.display(),
            stats.entries()
        );
        self.engine
            .add_layer(&image.image_path(), staged.path(), Some(tag))?;

        let tagged = Image::new(format!("{}:{tag}", image.name()), image.path());
        Ok((tagged, stats))
    }

    pub fn set_entrypoint(&self, image: &Image, entrypoint: &[String]) -> Result<(), CoreError> {
        self.replace_field(
            image,
            ConfigField::Entrypoint,
            entrypoint.iter().cloned().map(ConfigArg::Entrypoint),
        )
    }

    pub fn set_cmd(&self, image: &Image, cmd: &[String]) -> Result<(), CoreError> {
        self.replace_field(
            image,
            ConfigField::Cmd,
            cmd.iter().cloned().map(ConfigArg::Cmd),
        )
    }

    pub fn set_env(&self, image: &Image, env: &[(String, String)]) -> Result<(), CoreError> {
        self.replace_field(
            image,
            ConfigField::Env,
            env.iter().map(|(k, v)| ConfigArg::Env(format!("{k}={v}"))),
        )
    }

    /// Replace the config labels, then the manifest annotations, with
    /// `annotations`.
    pub fn set_annotations(
        &self,
        image: &Image,
        annotations: &[(String, String)],
    ) -> Result<(), CoreError> {
        let pairs = || annotations.iter().map(|(k, v)| format!("{k}={v}"));
        self.replace_field(image, ConfigField::Labels, pairs().map(ConfigArg::Label))?;
        self.replace_field(
            image,
            ConfigField::Annotations,
            pairs().map(ConfigArg::Annotation),
        )
    }

    /// Add a layer holding `.rock/metadata.yaml` with `metadata`. The
    /// previous tag is kept.
    pub fn set_control_data(&self, image: &Image, metadata: &ControlData) -> Result<(), CoreError> {
        let staging = tempfile::tempdir()?;
        let control_dir = staging.path().join(CONTROL_DIR);
        fs::create_dir(&control_dir)?;
        fs::write(control_dir.join(CONTROL_FILE), metadata.to_yaml()?)?;

        let staged = StagedFile::new(image.path().join(format!(
            ".temp_layer.control_data.{}.tar",
            std::process::id()
        )))?;
        pack_layer(staging.path(), staged.path())?;
        info!("adding control data for {} {}", metadata.name, metadata.version);
        self.engine
            .add_layer(&image.image_path(), staged.path(), None)?;
        Ok(())
    }

    pub fn export_to_daemon(&self, image: &Image, tag: &str) -> Result<(), CoreError> {
        let source = Locator::Oci(image.tagged_path(tag));
        let destination = Locator::DockerDaemon {
            name: image.name().to_owned(),
            tag: tag.to_owned(),
        };
        info!("exporting {source} to {destination}");
        self.transport
            .copy(&source, &destination, &CopyOptions::default())?;
        Ok(())
    }

    /// Export `name:tag` to the OCI archive `filename`. The configured
    /// archive entrypoint and cmd replace the image's own first.
    pub fn export_to_archive(
        &self,
        image: &Image,
        tag: &str,
        filename: &Path,
    ) -> Result<(), CoreError> {
        let image_path = image.tagged_path(tag);
        if self.archive_entrypoint.is_empty() && self.archive_cmd.is_empty() {
            debug!("no archive entrypoint configured, keeping the image's own");
        } else {
            let mut args = vec![ConfigArg::Clear(ConfigField::Entrypoint)];
            args.extend(self.archive_entrypoint.iter().cloned().map(ConfigArg::Entrypoint));
            args.push(ConfigArg::Clear(ConfigField::Cmd));
            args.extend(self.archive_cmd.iter().cloned().map(ConfigArg::Cmd));
            self.engine.config(&image_path, &args)?;
        }

        let source = Locator::Oci(image_path);
        let destination = Locator::OciArchive {
            file: filename.to_path_buf(),
            tag: tag.to_owned(),
        };
        info!("exporting {source} to {destination}");
        self.transport
            .copy(&source, &destination, &CopyOptions::default())?;
        Ok(())
    }

    /// Raw digest bytes of the image at `locator`.
    pub fn digest(&self, locator: &Locator) -> Result<Vec<u8>, CoreError> {
        let output = self.transport.inspect_digest(locator)?;
        decode_digest(&output)
    }

    fn replace_field(
        &self,
        image: &Image,
        field: ConfigField,
        values: impl Iterator<Item = ConfigArg>,
    ) -> Result<(), CoreError> {
        let args: Vec<ConfigArg> = std::iter::once(ConfigArg::Clear(field))
            .chain(values)
            .collect();
        debug!("replacing {} on {image}", field.as_str());
        self.engine.config(&image.image_path(), &args)?;
        Ok(())
    }
}

/// Decode the hex after the last colon of `algorithm:hex`.
pub fn decode_digest(output: &str) -> Result<Vec<u8>, CoreError> {
    let trimmed = output.trim();
    let hex_part = trimmed.rsplit(':').next().unwrap_or(trimmed);
    hex::decode(hex_part).map_err(|e| CoreError::InvalidDigest(format!("{trimmed}: {e}")))
}

/// A staging file removed on drop.
struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// Claim `path`, removing leftovers from an earlier run.
    fn new(path: PathBuf) -> Result<Self, CoreError> {
        match fs::remove_file(&path) {
            Ok(()) => debug!("removed leftover {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove {}: {e}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_runtime::mock::{EngineCall, MockEngine, MockTransport, TransportCall};

    #[test]
    fn image_accessors() {
        let image = Image::new("a:b", "/c");
        assert_eq!(image.image_name(), "a:b");
        assert_eq!(image.path(), Path::new("/c"));
        assert_eq!(image.image_path(), PathBuf::from("/c/a:b"));
        assert_eq!(image.name(), "a");
        assert_eq!(image.tag(), "b");
        assert_eq!(image.tagged_path("v2"), PathBuf::from("/c/a:v2"));
        assert_eq!(image.layout().root(), Path::new("/c/a"));
    }

    #[test]
    fn image_without_tag_is_latest() {
        let image = Image::new("bare", "/c");
        assert_eq!(image.name(), "bare");
        assert_eq!(image.tag(), "latest");
    }

    #[test]
    fn decode_digest_takes_hex_after_last_colon() {
        assert_eq!(decode_digest("sha256:00ff10\n").unwrap(), vec![0x00, 0xff, 0x10]);
        assert_eq!(decode_digest("x:y:abcd").unwrap(), vec![0xab, 0xcd]);
        assert_eq!(decode_digest("abcd").unwrap(), vec![0xab, 0xcd]);
    }

    #[test]
    fn decode_digest_rejects_non_hex() {
        assert!(matches!(
            decode_digest("sha256:zz"),
            Err(CoreError::InvalidDigest(_))
        ));
        assert!(matches!(
            decode_digest("sha256:abc"),
            Err(CoreError::InvalidDigest(_))
        ));
    }

    #[test]
    fn set_env_formats_pairs() {
        let engine = MockEngine::new();
        let transport = MockTransport::new();
        let store = ImageStore::new(&engine, &transport);
        let env = vec![
            ("NAME1".to_owned(), "VALUE1".to_owned()),
            ("NAME2".to_owned(), "VALUE2".to_owned()),
        ];
        store.set_env(&Image::new("a:b", "/c"), &env).unwrap();
        assert_eq!(
            engine.calls(),
            vec![EngineCall::Config {
                image: PathBuf::from("/c/a:b"),
                args: vec![
                    ConfigArg::Clear(ConfigField::Env),
                    ConfigArg::Env("NAME1=VALUE1".to_owned()),
                    ConfigArg::Env("NAME2=VALUE2".to_owned()),
                ],
            }]
        );
    }

    #[test]
    fn staged_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".temp_layer.1.tar");
        fs::write(&path, b"leftover").unwrap();
        {
            let staged = StagedFile::new(path.clone()).unwrap();
            assert!(!staged.path().exists());
            fs::write(staged.path(), b"fresh").unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn to_daemon_uses_name_and_tag() {
        let engine = MockEngine::new();
        let transport = MockTransport::new();
        let store = ImageStore::new(&engine, &transport);
        store
            .export_to_daemon(&Image::new("a:b", "/c"), "tag")
            .unwrap();
        assert_eq!(
            transport.calls(),
            vec![TransportCall::Copy {
                source: Locator::Oci(PathBuf::from("/c/a:tag")),
                destination: Locator::DockerDaemon {
                    name: "a".to_owned(),
                    tag: "tag".to_owned()
                },
                options: CopyOptions::default(),
            }]
        );
        assert!(engine.calls().is_empty());
    }
}

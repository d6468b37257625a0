//! In-memory `OciEngine` and `Transport` fakes.
//!
//! Both record every call in order. `MockEngine::materializing()` also
//! writes a minimal real layout for `init_layout`, `new_image` and config
//! edits, so digest-chain code can run against it without umoci.

use crate::engine::{ConfigArg, ConfigField, OciEngine};
use crate::transport::{CopyOptions, Locator, Transport};
use crate::RuntimeError;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use stratum_store::{
    list_layer_entries, rewrite_config, ConfigEdit, Descriptor, ImageConfig, ImageManifest,
    OciLayout, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_MANIFEST, REF_NAME_ANNOTATION,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    InitLayout(PathBuf),
    NewImage(PathBuf),
    Config {
        image: PathBuf,
        args: Vec<ConfigArg>,
    },
    Unpack {
        image: PathBuf,
        bundle: PathBuf,
    },
    /// `entries` and `data` are captured while the staged tar still exists.
    AddLayer {
        image: PathBuf,
        layer: PathBuf,
        tag: Option<String>,
        entries: Vec<String>,
        data: Vec<u8>,
    },
}

impl EngineCall {
    pub fn op(&self) -> &'static str {
        match self {
            EngineCall::InitLayout(_) => "init",
            EngineCall::NewImage(_) => "new",
            EngineCall::Config { .. } => "config",
            EngineCall::Unpack { .. } => "unpack",
            EngineCall::AddLayer { .. } => "add-layer",
        }
    }
}

#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
    fail_on: Option<&'static str>,
    materialize: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn materializing() -> Self {
        Self {
            materialize: true,
            ..Self::default()
        }
    }

    /// Fail every call of `op` (`init`, `new`, `config`, `unpack`,
    /// `add-layer`) with exit code 1, after recording it.
    #[must_use]
    pub fn failing_on(mut self, op: &'static str) -> Self {
        self.fail_on = Some(op);
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.calls).map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: EngineCall) -> Result<(), RuntimeError> {
        let op = call.op();
        lock(&self.calls)?.push(call);
        if self.fail_on == Some(op) {
            return Err(RuntimeError::EngineInvocation {
                command: format!("mock {op}"),
                code: 1,
            });
        }
        Ok(())
    }
}

impl OciEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn init_layout(&self, layout: &Path) -> Result<(), RuntimeError> {
        self.record(EngineCall::InitLayout(layout.to_path_buf()))?;
        if self.materialize {
            OciLayout::new(layout).initialize()?;
        }
        Ok(())
    }

    fn new_image(&self, image: &Path) -> Result<(), RuntimeError> {
        self.record(EngineCall::NewImage(image.to_path_buf()))?;
        if self.materialize {
            materialize_new(image)?;
        }
        Ok(())
    }

    fn config(&self, image: &Path, args: &[ConfigArg]) -> Result<(), RuntimeError> {
        self.record(EngineCall::Config {
            image: image.to_path_buf(),
            args: args.to_vec(),
        })?;
        if self.materialize {
            materialize_config(image, args)?;
        }
        Ok(())
    }

    fn unpack(&self, image: &Path, bundle: &Path) -> Result<(), RuntimeError> {
        self.record(EngineCall::Unpack {
            image: image.to_path_buf(),
            bundle: bundle.to_path_buf(),
        })?;
        std::fs::create_dir_all(bundle.join("rootfs"))?;
        std::fs::write(bundle.join("config.json"), b"{}")?;
        Ok(())
    }

    fn add_layer(
        &self,
        image: &Path,
        layer: &Path,
        tag: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let entries = list_layer_entries(layer)?
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let data = std::fs::read(layer)?;
        self.record(EngineCall::AddLayer {
            image: image.to_path_buf(),
            layer: layer.to_path_buf(),
            tag: tag.map(str::to_owned),
            entries,
            data,
        })
    }
}

/// Empty config and manifest, tagged in the index.
fn materialize_new(image: &Path) -> Result<(), RuntimeError> {
    let (layout, reference) = OciLayout::from_image_path(image)?;
    layout.initialize()?;

    let config = json!({
        "architecture": "amd64",
        "os": "linux",
        "config": {},
        "rootfs": {"type": "layers", "diff_ids": []}
    });
    let (config_digest, config_size) = layout.write_blob_json(&config)?;
    let manifest = ImageManifest {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_OCI_MANIFEST.to_owned()),
        config: Descriptor::new(MEDIA_TYPE_OCI_CONFIG, config_digest, config_size),
        layers: Vec::new(),
        extra: Map::new(),
    };
    let (manifest_digest, manifest_size) = layout.write_blob_json(&manifest)?;

    let mut desc = Descriptor::new(MEDIA_TYPE_OCI_MANIFEST, manifest_digest, manifest_size);
    desc.extra.insert(
        "annotations".to_owned(),
        json!({ REF_NAME_ANNOTATION: reference.tag }),
    );
    let mut index = layout.read_index()?;
    index.manifests.push(desc);
    layout.write_index(&index)?;
    Ok(())
}

/// Apply config-level edits to the first manifest's config. Manifest
/// annotations are only recorded.
fn materialize_config(image: &Path, args: &[ConfigArg]) -> Result<(), RuntimeError> {
    let (layout, _) = OciLayout::from_image_path(image)?;
    let index = layout.read_index()?;
    let Some(first) = index.manifests.first() else {
        return Ok(());
    };
    let manifest: ImageManifest = layout.read_blob_json(&first.digest)?;
    let current: ImageConfig = layout.read_blob_json(&manifest.config.digest)?;

    let mut runtime = match current.get("config") {
        Some(Value::Object(m)) => m.clone(),
        _ => Map::new(),
    };
    let mut edit = ConfigEdit::new();
    for arg in args {
        match arg {
            ConfigArg::Architecture(a) => edit = edit.set("architecture", a.as_str()),
            ConfigArg::Clear(field) => {
                if let Some(key) = runtime_key(*field) {
                    runtime.remove(key);
                }
            }
            ConfigArg::Entrypoint(v) => push_str(&mut runtime, "Entrypoint", v),
            ConfigArg::Cmd(v) => push_str(&mut runtime, "Cmd", v),
            ConfigArg::Env(v) => push_str(&mut runtime, "Env", v),
            ConfigArg::Label(v) => {
                let (k, val) = v.split_once('=').unwrap_or((v.as_str(), ""));
                let labels = runtime
                    .entry("Labels")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(labels) = labels {
                    labels.insert(k.to_owned(), Value::String(val.to_owned()));
                }
            }
            ConfigArg::NoHistory | ConfigArg::Annotation(_) => {}
        }
    }
    rewrite_config(&layout, &edit.set("config", Value::Object(runtime)))?;
    Ok(())
}

fn runtime_key(field: ConfigField) -> Option<&'static str> {
    match field {
        ConfigField::Entrypoint => Some("Entrypoint"),
        ConfigField::Cmd => Some("Cmd"),
        ConfigField::Env => Some("Env"),
        ConfigField::Labels => Some("Labels"),
        ConfigField::Annotations => None,
    }
}

fn push_str(runtime: &mut Map<String, Value>, key: &str, value: &str) {
    let entry = runtime
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(items) = entry {
        items.push(Value::String(value.to_owned()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Copy {
        source: Locator,
        destination: Locator,
        options: CopyOptions,
    },
    Inspect(Locator),
}

pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    inspect_output: String,
    fail_copy: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            inspect_output: format!("sha256:{}", "ab".repeat(32)),
            fail_copy: false,
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_inspect_output(mut self, output: impl Into<String>) -> Self {
        self.inspect_output = output.into();
        self
    }

    #[must_use]
    pub fn failing_copies(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).map(|c| c.clone()).unwrap_or_default()
    }
}

impl Transport for MockTransport {
    fn copy(
        &self,
        source: &Locator,
        destination: &Locator,
        options: &CopyOptions,
    ) -> Result<(), RuntimeError> {
        lock(&self.calls)?.push(TransportCall::Copy {
            source: source.clone(),
            destination: destination.clone(),
            options: options.clone(),
        });
        if self.fail_copy {
            return Err(RuntimeError::Transfer {
                source_locator: source.to_string(),
                destination: destination.to_string(),
                reason: "mock copy failure".to_owned(),
            });
        }
        Ok(())
    }

    fn inspect_digest(&self, locator: &Locator) -> Result<String, RuntimeError> {
        lock(&self.calls)?.push(TransportCall::Inspect(locator.clone()));
        Ok(self.inspect_output.clone())
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, RuntimeError> {
    m.lock()
        .map_err(|e| RuntimeError::Io(std::io::Error::other(format!("mutex poisoned: {e}"))))
}

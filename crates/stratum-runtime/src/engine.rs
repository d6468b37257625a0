use crate::config::ToolConfig;
use crate::observer::{OperationObserver, TracingObserver};
use crate::process::{run_streaming, Invocation};
use crate::RuntimeError;
use std::path::Path;
use std::sync::Arc;

/// Config fields that can be reset before being set again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    Entrypoint,
    Cmd,
    Env,
    Labels,
    Annotations,
}

impl ConfigField {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigField::Entrypoint => "config.entrypoint",
            ConfigField::Cmd => "config.cmd",
            ConfigField::Env => "config.env",
            ConfigField::Labels => "config.labels",
            ConfigField::Annotations => "manifest.annotations",
        }
    }
}

/// One edit in an engine config call. Edits are applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigArg {
    Architecture(String),
    NoHistory,
    Clear(ConfigField),
    Entrypoint(String),
    Cmd(String),
    Env(String),
    Label(String),
    Annotation(String),
}

impl ConfigArg {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            ConfigArg::Architecture(a) => vec!["--architecture".to_owned(), a.clone()],
            ConfigArg::NoHistory => vec!["--no-history".to_owned()],
            ConfigArg::Clear(field) => vec![format!("--clear={}", field.as_str())],
            ConfigArg::Entrypoint(v) => vec!["--config.entrypoint".to_owned(), v.clone()],
            ConfigArg::Cmd(v) => vec!["--config.cmd".to_owned(), v.clone()],
            ConfigArg::Env(v) => vec!["--config.env".to_owned(), v.clone()],
            ConfigArg::Label(v) => vec!["--config.label".to_owned(), v.clone()],
            ConfigArg::Annotation(v) => vec!["--manifest.annotation".to_owned(), v.clone()],
        }
    }
}

/// Byte-level image operations delegated to an external OCI engine.
///
/// `image` paths use the engine's `<layout-dir>/<name>:<tag>` syntax. Every
/// operation blocks until the engine is done, and keeps the layout's digest
/// chain consistent on its own.
pub trait OciEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Create an empty image layout at `layout`.
    fn init_layout(&self, layout: &Path) -> Result<(), RuntimeError>;

    /// Create an empty, tagged manifest.
    fn new_image(&self, image: &Path) -> Result<(), RuntimeError>;

    fn config(&self, image: &Path, args: &[ConfigArg]) -> Result<(), RuntimeError>;

    /// Materialize a runtime bundle (`config.json` + `rootfs/`) at `bundle`.
    fn unpack(&self, image: &Path, bundle: &Path) -> Result<(), RuntimeError>;

    /// Append the tar file `layer` as a new layer. With `tag`, the result is
    /// stored under that tag instead of replacing the source tag.
    fn add_layer(&self, image: &Path, layer: &Path, tag: Option<&str>)
        -> Result<(), RuntimeError>;
}

/// `OciEngine` backed by the umoci command-line tool.
pub struct UmociEngine {
    program: String,
    observer: Arc<dyn OperationObserver>,
}

impl Default for UmociEngine {
    fn default() -> Self {
        Self::new("umoci", Arc::new(TracingObserver))
    }
}

impl UmociEngine {
    pub fn new(program: impl Into<String>, observer: Arc<dyn OperationObserver>) -> Self {
        Self {
            program: program.into(),
            observer,
        }
    }

    pub fn from_config(config: &ToolConfig, observer: Arc<dyn OperationObserver>) -> Self {
        Self::new(config.umoci.clone(), observer)
    }

    pub fn init_command(&self, layout: &Path) -> Invocation {
        Invocation::new(&self.program)
            .args(["init", "--layout"])
            .arg(path_arg(layout))
    }

    pub fn new_command(&self, image: &Path) -> Invocation {
        Invocation::new(&self.program)
            .args(["new", "--image"])
            .arg(path_arg(image))
    }

    pub fn config_command(&self, image: &Path, args: &[ConfigArg]) -> Invocation {
        Invocation::new(&self.program)
            .args(["config", "--image"])
            .arg(path_arg(image))
            .args(args.iter().flat_map(ConfigArg::to_args))
    }

    pub fn unpack_command(&self, image: &Path, bundle: &Path) -> Invocation {
        Invocation::new(&self.program)
            .args(["unpack", "--image"])
            .arg(path_arg(image))
            .arg(path_arg(bundle))
    }

    /// The add-layer command, recording itself as the layer's `created_by`
    /// history entry.
    pub fn add_layer_command(&self, image: &Path, layer: &Path, tag: Option<&str>) -> Invocation {
        let mut inv = Invocation::new(&self.program)
            .args(["raw", "add-layer", "--image"])
            .arg(path_arg(image))
            .arg(path_arg(layer));
        if let Some(tag) = tag {
            inv = inv.args(["--tag", tag]);
        }
        let created_by = inv.to_string();
        inv.args(["--history.created_by".to_owned(), created_by])
    }
}

impl OciEngine for UmociEngine {
    fn name(&self) -> &str {
        &self.program
    }

    fn init_layout(&self, layout: &Path) -> Result<(), RuntimeError> {
        run_streaming(&self.init_command(layout), self.observer.as_ref())
    }

    fn new_image(&self, image: &Path) -> Result<(), RuntimeError> {
        run_streaming(&self.new_command(image), self.observer.as_ref())
    }

    fn config(&self, image: &Path, args: &[ConfigArg]) -> Result<(), RuntimeError> {
        run_streaming(&self.config_command(image, args), self.observer.as_ref())
    }

    fn unpack(&self, image: &Path, bundle: &Path) -> Result<(), RuntimeError> {
        run_streaming(&self.unpack_command(image, bundle), self.observer.as_ref())
    }

    fn add_layer(
        &self,
        image: &Path,
        layer: &Path,
        tag: Option<&str>,
    ) -> Result<(), RuntimeError> {
        run_streaming(
            &self.add_layer_command(image, layer, tag),
            self.observer.as_ref(),
        )
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

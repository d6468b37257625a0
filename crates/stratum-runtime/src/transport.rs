use crate::config::ToolConfig;
use crate::observer::{OperationObserver, TracingObserver};
use crate::process::{run_capture, run_streaming, Invocation};
use crate::RuntimeError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// A transport-qualified image location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// `docker://<name:tag>` on a remote registry.
    Registry(String),
    /// `oci:<layout-dir>/<name:tag>` on the local filesystem.
    Oci(PathBuf),
    /// `oci-archive:<file>:<tag>`.
    OciArchive { file: PathBuf, tag: String },
    /// `docker-daemon:<name>:<tag>`.
    DockerDaemon { name: String, tag: String },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Registry(image) => write!(f, "docker://{image}"),
            Locator::Oci(path) => write!(f, "oci:{}", path.display()),
            Locator::OciArchive { file, tag } => write!(f, "oci-archive:{}:{tag}", file.display()),
            Locator::DockerDaemon { name, tag } => write!(f, "docker-daemon:{name}:{tag}"),
        }
    }
}

impl FromStr for Locator {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RuntimeError::Config(format!("invalid locator '{s}': {reason}"));
        let split_tag = |rest: &str| {
            rest.rsplit_once(':')
                .filter(|(head, tag)| !head.is_empty() && !tag.is_empty())
                .map(|(head, tag)| (head.to_owned(), tag.to_owned()))
                .ok_or_else(|| invalid("expected '<target>:<tag>'"))
        };

        if let Some(image) = s.strip_prefix("docker://") {
            if image.is_empty() {
                return Err(invalid("empty image name"));
            }
            Ok(Locator::Registry(image.to_owned()))
        } else if let Some(rest) = s.strip_prefix("oci-archive:") {
            let (file, tag) = split_tag(rest)?;
            Ok(Locator::OciArchive {
                file: PathBuf::from(file),
                tag,
            })
        } else if let Some(rest) = s.strip_prefix("docker-daemon:") {
            let (name, tag) = split_tag(rest)?;
            Ok(Locator::DockerDaemon { name, tag })
        } else if let Some(path) = s.strip_prefix("oci:") {
            if path.is_empty() {
                return Err(invalid("empty path"));
            }
            Ok(Locator::Oci(PathBuf::from(path)))
        } else {
            Err(invalid("unknown transport"))
        }
    }
}

/// Platform overrides for a copy. `variant` is only honored together with
/// `arch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    pub arch: Option<String>,
    pub variant: Option<String>,
}

impl CopyOptions {
    pub fn platform(arch: impl Into<String>, variant: Option<String>) -> Self {
        Self {
            arch: Some(arch.into()),
            variant,
        }
    }
}

/// Copies between image transports and digest queries.
pub trait Transport: Send + Sync {
    fn copy(
        &self,
        source: &Locator,
        destination: &Locator,
        options: &CopyOptions,
    ) -> Result<(), RuntimeError>;

    /// Return the raw `algorithm:hex` digest string reported for `locator`.
    fn inspect_digest(&self, locator: &Locator) -> Result<String, RuntimeError>;
}

/// `Transport` backed by the skopeo command-line tool.
pub struct SkopeoTransport {
    program: String,
    observer: Arc<dyn OperationObserver>,
}

impl Default for SkopeoTransport {
    fn default() -> Self {
        Self::new("skopeo", Arc::new(TracingObserver))
    }
}

impl SkopeoTransport {
    pub fn new(program: impl Into<String>, observer: Arc<dyn OperationObserver>) -> Self {
        Self {
            program: program.into(),
            observer,
        }
    }

    pub fn from_config(config: &ToolConfig, observer: Arc<dyn OperationObserver>) -> Self {
        Self::new(config.skopeo.clone(), observer)
    }

    pub fn copy_command(
        &self,
        source: &Locator,
        destination: &Locator,
        options: &CopyOptions,
    ) -> Invocation {
        let mut inv = Invocation::new(&self.program).arg("--insecure-policy");
        if let Some(arch) = &options.arch {
            inv = inv.args(["--override-arch", arch.as_str()]);
            if let Some(variant) = &options.variant {
                inv = inv.args(["--override-variant", variant.as_str()]);
            }
        }
        inv.arg("copy")
            .arg(source.to_string())
            .arg(destination.to_string())
    }

    pub fn inspect_command(&self, locator: &Locator) -> Invocation {
        Invocation::new(&self.program)
            .args(["inspect", "--format", "{{.Digest}}", "-n"])
            .arg(locator.to_string())
    }
}

impl Transport for SkopeoTransport {
    fn copy(
        &self,
        source: &Locator,
        destination: &Locator,
        options: &CopyOptions,
    ) -> Result<(), RuntimeError> {
        let inv = self.copy_command(source, destination, options);
        run_streaming(&inv, self.observer.as_ref()).map_err(|e| match e {
            RuntimeError::EngineInvocation { .. } | RuntimeError::Io(_) => RuntimeError::Transfer {
                source_locator: source.to_string(),
                destination: destination.to_string(),
                reason: e.to_string(),
            },
            other => other,
        })
    }

    fn inspect_digest(&self, locator: &Locator) -> Result<String, RuntimeError> {
        let inv = self.inspect_command(locator);
        let out = run_capture(&inv, self.observer.as_ref())?;
        let digest = out.trim();
        if digest.is_empty() {
            return Err(RuntimeError::UnexpectedOutput {
                command: inv.to_string(),
                output: out,
            });
        }
        debug!("{locator} has digest {digest}");
        Ok(digest.to_owned())
    }
}

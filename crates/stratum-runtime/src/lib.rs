//! Adapters for the external tools that manipulate OCI images for Stratum.
//!
//! This crate implements the execution layer: the `OciEngine` trait (layout
//! init, image creation, config edits, unpacking, raw layer addition) and the
//! `Transport` trait (copies between transports, digest inspection), with
//! subprocess-backed implementations for umoci and skopeo and in-memory fakes
//! for tests. Subprocess output is relayed line by line to an injected
//! `OperationObserver`.

pub mod config;
pub mod engine;
pub mod mock;
pub mod observer;
pub mod prereq;
pub mod process;
pub mod transport;

pub use config::ToolConfig;
pub use engine::{ConfigArg, ConfigField, OciEngine, UmociEngine};
pub use observer::{CollectingObserver, OperationObserver, TracingObserver};
pub use prereq::{check_tools, format_missing, MissingTool};
pub use process::Invocation;
pub use transport::{CopyOptions, Locator, SkopeoTransport, Transport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command '{command}' failed with exit code {code}")]
    EngineInvocation { command: String, code: i32 },
    #[error("transfer from '{source_locator}' to '{destination}' failed: {reason}")]
    Transfer {
        source_locator: String,
        destination: String,
        reason: String,
    },
    #[error("tool '{tool}' could not be started: {reason}")]
    ToolMissing { tool: String, reason: String },
    #[error("unexpected output from '{command}': {output}")]
    UnexpectedOutput { command: String, output: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(#[from] stratum_store::StoreError),
}

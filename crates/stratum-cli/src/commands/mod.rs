pub mod completions;
pub mod config;
pub mod export;
pub mod image;
pub mod layer;
pub mod pack;
pub mod verify;

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use stratum_core::ImageStore;
use stratum_runtime::{
    OperationObserver, SkopeoTransport, ToolConfig, TracingObserver, UmociEngine,
};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_ENGINE_ERROR: u8 = 2;
pub const EXIT_LAYOUT_ERROR: u8 = 3;

/// The subprocess-backed engine and transport, built from one config.
pub struct Tools {
    pub config: ToolConfig,
    engine: UmociEngine,
    transport: SkopeoTransport,
}

impl Tools {
    pub fn new(config: ToolConfig) -> Self {
        let observer: Arc<dyn OperationObserver> = Arc::new(TracingObserver);
        Self {
            engine: UmociEngine::from_config(&config, Arc::clone(&observer)),
            transport: SkopeoTransport::from_config(&config, observer),
            config,
        }
    }

    pub fn store(&self) -> ImageStore<'_> {
        ImageStore::from_config(&self.engine, &self.transport, &self.config)
    }
}

/// Map an error message to the process exit code.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.contains("layout corruption at") {
        EXIT_LAYOUT_ERROR
    } else if msg.starts_with("runtime error: command")
        || msg.starts_with("runtime error: transfer from")
        || msg.starts_with("runtime error: tool")
    {
        EXIT_ENGINE_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// `KEY=VALUE` argument parser.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

/// The running machine's architecture in OCI naming.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "arm",
        "powerpc64" => "ppc64le",
        "riscv64" => "riscv64",
        "s390x" => "s390x",
        other => other,
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `f` under a spinner, finishing it with `done` or a failure mark.
pub fn with_spinner<T, E: ToString>(
    msg: &str,
    done: &str,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, String> {
    let pb = spinner(msg);
    match f() {
        Ok(v) => {
            spin_ok(&pb, done);
            Ok(v)
        }
        Err(e) => {
            spin_fail(&pb, &format!("{msg} failed"));
            Err(e.to_string())
        }
    }
}

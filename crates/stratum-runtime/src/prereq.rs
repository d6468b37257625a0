use crate::config::ToolConfig;
use std::fmt;
use std::path::Path;
use std::process::Command;

/// An external tool that could not be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check that the configured engine and transport tools are available.
/// An empty list means everything is in place.
pub fn check_tools(config: &ToolConfig) -> Vec<MissingTool> {
    let mut missing = Vec::new();

    if !command_exists(&config.umoci) {
        missing.push(MissingTool {
            name: config.umoci.clone(),
            purpose: "unpacking images, adding layers and editing image config",
            install_hint: "snap install umoci | apt install umoci | dnf install umoci",
        });
    }

    if !command_exists(&config.skopeo) {
        missing.push(MissingTool {
            name: config.skopeo.clone(),
            purpose: "copying images between registries, layouts and archives",
            install_hint: "apt install skopeo | dnf install skopeo | pacman -S skopeo",
        });
    }

    missing
}

pub fn format_missing(missing: &[MissingTool]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing tools:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nStratum delegates image manipulation to these tools.");
    msg
}

mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::config::FieldUpdate;
use commands::{exit_code_for, host_arch, parse_key_val, Tools, EXIT_FAILURE};
use std::path::PathBuf;
use std::process::ExitCode;
use stratum_core::{Image, PackOptions};
use stratum_runtime::ToolConfig;

#[derive(Debug, Parser)]
#[command(
    name = "stratum",
    version,
    about = "Assemble OCI images from root filesystems"
)]
struct Cli {
    /// Path to a JSON tool configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// An image inside a layout directory.
#[derive(Debug, Args)]
struct ImageArgs {
    /// Image as `name:tag`.
    image: String,
    /// Directory holding the image's OCI layout.
    #[arg(long, default_value = "images")]
    dir: PathBuf,
}

impl ImageArgs {
    fn image(&self) -> Image {
        Image::new(self.image.clone(), self.dir.clone())
    }
}

#[derive(Debug, Args)]
struct PlatformArgs {
    /// Target architecture (defaults to the host's).
    #[arg(long)]
    arch: Option<String>,
    /// Architecture variant, e.g. `v7`.
    #[arg(long)]
    variant: Option<String>,
}

impl PlatformArgs {
    fn arch(&self) -> &str {
        self.arch.as_deref().unwrap_or(host_arch())
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull a registry image into a local OCI layout.
    Pull {
        /// Registry image as `name:tag`.
        image: String,
        #[arg(long, default_value = "images")]
        dir: PathBuf,
        #[command(flatten)]
        platform: PlatformArgs,
    },
    /// Create an empty image with no layers.
    New {
        /// Image as `name:tag`.
        image: String,
        #[arg(long, default_value = "images")]
        dir: PathBuf,
        #[command(flatten)]
        platform: PlatformArgs,
    },
    /// Copy an image to a new name and directory.
    Copy {
        #[command(flatten)]
        source: ImageArgs,
        /// Destination as `name:tag`.
        new_name: String,
        /// Destination layout directory.
        #[arg(long)]
        new_dir: PathBuf,
    },
    /// Unpack an image into a runtime bundle and print its rootfs.
    Unpack {
        #[command(flatten)]
        target: ImageArgs,
        /// Directory that receives the bundle.
        #[arg(long, default_value = "bundles")]
        bundle_dir: PathBuf,
    },
    /// Add a root filesystem directory as a new layer.
    AddLayer {
        #[command(flatten)]
        target: ImageArgs,
        /// Directory to pack.
        root: PathBuf,
        /// Tag for the resulting image.
        #[arg(long)]
        tag: String,
    },
    /// Replace the entrypoint (values after --).
    SetEntrypoint {
        #[command(flatten)]
        target: ImageArgs,
        #[arg(last = true)]
        values: Vec<String>,
    },
    /// Replace the default command (values after --).
    SetCmd {
        #[command(flatten)]
        target: ImageArgs,
        #[arg(last = true)]
        values: Vec<String>,
    },
    /// Replace the environment.
    SetEnv {
        #[command(flatten)]
        target: ImageArgs,
        /// Variable as KEY=VALUE (repeatable).
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    /// Set labels and manifest annotations.
    Annotate {
        #[command(flatten)]
        target: ImageArgs,
        /// Annotation as KEY=VALUE (repeatable).
        #[arg(long = "annotation", value_parser = parse_key_val)]
        annotations: Vec<(String, String)>,
    },
    /// Embed build provenance as a control-data layer.
    ControlData {
        #[command(flatten)]
        target: ImageArgs,
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        /// RFC 3339 creation time (defaults to now).
        #[arg(long)]
        created: Option<String>,
    },
    /// Record an architecture variant directly in the image config.
    SetVariant {
        #[command(flatten)]
        target: ImageArgs,
        variant: String,
    },
    /// Export an image tag to the local docker daemon.
    ExportDaemon {
        #[command(flatten)]
        target: ImageArgs,
        #[arg(long)]
        tag: String,
    },
    /// Export an image tag to an OCI archive file.
    ExportArchive {
        #[command(flatten)]
        target: ImageArgs,
        #[arg(long)]
        tag: String,
        /// Archive file to write.
        output: PathBuf,
    },
    /// Print the manifest digest of an image at a transport locator.
    Digest {
        /// e.g. `docker://ubuntu:22.04` or `oci-archive:rock.tar:1.0`.
        locator: String,
    },
    /// Verify the digest chain of an OCI layout.
    Verify {
        /// Layout directory (contains index.json).
        layout: PathBuf,
    },
    /// List the entries of a layer tarball.
    InspectLayer { tar: PathBuf },
    /// Assemble a root filesystem on a base image and export an OCI archive.
    Pack {
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        /// `bare` or a registry image as `name:tag`.
        #[arg(long, default_value = "bare")]
        base: String,
        #[command(flatten)]
        platform: PlatformArgs,
        /// Root filesystem to add as the new layer.
        #[arg(long)]
        prime_dir: PathBuf,
        /// Holds the intermediate images and bundles.
        #[arg(long, default_value = ".stratum")]
        work_dir: PathBuf,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        /// Entrypoint argument (repeatable).
        #[arg(long)]
        entrypoint: Vec<String>,
        /// Command argument (repeatable).
        #[arg(long)]
        cmd: Vec<String>,
        /// Variable as KEY=VALUE (repeatable).
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        /// Annotation as KEY=VALUE (repeatable).
        #[arg(long = "annotation", value_parser = parse_key_val)]
        annotations: Vec<(String, String)>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Commands {
    fn needs_tools(&self) -> bool {
        !matches!(
            self,
            Commands::SetVariant { .. }
                | Commands::Verify { .. }
                | Commands::InspectLayer { .. }
                | Commands::Completions { .. }
        )
    }
}

#[allow(clippy::too_many_lines)]
fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATUM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => ToolConfig::load(path).map(ToolConfig::with_env_overrides),
        None => ToolConfig::load_default(),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    if cli.command.needs_tools() && std::env::var("STRATUM_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = stratum_runtime::check_tools(&config);
        if !missing.is_empty() {
            eprintln!("error: {}", stratum_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let tools = Tools::new(config);
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Pull {
            image,
            dir,
            platform,
        } => commands::image::pull(
            &tools,
            &image,
            &dir,
            platform.arch(),
            platform.variant.as_deref(),
            json_output,
        ),
        Commands::New {
            image,
            dir,
            platform,
        } => commands::image::new(
            &tools,
            &image,
            &dir,
            platform.arch(),
            platform.variant.as_deref(),
            json_output,
        ),
        Commands::Copy {
            source,
            new_name,
            new_dir,
        } => commands::image::copy(&tools, &source.image(), &new_name, &new_dir, json_output),
        Commands::Unpack { target, bundle_dir } => {
            commands::image::unpack(&tools, &target.image(), &bundle_dir, json_output)
        }
        Commands::AddLayer { target, root, tag } => {
            commands::layer::add_layer(&tools, &target.image(), &tag, &root, json_output)
        }
        Commands::SetEntrypoint { target, values } => commands::config::set_field(
            &tools,
            &target.image(),
            &FieldUpdate::Entrypoint(&values),
            json_output,
        ),
        Commands::SetCmd { target, values } => commands::config::set_field(
            &tools,
            &target.image(),
            &FieldUpdate::Cmd(&values),
            json_output,
        ),
        Commands::SetEnv { target, env } => commands::config::set_field(
            &tools,
            &target.image(),
            &FieldUpdate::Env(&env),
            json_output,
        ),
        Commands::Annotate {
            target,
            annotations,
        } => commands::config::set_field(
            &tools,
            &target.image(),
            &FieldUpdate::Annotations(&annotations),
            json_output,
        ),
        Commands::ControlData {
            target,
            name,
            version,
            created,
        } => commands::layer::control_data(
            &tools,
            &target.image(),
            &name,
            &version,
            created.as_deref(),
            json_output,
        ),
        Commands::SetVariant { target, variant } => {
            commands::config::set_variant(&target.image(), &variant, json_output)
        }
        Commands::ExportDaemon { target, tag } => {
            commands::export::to_daemon(&tools, &target.image(), &tag, json_output)
        }
        Commands::ExportArchive {
            target,
            tag,
            output,
        } => commands::export::to_archive(&tools, &target.image(), &tag, &output, json_output),
        Commands::Digest { locator } => commands::export::digest(&tools, &locator, json_output),
        Commands::Verify { layout } => commands::verify::run(&layout, json_output),
        Commands::InspectLayer { tar } => commands::layer::inspect_layer(&tar, json_output),
        Commands::Pack {
            name,
            version,
            base,
            platform,
            prime_dir,
            work_dir,
            output_dir,
            entrypoint,
            cmd,
            env,
            annotations,
        } => {
            let opts = PackOptions {
                name,
                version,
                base,
                arch: platform.arch().to_owned(),
                variant: platform.variant,
                prime_dir,
                work_dir,
                output_dir,
                entrypoint,
                cmd,
                env,
                annotations,
            };
            commands::pack::run(&tools, &opts, json_output)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

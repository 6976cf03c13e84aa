mod bootstrap;
mod config;
mod container;
mod error;
mod fs;
mod platform;
mod reference;
mod registry;
mod sandbox;

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bootstrap::{INIT_MARKER, SandboxSpec};
use config::RegistryConfig;
use registry::{PulledImage, RegistryClient};

/// Pulls images from an OCI registry and runs them in rootless namespaces
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull an image and run a command inside it
    Run {
        /// Image reference, `[namespace/]image[:tag]`
        image: String,

        /// Command and arguments; defaults to the image's command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        #[command(flatten)]
        registry: RegistryConfig,
    },

    /// Pull an image and print the path of its root filesystem
    Pull {
        /// Image reference, `[namespace/]image[:tag]`
        image: String,

        #[command(flatten)]
        registry: RegistryConfig,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn pull(image: &str, registry: RegistryConfig) -> anyhow::Result<PulledImage> {
    // the HTTP client and its worker thread are dropped on return, before any clone(2)
    let client = RegistryClient::new(registry).context("failed to set up registry client")?;
    client
        .pull(image)
        .with_context(|| format!("failed to pull {}", image))
}

fn run(image: &str, command: &[String], registry: RegistryConfig) -> anyhow::Result<i32> {
    let pulled = pull(image, registry)?;

    let spec = SandboxSpec {
        command: bootstrap::select_command(command, &pulled.config),
        rootfs: pulled.rootfs,
        env: pulled.config.env,
        working_dir: pulled.config.working_dir,
    };
    let frame = bootstrap::encode(&spec);

    let code = container::spawn(&frame).context("failed to launch container")?;
    info!(code, "Container exited");
    Ok(code)
}

/// Entry point of the re-exec'd process.
fn init(args: impl IntoIterator<Item = std::ffi::OsString>) -> anyhow::Result<i32> {
    let frame = bootstrap::frame_from_os_args(args)?;
    let spec = bootstrap::decode(&frame).context("invalid bootstrap frame")?;
    let code = sandbox::run(&spec, &mut sandbox::Kernel).context("sandbox setup failed")?;
    Ok(code)
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn main() -> ExitCode {
    init_logging();

    let mut args = std::env::args_os();
    let is_init = args.nth(1).is_some_and(|arg| arg == INIT_MARKER);

    let result = if is_init {
        init(args)
    } else {
        match Cli::parse().command {
            Commands::Run {
                image,
                command,
                registry,
            } => run(&image, &command, registry),
            Commands::Pull { image, registry } => pull(&image, registry).map(|pulled| {
                println!("{}", pulled.rootfs.display());
                0
            }),
        }
    };

    match result {
        Ok(code) => exit_code(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod offline;
mod setup;

#[derive(Parser)]
#[command(name = "likeness", version, about = "Face verification and liveness tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download and verify the ONNX models
    Setup {
        /// Target directory (default: system or user data directory)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// Check that every model file is present with the expected checksum
    CheckModels {
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// Detect the primary face in an image and print its descriptor
    Detect {
        image: PathBuf,
        #[command(flatten)]
        backend: offline::BackendArgs,
    },
    /// Decide whether two images show the same person
    Verify {
        registered: PathBuf,
        captured: PathBuf,
        #[command(flatten)]
        backend: offline::BackendArgs,
        #[command(flatten)]
        policy: offline::PolicyArgs,
    },
    /// Two-frame liveness check
    Liveness {
        first: PathBuf,
        second: PathBuf,
        #[command(flatten)]
        backend: offline::BackendArgs,
        #[command(flatten)]
        policy: offline::PolicyArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Setup { model_dir } => setup::run(model_dir),
        Command::CheckModels { model_dir } => setup::check(model_dir),
        Command::Detect { image, backend } => offline::detect(&image, &backend),
        Command::Verify {
            registered,
            captured,
            backend,
            policy,
        } => offline::verify(&registered, &captured, &backend, &policy),
        Command::Liveness {
            first,
            second,
            backend,
            policy,
        } => offline::liveness(&first, &second, &backend, &policy),
    }
}

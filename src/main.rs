//! sandhost CLI: lifecycle commands and the sandbox file/command surface,
//! with JSON responses on stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sandhost::config::ManagerConfig;
use sandhost::orchestrator::LifecycleOrchestrator;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sandhost", version, about = "Ephemeral per-user dev sandbox manager")]
struct Cli {
    /// Path to a TOML config file; defaults apply when omitted or missing.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision a fresh sandbox (tears down any existing one first).
    Create {
        /// Base name for the sandbox user; a random suffix is appended.
        #[arg(long)]
        user: Option<String>,
    },
    /// Kill the active sandbox. A no-op when none exists.
    Kill,
    /// Report the active sandbox and a liveness probe of its process.
    Status,
    /// Restart the dev server on the same port and directory.
    Restart,
    /// Run a shell command inside the sandbox directory.
    Exec {
        command: String,
        /// Working directory relative to the sandbox root.
        #[arg(long)]
        cwd: Option<String>,
    },
    /// Write a file (relative path) into the sandbox.
    Write {
        path: String,
        #[arg(long)]
        content: String,
    },
    /// Read a file from the sandbox.
    Read { path: String },
    /// Delete a file from the sandbox.
    Rm { path: String },
    /// List all sandbox files (skipping node_modules and build output).
    Ls,
    /// Install npm packages and restart the dev server.
    Install { packages: Vec<String> },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ManagerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ManagerConfig::default(),
    };

    let orchestrator = LifecycleOrchestrator::new(config);

    match cli.command {
        Command::Create { user } => {
            let response = orchestrator.create(user.as_deref()).await?;
            print_json(&response)?;
        }
        Command::Kill => {
            let response = orchestrator.kill().await;
            print_json(&response)?;
        }
        Command::Status => {
            let response = orchestrator.status().await;
            print_json(&response)?;
        }
        Command::Restart => {
            let response = orchestrator.restart().await?;
            print_json(&response)?;
        }
        Command::Exec { command, cwd } => {
            let output = orchestrator.run_command(&command, cwd.as_deref()).await?;
            print_json(&output)?;
        }
        Command::Write { path, content } => {
            orchestrator.write_file(&path, &content).await?;
            print_json(&serde_json::json!({ "written": path }))?;
        }
        Command::Read { path } => {
            let content = orchestrator.read_file(&path).await?;
            print!("{content}");
        }
        Command::Rm { path } => {
            orchestrator.delete_file(&path).await?;
            print_json(&serde_json::json!({ "deleted": path }))?;
        }
        Command::Ls => {
            let files = orchestrator.list_files().await?;
            print_json(&files)?;
        }
        Command::Install { packages } => {
            let report = orchestrator.install_packages(&packages).await?;
            print_json(&report)?;
        }
    }

    Ok(())
}

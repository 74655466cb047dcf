//! `onenote-image-fetcher` command-line entry point

use clap::{Parser, Subcommand};
use onenote_image_fetcher::walker::list_notebooks;
use onenote_image_fetcher::{
    Config, DownloadMode, FileCollisionAction, Result, Session, run_with_shutdown,
};
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// ============================================================================
// CLI Definition
// ============================================================================

/// Download the images embedded in OneNote notebooks.
///
/// Settings come from the environment (and `.env`); the flags below override them.
#[derive(Parser)]
#[command(name = "onenote-image-fetcher")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run. If none, runs 'serve'.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Only walk the notebook with this display name.
    #[arg(long, global = true, env = "NOTEBOOK_NAME")]
    pub notebook: Option<String>,

    /// Directory images are saved under.
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Address of the local web server.
    #[arg(long, global = true)]
    pub bind: Option<SocketAddr>,

    /// Image source for each page: content or preview.
    #[arg(long, global = true)]
    pub mode: Option<DownloadMode>,

    /// What to do when an image file already exists: rename, overwrite or skip.
    #[arg(long, global = true, env = "FILE_COLLISION")]
    pub on_collision: Option<FileCollisionAction>,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the sign-in web server and fetch images (default).
    Serve,

    /// List the notebooks of the signed-in user.
    Notebooks,

    /// Forget the stored token.
    Logout,
}

// ============================================================================
// Logging Setup
// ============================================================================

/// stderr plus an append-only log file, which error escalation reads back
fn setup_logging(log_file: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        ),
        Err(e) => {
            eprintln!("Warning: cannot open log file {}: {e}", log_file.display());
            None
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "exiting with error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    apply_overrides(&mut config, &cli);
    setup_logging(&config.escalation.log_file);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            config.validate()?;
            let session = Arc::new(Session::new(config)?);
            run_with_shutdown(session).await
        }
        Command::Notebooks => {
            config.validate()?;
            let session = Session::new(config)?;
            let notebooks = list_notebooks(&session).await?;
            if notebooks.is_empty() {
                println!("No notebooks found.");
            }
            for notebook in notebooks {
                println!("{}\t{}", notebook.name, notebook.id);
            }
            Ok(())
        }
        Command::Logout => {
            let session = Session::new(config)?;
            session.logout()?;
            println!("Signed out.");
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(notebook) = &cli.notebook {
        config.walk.notebook_name = Some(notebook.clone());
    }
    if let Some(output_dir) = &cli.output_dir {
        config.walk.output_dir = output_dir.clone();
    }
    if let Some(bind) = cli.bind {
        config.web.bind_address = bind;
    }
    if let Some(mode) = cli.mode {
        config.walk.mode = mode;
    }
    if let Some(action) = cli.on_collision {
        config.walk.file_collision = action;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_collision_flag_overrides_config() {
        let cli = Cli::try_parse_from([
            "onenote-image-fetcher",
            "--on-collision",
            "skip",
            "--mode",
            "preview",
        ])
        .unwrap();
        let mut config = Config::default();

        apply_overrides(&mut config, &cli);

        assert_eq!(config.walk.file_collision, FileCollisionAction::Skip);
        assert_eq!(config.walk.mode, DownloadMode::Preview);
    }

    #[test]
    fn test_unknown_collision_action_is_rejected() {
        let parsed = Cli::try_parse_from(["onenote-image-fetcher", "--on-collision", "append"]);
        assert!(parsed.is_err());
    }
}

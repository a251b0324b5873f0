mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use output::{OutputFormat, print_error};

/// pforge - build schema bundles and run code generators against them
#[derive(Parser)]
#[command(name = "pforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Repository root (the directory holding protoforge.yaml)
  #[arg(short = 'C', long, global = true, default_value = ".")]
  repo: PathBuf,

  /// Output format
  #[arg(long, global = true, value_enum, default_value_t)]
  format: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the plugins of the given bundles (all bundles if none are named)
  Generate {
    /// Bundles to generate
    bundles: Vec<String>,

    /// Directory generated files are written below (default: repository root)
    #[arg(short, long)]
    out: Option<PathBuf>,
  },

  /// Build a bundle as a versioned release and emit its dependency manifest
  Publish {
    /// Bundle to publish
    bundle: String,

    /// Version to stamp the release with
    #[arg(long = "version", value_name = "VERSION")]
    release: String,

    /// Directory generated files are written below (default: repository root)
    #[arg(short, long)]
    out: Option<PathBuf>,
  },

  /// Pin every registry dependency to its latest version
  Lock,

  /// List bundles in dependency order
  Bundles,

  /// Show which bundle owns a file
  Which {
    /// File path, absolute or relative to the repository root
    file: PathBuf,
  },
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

/// Cancel `token` on Ctrl-C so running plugins are torn down.
fn cancel_on_interrupt(token: CancellationToken) {
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupted, stopping plugins");
      token.cancel();
    }
  });
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let cancel = CancellationToken::new();
  cancel_on_interrupt(cancel.clone());

  let result = match cli.command {
    Commands::Generate { bundles, out } => cmd::cmd_generate(&cli.repo, &bundles, out.as_deref(), cli.format, &cancel).await,
    Commands::Publish { bundle, release, out } => {
      cmd::cmd_publish(&cli.repo, &bundle, &release, out.as_deref(), cli.format, &cancel).await
    }
    Commands::Lock => cmd::cmd_lock(&cli.repo, cli.format).await,
    Commands::Bundles => cmd::cmd_bundles(&cli.repo, cli.verbose, cli.format),
    Commands::Which { file } => cmd::cmd_which(&cli.repo, &file, cli.format),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use pkgprint::commands::{classify_command, extract_command, run_command, RunOptions};
use pkgprint::init_tracing;

/// Corpus-scale string fingerprinting for packaged ELF binaries.
///
/// This CLI is a thin wrapper around `pkgprint-core` (exposed in code as
/// `pkgprint_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "pkgprint",
    version,
    about = "Extract, classify and fingerprint strings across a package corpus",
    long_about = None
)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every binary listed in a package manifest.
    ///
    /// Writes the classified inventories, aggregate counts, duplicate groups,
    /// unique sets and a run report as JSON files under `--out`.
    Run {
        /// Manifest file: `<package> <version> <arch> <member-path> [<source>]` per line.
        #[arg(long)]
        manifest: String,

        /// Directory member paths are relative to. Defaults to the manifest's directory.
        #[arg(long)]
        root: Option<String>,

        /// Output directory.
        #[arg(long)]
        out: String,

        /// Pipeline config JSON.
        #[arg(long)]
        config: Option<String>,

        /// Checkpoint database. Defaults to `<out>/.pkgprint/checkpoint.db`.
        #[arg(long)]
        checkpoint: Option<String>,

        /// Do not read or write a checkpoint.
        #[arg(long, default_value_t = false, conflicts_with = "checkpoint")]
        no_checkpoint: bool,
    },

    /// Dump the classified strings of one ELF file.
    Extract {
        /// Path to the ELF file.
        path: String,

        /// Pipeline config JSON (extraction settings only).
        #[arg(long)]
        config: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the classification label of each value.
    Classify {
        /// Values to classify.
        #[arg(required = true)]
        values: Vec<String>,

        /// Emit JSON (including the matching rule) instead of text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run { manifest, root, out, config, checkpoint, no_checkpoint } => {
            run_command(&RunOptions { manifest, root, out, config, checkpoint, no_checkpoint })?
        }
        Command::Extract { path, config, json } => extract_command(&path, config.as_deref(), json)?,
        Command::Classify { values, json } => classify_command(&values, json)?,
    }

    Ok(())
}

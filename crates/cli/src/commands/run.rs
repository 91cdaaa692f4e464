use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use pkgprint_core::config::{load_config, OutputLayout, PipelineConfig};
use pkgprint_core::manifest::Corpus;
use pkgprint_core::pipeline::Pipeline;
use pkgprint_core::report::write_products;
use pkgprint_core::store::CheckpointDb;
use tracing::info;

use crate::{canonicalize_or_current, default_corpus_root};

/// Arguments of `pkgprint run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub manifest: String,
    pub root: Option<String>,
    pub out: String,
    pub config: Option<String>,
    pub checkpoint: Option<String>,
    pub no_checkpoint: bool,
}

/// Process a whole corpus and write every product under `out`.
pub fn run_command(opts: &RunOptions) -> Result<()> {
    let manifest = canonicalize_or_current(&opts.manifest)?;
    let root = match &opts.root {
        Some(root) => canonicalize_or_current(root)?,
        None => default_corpus_root(&manifest),
    };
    let config = match &opts.config {
        Some(path) => load_config(Path::new(path))?,
        None => PipelineConfig::default(),
    };

    let corpus = Corpus::load(&manifest, &root)
        .with_context(|| format!("Invalid corpus manifest {}", manifest.display()))?;

    let layout = OutputLayout::new(canonicalize_or_current(&opts.out)?);
    fs::create_dir_all(&layout.meta_dir)
        .with_context(|| format!("Failed to create meta dir: {}", layout.meta_dir.display()))?;

    let checkpoint = if opts.no_checkpoint {
        None
    } else {
        let path = match &opts.checkpoint {
            Some(path) => canonicalize_or_current(path)?,
            None => layout.checkpoint_path.clone(),
        };
        let db = CheckpointDb::open(&path)
            .with_context(|| format!("Failed to open checkpoint database at {}", path.display()))?;
        info!(checkpoint = %path.display(), recorded = db.count()?, "opened checkpoint");
        Some(db)
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))
            .context("Failed to install Ctrl-C handler")?;
    }

    let pipeline = Pipeline::new(config);
    let output = pipeline.run(&corpus, checkpoint.as_ref(), &cancel)?;
    write_products(&layout, &output.products, &output.report)?;

    let report = &output.report;
    println!(
        "Processed {}/{} binaries ({} resumed, {} non-ELF, {} failed), {} distinct strings",
        report.processed,
        report.binaries_total,
        report.resumed,
        report.non_elf.len(),
        report.decode_failures.len(),
        report.distinct_strings
    );
    if report.cancelled {
        println!("Run cancelled; rerun with the same checkpoint to resume.");
    }
    println!("Wrote products to {}", layout.root.display());
    Ok(())
}

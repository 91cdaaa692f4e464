//! Pipeline driver: parallel extraction, single reducer, read-only passes.
//!
//! Workers (rayon) read, hash, decode, extract and classify one binary each
//! and send the resulting [`BinaryInventory`] into a bounded channel. The
//! calling thread is the only reducer: it merges inventories into the
//! [`ShardedIndex`], records them in the checkpoint store and collects
//! warnings. Once every binary is accounted for, the index is frozen and the
//! aggregate and partition passes run over it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate;
use crate::config::PipelineConfig;
use crate::decode::{is_elf, DecodeError, ElfDecoder, GoblinDecoder};
use crate::extract::{ExtractOptions, Extractor};
use crate::index::{BinaryInventory, FrozenIndex, InvariantViolation, ShardedIndex};
use crate::manifest::{Corpus, CorpusInputError};
use crate::model::Binary;
use crate::partition::partition;
use crate::report::{BinaryWarning, DecodeFailure, Products, RunReport};
use crate::store::{CheckpointDb, RunRecord, StoreError};

/// Run-level failures. Per-binary problems never surface here; they end up
/// in the [`RunReport`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Corpus(#[from] CorpusInputError),

    #[error("Internal invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result of processing one binary on a worker.
#[derive(Debug)]
pub enum Outcome {
    Extracted(BinaryInventory),
    /// Content hash matches the checkpoint; the reducer reloads the inventory.
    Resumed { binary: u32, content_hash: String },
    NonElf { binary: u32 },
    Failed { binary: u32, error: DecodeError },
}

/// Everything one run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub index: FrozenIndex,
    pub products: Products,
    pub report: RunReport,
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub struct Pipeline {
    config: PipelineConfig,
    decoder: Arc<dyn ElfDecoder>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_decoder(config, Arc::new(GoblinDecoder))
    }

    pub fn with_decoder(config: PipelineConfig, decoder: Arc<dyn ElfDecoder>) -> Self {
        Self { config, decoder }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read, decode and extract one binary. `recorded_hash` is the content
    /// hash the checkpoint holds for it, if any.
    pub fn process_binary(
        &self,
        binary: &Binary,
        options: &ExtractOptions,
        recorded_hash: Option<&str>,
    ) -> Outcome {
        let bytes = match std::fs::read(&binary.path) {
            Ok(bytes) => bytes,
            Err(source) => {
                return Outcome::Failed {
                    binary: binary.index,
                    error: DecodeError::Io { path: binary.path.clone(), source },
                }
            }
        };
        let hash = content_hash(&bytes);
        if recorded_hash == Some(hash.as_str()) {
            return Outcome::Resumed { binary: binary.index, content_hash: hash };
        }
        if !is_elf(&bytes) {
            return Outcome::NonElf { binary: binary.index };
        }

        let elf = match self.decoder.decode(bytes) {
            Ok(elf) => elf,
            Err(DecodeError::NotElf) => return Outcome::NonElf { binary: binary.index },
            Err(error) => return Outcome::Failed { binary: binary.index, error },
        };
        let extractor = Extractor::new(&elf, options);
        let mut inventory = BinaryInventory::build(binary, elf.arch.clone(), &extractor);
        inventory.content_hash = Some(hash);
        debug!(
            binary = %binary.id,
            arch = %inventory.arch,
            sections = elf.sections.len(),
            strings = inventory.distinct_count(),
            "extracted binary"
        );
        Outcome::Extracted(inventory)
    }

    fn fan_out(
        &self,
        corpus: &Corpus,
        recorded: &HashMap<String, String>,
        cancel: &AtomicBool,
        tx: SyncSender<Outcome>,
    ) {
        let options = self.config.extract_options();
        // A send error means the reducer stopped; stop dispatching too.
        let _ = corpus.binaries.par_iter().try_for_each_with(tx, |tx, binary| {
            if cancel.load(Ordering::Relaxed) {
                return Ok(());
            }
            let recorded_hash = recorded.get(&binary.id.key()).map(String::as_str);
            tx.send(self.process_binary(binary, &options, recorded_hash))
        });
    }

    /// Run the whole pipeline over `corpus`.
    ///
    /// Setting `cancel` stops dispatching new binaries; binaries already
    /// merged stay in the index (and in the checkpoint) and the report is
    /// marked cancelled.
    pub fn run(
        &self,
        corpus: &Corpus,
        checkpoint: Option<&CheckpointDb>,
        cancel: &AtomicBool,
    ) -> Result<RunOutput, PipelineError> {
        let started_at = now_rfc3339();
        let options_hash = self.config.extract_options().fingerprint();
        let recorded = match checkpoint {
            Some(db) => db.recorded_hashes(&options_hash)?,
            None => HashMap::new(),
        };
        info!(
            packages = corpus.packages.len(),
            binaries = corpus.binaries.len(),
            checkpointed = recorded.len(),
            "starting run"
        );

        let pool = match self.config.workers {
            Some(workers) => Some(rayon::ThreadPoolBuilder::new().num_threads(workers.max(1)).build()?),
            None => None,
        };

        let index = ShardedIndex::new(corpus.catalog(), self.config.shards);
        let mut report = RunReport { binaries_total: corpus.binaries.len(), started_at, ..RunReport::default() };
        let (tx, rx) = sync_channel::<Outcome>(self.config.queue_depth.max(1));

        let accounted = std::thread::scope(|scope| -> Result<usize, PipelineError> {
            let recorded = &recorded;
            let pool = pool.as_ref();
            scope.spawn(move || match pool {
                Some(pool) => pool.install(|| self.fan_out(corpus, recorded, cancel, tx)),
                None => self.fan_out(corpus, recorded, cancel, tx),
            });

            let mut accounted = 0;
            for outcome in rx {
                accounted += 1;
                self.reduce(corpus, outcome, &index, checkpoint, &options_hash, &mut report)?;
            }
            Ok(accounted)
        })?;

        report.cancelled = accounted < corpus.binaries.len();
        if report.cancelled {
            warn!(accounted, total = corpus.binaries.len(), "run cancelled; results cover processed binaries only");
        }

        let index = index.freeze()?;
        info!(strings = index.len(), binaries = report.processed, "froze inverted index");
        let aggregates = aggregate(&index);
        let partitions = partition(&index);
        info!(
            elf_set_groups = aggregates.grouped_by_elf_set.len(),
            package_set_groups = aggregates.grouped_by_package_set.len(),
            "computed aggregates and partitions"
        );
        let products = Products::assemble(&index, aggregates, partitions);

        report.distinct_strings = index.len();
        report.finished_at = now_rfc3339();
        report.normalize();
        if let Some(db) = checkpoint {
            db.insert_run(&RunRecord {
                started_at: report.started_at.clone(),
                finished_at: report.finished_at.clone(),
                processed: report.processed as i64,
                resumed: report.resumed as i64,
                cancelled: report.cancelled,
            })?;
        }
        info!(
            processed = report.processed,
            resumed = report.resumed,
            non_elf = report.non_elf.len(),
            decode_failures = report.decode_failures.len(),
            warnings = report.extraction_warnings.len(),
            "run finished"
        );

        Ok(RunOutput { index, products, report })
    }

    fn reduce(
        &self,
        corpus: &Corpus,
        outcome: Outcome,
        index: &ShardedIndex,
        checkpoint: Option<&CheckpointDb>,
        options_hash: &str,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let key = |binary: u32| index.catalog().binary_key(binary).to_string();
        match outcome {
            Outcome::Extracted(inventory) => {
                if let Some(db) = checkpoint {
                    db.record(&inventory, options_hash, &now_rfc3339())?;
                }
                self.merge(inventory, index, report)?;
            }
            Outcome::Resumed { binary, content_hash } => {
                let Some(member) = corpus.binaries.get(binary as usize) else {
                    return Err(InvariantViolation::UnknownBinary(format!("#{binary}")).into());
                };
                let stored = match checkpoint {
                    Some(db) => db.load(&key(binary), &content_hash, options_hash)?,
                    None => None,
                };
                match stored {
                    Some(mut inventory) => {
                        // Dense ids are manifest positions of the recording run.
                        inventory.binary = member.id.clone();
                        inventory.binary_index = member.index;
                        inventory.package_index = member.package;
                        debug!(binary = %key(binary), "resumed from checkpoint");
                        report.resumed += 1;
                        self.merge(inventory, index, report)?;
                    }
                    None => {
                        let options = self.config.extract_options();
                        let outcome = self.process_binary(member, &options, None);
                        return self.reduce(corpus, outcome, index, checkpoint, options_hash, report);
                    }
                }
            }
            Outcome::NonElf { binary } => {
                debug!(binary = %key(binary), "skipping non-ELF member");
                report.non_elf.push(key(binary));
            }
            Outcome::Failed { binary, error } => {
                warn!(binary = %key(binary), %error, "failed to decode binary");
                report.decode_failures.push(DecodeFailure { binary: key(binary), error: error.to_string() });
            }
        }
        Ok(())
    }

    fn merge(
        &self,
        inventory: BinaryInventory,
        index: &ShardedIndex,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let binary = inventory.binary.key();
        for warning in &inventory.warnings {
            warn!(binary = %binary, section = %warning.section, reason = %warning.reason, "skipped section");
            report
                .extraction_warnings
                .push(BinaryWarning { binary: binary.clone(), warning: warning.clone() });
        }
        index.merge(inventory)?;
        report.processed += 1;
        Ok(())
    }
}

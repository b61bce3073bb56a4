//! One generation run, end to end.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::artifacts::{collect_artifacts, data_uri, remove_run_files};
use super::cache::GenerationCache;
use super::engine::{operator_message, ProcessEngine, ReplenishCommand, TilingEngine};
use super::lock::GenerationLock;
use super::snapshot::render_snapshot;
use super::{GenerationPhase, GenerationReport};
use crate::config::MosaicConfig;
use crate::error::{MosaicError, Result};
use crate::stock::StockLedger;

const DEFAULT_IMAGE_EXTENSION: &str = "png";

struct PhaseTracker {
    image_id: i64,
    current: GenerationPhase,
    history: Vec<GenerationPhase>,
}

impl PhaseTracker {
    fn new(image_id: i64) -> Self {
        Self { image_id, current: GenerationPhase::Idle, history: vec![GenerationPhase::Idle] }
    }

    fn advance(&mut self, next: GenerationPhase) {
        info!("Generation for image {}: {:?} -> {:?}", self.image_id, self.current, next);
        self.current = next;
        self.history.push(next);
    }
}

/// Removes a run's files when dropped, whichever way the run ends.
struct RunCleanup {
    files: Vec<PathBuf>,
    sweep: Option<(PathBuf, String)>,
}

impl Drop for RunCleanup {
    fn drop(&mut self) {
        for file in &self.files {
            if let Err(e) = std::fs::remove_file(file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", file.display(), e);
                }
            }
        }
        if let Some((dir, run_id)) = &self.sweep {
            remove_run_files(dir, run_id);
        }
    }
}

fn sanitize_extension(extension: &str) -> String {
    let clean: String = extension
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if clean.is_empty() {
        DEFAULT_IMAGE_EXTENSION.to_string()
    } else {
        clean
    }
}

fn ensure_writable(dir: &Path) -> Result<()> {
    tempfile::NamedTempFile::new_in(dir)
        .map(drop)
        .map_err(|_| MosaicError::NotWritable(dir.to_path_buf()))
}

pub struct GenerationOrchestrator {
    config: MosaicConfig,
    engine: Arc<dyn TilingEngine>,
    ledger: Arc<dyn StockLedger>,
    cache: Arc<GenerationCache>,
    lock: GenerationLock,
}

impl GenerationOrchestrator {
    pub fn new(
        config: MosaicConfig,
        engine: Arc<dyn TilingEngine>,
        ledger: Arc<dyn StockLedger>,
        cache: Arc<GenerationCache>,
    ) -> Self {
        let lock = GenerationLock::new(config.lock_path());
        Self { config, engine, ledger, cache, lock }
    }

    /// Process engine and a fresh cache sized from the configuration.
    pub fn from_config(config: MosaicConfig, ledger: Arc<dyn StockLedger>) -> Self {
        let engine = Arc::new(ProcessEngine::from_config(&config));
        let cache = Arc::new(GenerationCache::new(config.cache_ttl, config.cache_capacity));
        Self::new(config, engine, ledger, cache)
    }

    pub fn config(&self) -> &MosaicConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<GenerationCache> {
        &self.cache
    }

    /// Produce every style variant for one image.
    ///
    /// Runs are serialized system-wide by the generation lock; a second
    /// caller waits up to `lock_timeout`. Working files of the run are
    /// removed on every exit path, and the lock is released only after.
    pub async fn generate(&self, image_id: i64, image: &[u8], extension: &str) -> Result<GenerationReport> {
        if let Some(mut report) = self.cache.get(image_id, image).await {
            info!("Serving cached generation {} for image {}", report.run_id, image_id);
            report.cached = true;
            report.engine_status = None;
            return Ok(report);
        }

        ensure_writable(&self.config.input_dir)?;
        ensure_writable(&self.config.output_dir)?;
        self.engine.check_available()?;

        let mut phases = PhaseTracker::new(image_id);
        match self.run_locked(image_id, image, extension, &mut phases).await {
            Ok(report) => {
                self.cache.insert(image_id, image, report.clone()).await;
                Ok(report)
            }
            Err(e) => {
                phases.advance(GenerationPhase::Failed);
                error!("Generation for image {} failed: {}", image_id, e);
                Err(e)
            }
        }
    }

    async fn run_locked(
        &self,
        image_id: i64,
        image: &[u8],
        extension: &str,
        phases: &mut PhaseTracker,
    ) -> Result<GenerationReport> {
        let waited = Instant::now();
        let _guard = self.lock.acquire_async(self.config.lock_timeout).await?;
        info!("Generation lock held for image {} after {:?}", image_id, waited.elapsed());
        phases.advance(GenerationPhase::LockAcquired);

        let levels = self.ledger.stock_levels().await?;
        fs::write(self.config.snapshot_path(), render_snapshot(&levels)).await?;
        phases.advance(GenerationPhase::SnapshotWritten);

        let run_id = format!("image_{}_{}", image_id, Uuid::new_v4().simple());
        let file_name = format!("{}.{}", run_id, sanitize_extension(extension));
        let input_path = self.config.input_dir.join(&file_name);
        let output_prefix = self.config.output_dir.join(&file_name);

        let cleanup = RunCleanup {
            files: vec![input_path.clone()],
            sweep: Some((self.config.output_dir.clone(), run_id.clone())),
        };
        fs::write(&input_path, image).await?;

        phases.advance(GenerationPhase::EngineRunning);
        let run = self.engine.pave(&input_path, &output_prefix).await?;
        if !run.success() {
            warn!("Engine exited with {:?} for {}, keeping partial output: {}", run.status, run_id, run.combined_output());
        }

        let collected = collect_artifacts(&self.config.output_dir, &run_id).await?;
        phases.advance(GenerationPhase::ResultsCollected);

        drop(cleanup);
        phases.advance(GenerationPhase::CleanedUp);

        if collected.is_empty() {
            let reason = if run.success() {
                "engine produced no output".to_string()
            } else {
                format!("engine exited with {:?}: {}", run.status, run.combined_output())
            };
            return Err(MosaicError::GenerationFailed { image_id, reason });
        }

        info!(
            "Generation {} produced {} style(s) from {} file(s)",
            run_id,
            collected.variants.len(),
            collected.files_removed
        );
        Ok(GenerationReport {
            image_id,
            run_id,
            variants: collected.variants,
            engine_status: run.status,
            cached: false,
            phases: phases.history.clone(),
        })
    }

    /// Render one layout to a PNG data URI. `None` when the engine drew nothing.
    pub async fn render_preview(&self, layout: &str) -> Result<Option<String>> {
        let token = format!("visual_{}", Uuid::new_v4().simple());
        let input = self.config.input_dir.join(format!("{token}.txt"));
        let output = self.config.output_dir.join(format!("{token}.png"));
        let _cleanup = RunCleanup { files: vec![input.clone(), output.clone()], sweep: None };

        fs::write(&input, layout).await?;
        let run = self.engine.visualize(&input, &output).await?;

        match fs::read(&output).await {
            Ok(bytes) if !bytes.is_empty() => Ok(Some(data_uri("image/png", &bytes))),
            _ => {
                warn!("Visualization produced no image (status {:?}): {}", run.status, run.combined_output());
                Ok(None)
            }
        }
    }

    /// Run a replenishment command and return the operator message.
    pub async fn replenish(&self, command: &ReplenishCommand) -> Result<String> {
        let run = self.engine.replenish(command).await?;
        if !run.success() {
            return Err(MosaicError::EngineFailure { status: run.status, message: run.combined_output() });
        }
        let message = operator_message(&run.stdout);
        info!("Replenishment {:?}: {}", command, message);
        Ok(message)
    }
}

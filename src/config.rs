//! Configuration
//!
//! Paths and limits for the generation pipeline, read from the
//! environment (a `.env` file is honoured by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MosaicError, Result};

const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;
const DEFAULT_CACHE_TTL_SECS: u64 = 1800;
const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Configuration for the mosaic engine and its storage
#[derive(Debug, Clone)]
pub struct MosaicConfig {
    /// Directory receiving the stock snapshot, input images and the lock file
    pub input_dir: PathBuf,
    /// Directory the tiling engine writes its artifacts into
    pub output_dir: PathBuf,
    /// Working directory the engine process is started from
    pub engine_workdir: PathBuf,
    /// Launcher program (usually `java`)
    pub engine_program: String,
    /// Engine archive passed as `-jar <path>`; `None` runs the program directly
    pub engine_jar: Option<PathBuf>,
    /// Native tiling executable handed to the `pave` command
    pub pavage_exec: PathBuf,
    /// SQLite database holding catalog, ledger and mosaics
    pub db_path: PathBuf,
    pub engine_timeout: Duration,
    pub lock_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self::rooted_at(".")
    }
}

impl MosaicConfig {
    /// Layout used by a deployment rooted at `root`.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let engine_workdir = root.join("engine");
        let (input_dir, output_dir) = engine_work_dirs(&engine_workdir);
        Self {
            input_dir,
            output_dir,
            engine_workdir,
            engine_program: "java".to_string(),
            engine_jar: Some(root.join("bin").join("legotools.jar")),
            pavage_exec: root.join("bin").join("pavage"),
            db_path: root.join("mosaic.db"),
            engine_timeout: Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECS),
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Build from `MOSAIC_*` environment variables, falling back to the
    /// layout rooted at the current directory.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_path("MOSAIC_ENGINE_WORKDIR") {
            config = config.with_engine_workdir(dir);
        }
        if let Some(dir) = env_path("MOSAIC_INPUT_DIR") {
            config.input_dir = dir;
        }
        if let Some(dir) = env_path("MOSAIC_OUTPUT_DIR") {
            config.output_dir = dir;
        }
        if let Ok(program) = std::env::var("MOSAIC_ENGINE_PROGRAM") {
            config.engine_program = program;
        }
        if let Ok(jar) = std::env::var("MOSAIC_ENGINE_JAR") {
            config.engine_jar = if jar.is_empty() { None } else { Some(PathBuf::from(jar)) };
        }
        if let Some(exec) = env_path("MOSAIC_PAVAGE_EXEC") {
            config.pavage_exec = exec;
        }
        if let Some(db) = env_path("MOSAIC_DB_PATH") {
            config.db_path = db;
        }
        if let Some(secs) = env_number("MOSAIC_ENGINE_TIMEOUT_SECS")? {
            config.engine_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("MOSAIC_LOCK_TIMEOUT_SECS")? {
            config.lock_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("MOSAIC_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_number("MOSAIC_CACHE_CAPACITY")? {
            config.cache_capacity = capacity as usize;
        }

        Ok(config)
    }

    /// Moves the engine and its `C/input`, `C/output` work directories.
    pub fn with_engine_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.engine_workdir = dir.into();
        (self.input_dir, self.output_dir) = engine_work_dirs(&self.engine_workdir);
        self
    }

    pub fn with_work_dirs(mut self, input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.input_dir = input_dir.into();
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_cache(mut self, ttl: Duration, capacity: usize) -> Self {
        self.cache_ttl = ttl;
        self.cache_capacity = capacity;
        self
    }

    /// File the stock snapshot is written to before each engine run.
    pub fn snapshot_path(&self) -> PathBuf {
        self.input_dir.join("briques.txt")
    }

    /// Advisory lock file shared by every generation on this host.
    pub fn lock_path(&self) -> PathBuf {
        self.input_dir.join("generation.lock")
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_number(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| MosaicError::Configuration(format!("{key} must be a non-negative integer, got '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// The engine reads and writes relative to `C/` under its workdir.
fn engine_work_dirs(engine_workdir: &Path) -> (PathBuf, PathBuf) {
    let base = engine_workdir.join("C");
    (base.join("input"), base.join("output"))
}

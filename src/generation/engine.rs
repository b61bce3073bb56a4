//! Tiling Engine Adapter
//!
//! The external engine is a black box driven by structured arguments,
//! never a shell string. `ProcessEngine` runs it as a child process with
//! a bounded runtime; tests substitute their own `TilingEngine`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::MosaicConfig;
use crate::error::{MosaicError, Result};

const EMPTY_OPERATOR_MESSAGE: &str = "Operation completed (see server logs for details).";

lazy_static::lazy_static! {
    static ref NEW_BALANCE: Regex = Regex::new(r"Nouveau solde : (\d+)").expect("valid balance pattern");
    static ref BALANCE: Regex = Regex::new(r"Solde : (\d+)").expect("valid balance pattern");
    static ref DISALLOWED: Regex = Regex::new(r"[^a-zA-Z0-9\s.\-():]").expect("valid filter pattern");
}

/// Captured result of one engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRun {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl EngineRun {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Both streams, for error reports.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.trim().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

/// Factory and stock replenishment commands understood by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplenishCommand {
    /// Buy `quantity` of the item with the given engine reference.
    Buy { reference: String, quantity: u32 },
    Refill,
    Order,
    Proactive,
    Restock,
}

impl ReplenishCommand {
    pub fn args(&self) -> Vec<String> {
        match self {
            ReplenishCommand::Buy { reference, quantity } => {
                vec!["buy".to_string(), reference.clone(), quantity.to_string()]
            }
            ReplenishCommand::Refill => vec!["refill".to_string()],
            ReplenishCommand::Order => vec!["order".to_string()],
            ReplenishCommand::Proactive => vec!["proactive".to_string()],
            ReplenishCommand::Restock => vec!["restock".to_string()],
        }
    }

    /// Parse an operator action name. `buy` needs its own arguments.
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "refill" => Some(ReplenishCommand::Refill),
            "order" => Some(ReplenishCommand::Order),
            "proactive" => Some(ReplenishCommand::Proactive),
            "restock" => Some(ReplenishCommand::Restock),
            _ => None,
        }
    }
}

#[async_trait]
pub trait TilingEngine: Send + Sync {
    /// Verify the engine can be started at all. Called before any side effect.
    fn check_available(&self) -> Result<()>;

    /// `pave <input> <output_prefix> <exec> all`
    async fn pave(&self, input: &Path, output_prefix: &Path) -> Result<EngineRun>;

    /// `visualize <layout> <output>`
    async fn visualize(&self, layout: &Path, output: &Path) -> Result<EngineRun>;

    async fn replenish(&self, command: &ReplenishCommand) -> Result<EngineRun>;
}

/// The engine as a child process (by default `java -jar <jar> ...`).
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: String,
    jar: Option<PathBuf>,
    pavage_exec: PathBuf,
    workdir: PathBuf,
    timeout: Duration,
}

impl ProcessEngine {
    pub fn from_config(config: &MosaicConfig) -> Self {
        Self {
            program: config.engine_program.clone(),
            jar: config.engine_jar.clone(),
            pavage_exec: config.pavage_exec.clone(),
            workdir: config.engine_workdir.clone(),
            timeout: config.engine_timeout,
        }
    }

    async fn run(&self, args: Vec<OsString>) -> Result<EngineRun> {
        let mut full_args: Vec<OsString> = Vec::new();
        if let Some(jar) = &self.jar {
            full_args.push("-jar".into());
            full_args.push(jar.clone().into_os_string());
        }
        full_args.extend(args);
        debug!("Running engine: {} {:?} (cwd {})", self.program, full_args, self.workdir.display());

        let started = Instant::now();
        let result = timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&full_args)
                .current_dir(&self.workdir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let run = EngineRun {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    elapsed: started.elapsed(),
                };
                if run.success() {
                    debug!("Engine finished in {:?}", run.elapsed);
                } else {
                    warn!("Engine exited with {:?} after {:?}", run.status, run.elapsed);
                }
                Ok(run)
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MosaicError::Configuration(format!("engine program '{}' not found", self.program)))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!("Engine exceeded {:?}, killed", self.timeout);
                Err(MosaicError::EngineTimeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl TilingEngine for ProcessEngine {
    fn check_available(&self) -> Result<()> {
        if !self.workdir.is_dir() {
            return Err(MosaicError::Configuration(format!(
                "engine working directory {} does not exist",
                self.workdir.display()
            )));
        }
        if let Some(jar) = &self.jar {
            if !jar.is_file() {
                return Err(MosaicError::Configuration(format!("engine archive {} not found", jar.display())));
            }
        }
        if !self.pavage_exec.exists() {
            return Err(MosaicError::Configuration(format!(
                "tiling executable {} not found",
                self.pavage_exec.display()
            )));
        }
        Ok(())
    }

    async fn pave(&self, input: &Path, output_prefix: &Path) -> Result<EngineRun> {
        info!("Paving {}", input.display());
        self.run(vec![
            "pave".into(),
            input.as_os_str().to_owned(),
            output_prefix.as_os_str().to_owned(),
            self.pavage_exec.as_os_str().to_owned(),
            "all".into(),
        ])
        .await
    }

    async fn visualize(&self, layout: &Path, output: &Path) -> Result<EngineRun> {
        self.run(vec!["visualize".into(), layout.as_os_str().to_owned(), output.as_os_str().to_owned()])
            .await
    }

    async fn replenish(&self, command: &ReplenishCommand) -> Result<EngineRun> {
        info!("Replenishment command: {:?}", command);
        self.run(command.args().into_iter().map(OsString::from).collect()).await
    }
}

fn fold_accents(line: &str) -> String {
    line.chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' => 'e',
            'à' | 'â' => 'a',
            'ï' | 'î' => 'i',
            'ô' | 'ö' => 'o',
            'ç' => 'c',
            'ù' => 'u',
            other => other,
        })
        .collect()
}

/// Operator-facing summary of a replenishment run's stdout.
pub fn operator_message(stdout: &str) -> String {
    let lines: Vec<String> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"))
        .map(|line| DISALLOWED.replace_all(&fold_accents(line), "").into_owned())
        .collect();

    if lines.is_empty() {
        EMPTY_OPERATOR_MESSAGE.to_string()
    } else {
        lines.join(" - ")
    }
}

/// Supplier balance printed by factory commands.
pub fn factory_balance(output: &str) -> Option<u64> {
    NEW_BALANCE
        .captures(output)
        .or_else(|| BALANCE.captures(output))
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_message_filters_lines() {
        let stdout = "// debug trace\n\nAchat validé : 20 briques\n  Coût total : 12.50€ \n// end\n";
        assert_eq!(operator_message(stdout), "Achat valide : 20 briques - Cout total : 12.50");
        assert_eq!(operator_message("\n// only comments\n"), EMPTY_OPERATOR_MESSAGE);
    }

    #[test]
    fn test_factory_balance() {
        assert_eq!(factory_balance("Solde : 40\nNouveau solde : 120"), Some(120));
        assert_eq!(factory_balance("Solde : 40"), Some(40));
        assert_eq!(factory_balance("rien"), None);
    }

    #[test]
    fn test_replenish_args() {
        let buy = ReplenishCommand::Buy { reference: "2x4/ff0000".into(), quantity: 20 };
        assert_eq!(buy.args(), vec!["buy", "2x4/ff0000", "20"]);
        assert_eq!(ReplenishCommand::from_action("restock"), Some(ReplenishCommand::Restock));
        assert_eq!(ReplenishCommand::from_action("buy"), None);
    }

    #[test]
    fn test_combined_output() {
        let run = EngineRun {
            status: Some(1),
            stdout: "partial\n".into(),
            stderr: "boom\n".into(),
            elapsed: Duration::ZERO,
        };
        assert!(!run.success());
        assert_eq!(run.combined_output(), "partial\nboom");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_engine_timeout_and_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MosaicConfig::rooted_at(dir.path()).with_engine_timeout(Duration::from_millis(200));
        config.engine_workdir = dir.path().to_path_buf();
        config.engine_jar = None;

        config.engine_program = "sleep".into();
        let engine = ProcessEngine::from_config(&config);
        let err = engine.run(vec!["5".into()]).await.unwrap_err();
        assert!(matches!(err, MosaicError::EngineTimeout(_)));

        config.engine_program = "definitely-not-an-engine-binary".into();
        let engine = ProcessEngine::from_config(&config);
        let err = engine.run(vec![]).await.unwrap_err();
        assert!(matches!(err, MosaicError::Configuration(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_engine_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MosaicConfig::rooted_at(dir.path());
        config.engine_workdir = dir.path().to_path_buf();
        config.engine_jar = None;
        config.engine_program = "echo".into();

        let engine = ProcessEngine::from_config(&config);
        let run = engine.replenish(&ReplenishCommand::Refill).await.unwrap();
        assert!(run.success());
        assert_eq!(run.stdout.trim(), "refill");
    }
}

//! Echidna campaign driver.

pub mod format;

use crate::io::read_background;
use regex::Regex;
use std::{
    fs::{read_dir, read_to_string},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    time::{Duration, Instant},
};
use thiserror::Error;

/// Sub directory of the corpus dir holding the sequences.
pub const COVERAGE_DIR: &str = "coverage";

#[derive(Debug, Clone)]
pub struct EchidnaConfig {
    pub bin: PathBuf,
    pub files: Vec<PathBuf>,
    pub contract: Option<String>,
    pub corpus_dir: PathBuf,
    pub test_mode: String,
    pub test_limit: u64,
    pub contract_addr: String,
    pub deployer: String,
    pub senders: Vec<String>,
    pub seed: Option<u64>,
    pub config: Option<PathBuf>,
}

impl Default for EchidnaConfig {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("echidna-test"),
            files: Vec::new(),
            contract: None,
            corpus_dir: PathBuf::from("corpus"),
            test_mode: "assertion".to_string(),
            test_limit: 50000,
            contract_addr: "00a329c0648769a73afac7f9381e08fb43dbea72".to_string(),
            deployer: "30000".to_string(),
            senders: vec!["10000".to_string(), "20000".to_string(), "30000".to_string()],
            seed: None,
            config: None,
        }
    }
}

impl EchidnaConfig {
    pub fn command(&self, seq_len: usize) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(&self.files);
        if let Some(c) = self.contract.as_ref() {
            cmd.arg("--contract").arg(c);
        }
        cmd.arg("--corpus-dir")
            .arg(&self.corpus_dir)
            .arg("--test-mode")
            .arg(&self.test_mode)
            .arg("--seq-len")
            .arg(seq_len.to_string())
            .arg("--test-limit")
            .arg(self.test_limit.to_string())
            .arg("--contract-addr")
            .arg(&self.contract_addr)
            .arg("--deployer")
            .arg(&self.deployer)
            .arg("--format")
            .arg("text");
        for s in self.senders.iter() {
            cmd.arg("--sender").arg(s);
        }
        if let Some(seed) = self.seed {
            cmd.arg("--seed").arg(seed.to_string());
        }
        if let Some(conf) = self.config.as_ref() {
            cmd.arg("--config").arg(conf);
        }
        cmd
    }
}

#[derive(Debug, Clone, Default)]
pub struct CampaignReport {
    pub unique_instructions: Option<u64>,
    pub covered_lines: Option<u64>,
    pub duration: Duration,
    pub stdout: String,
}

#[derive(Debug, Error)]
pub enum FuzzerError {
    #[error("failed to spawn {bin}: {source}")]
    Spawn {
        bin: PathBuf,
        source: std::io::Error,
    },
    #[error("echidna failed ({status}):\n{stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// One fuzzing campaign against the shared corpus.
pub trait Campaign: Send {
    fn run(&mut self, seq_len: usize) -> Result<CampaignReport, FuzzerError>;
}

#[derive(Debug)]
pub struct EchidnaRunner {
    config: EchidnaConfig,
    unique_insts: Regex,
}

impl EchidnaRunner {
    pub fn new(config: EchidnaConfig) -> Self {
        Self {
            config,
            unique_insts: Regex::new(r"Unique instructions:\s*(\d+)").unwrap(),
        }
    }

    pub fn config(&self) -> &EchidnaConfig {
        &self.config
    }
}

impl Campaign for EchidnaRunner {
    fn run(&mut self, seq_len: usize) -> Result<CampaignReport, FuzzerError> {
        let mut cmd = self.config.command(seq_len);
        log::debug!("echidna cmdline: {:?}", cmd);
        let start = Instant::now();
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FuzzerError::Spawn {
                bin: self.config.bin.clone(),
                source,
            })?;
        let stdout = read_background(child.stdout.take().ok_or_else(|| {
            FuzzerError::Other("echidna stdout not piped".to_string())
        })?);
        let stderr = read_background(child.stderr.take().ok_or_else(|| {
            FuzzerError::Other("echidna stderr not piped".to_string())
        })?);
        let status = child.wait()?;
        let stdout = stdout.wait_string();
        let stderr = stderr.wait_string();

        // exit code is not reliable, anything on stderr means failure
        if !stderr.trim().is_empty() {
            return Err(FuzzerError::Failed { status, stderr });
        }
        log::debug!("echidna stdout:\n{}", stdout);

        Ok(CampaignReport {
            unique_instructions: parse_unique_instructions(&self.unique_insts, &stdout),
            covered_lines: latest_covered_file(&self.config.corpus_dir)
                .and_then(|f| count_covered_lines(&f)),
            duration: start.elapsed(),
            stdout,
        })
    }
}

fn parse_unique_instructions(re: &Regex, stdout: &str) -> Option<u64> {
    re.captures_iter(stdout)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Most recent `covered.<timestamp>.txt` in the corpus dir.
fn latest_covered_file(corpus_dir: &Path) -> Option<PathBuf> {
    read_dir(corpus_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let ts = name.strip_prefix("covered.")?.strip_suffix(".txt")?;
            let ts = ts.parse::<u64>().ok()?;
            Some((ts, e.path()))
        })
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, p)| p)
}

/// Lines marked as executed, echidna prefixes them with `*` before the `|`.
fn count_covered_lines(f: &Path) -> Option<u64> {
    let content = read_to_string(f).ok()?;
    let n = content
        .lines()
        .filter(|l| l.split('|').next().map_or(false, |m| m.contains('*')))
        .count();
    Some(n as u64)
}

use ethnum::U256;
use hybrid_core::{coverage::CovMode, queue::QueueConfig, tx::Address};
use hybrid_wrapper::{echidna::EchidnaConfig, engine::EngineConfig};
use std::{
    env::current_dir,
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub const DEFAULT_CONTRACT_ADDR: &str = "00a329c0648769a73afac7f9381e08fb43dbea72";

#[derive(Debug, Clone)]
pub struct Config {
    pub files: Vec<PathBuf>,
    pub contract: Option<String>,
    pub corpus_dir: PathBuf,
    pub test_mode: String,
    pub seq_len: usize,
    pub echidna_config: Option<PathBuf>,
    pub test_limit: u64,
    pub contract_addr: Address,
    pub deployer: Address,
    pub senders: Vec<Address>,
    pub seed: Option<u64>,
    pub max_iters: Option<u64>,
    pub cov_mode: CovMode,
    pub solver_timeout: Duration,
    pub solver_retries: u32,
    pub jobs: usize,
    /// Work items handed to the solver per iteration, unbounded if `None`.
    pub work_budget: Option<usize>,
    pub incremental: bool,
    pub incremental_threshold: usize,
    pub echidna: PathBuf,
    pub engine: PathBuf,
    pub slither: PathBuf,
    pub replay_timeout: Duration,
    pub display: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            contract: None,
            corpus_dir: default_corpus_dir(),
            test_mode: "assertion".to_string(),
            seq_len: 10,
            echidna_config: None,
            test_limit: 50000,
            contract_addr: DEFAULT_CONTRACT_ADDR.parse().unwrap_or_default(),
            deployer: Address::from_word(U256::new(0x30000)),
            senders: vec![
                Address::from_word(U256::new(0x10000)),
                Address::from_word(U256::new(0x20000)),
                Address::from_word(U256::new(0x30000)),
            ],
            seed: None,
            max_iters: None,
            cov_mode: CovMode::InstTx,
            solver_timeout: Duration::from_secs(30),
            solver_retries: 2,
            jobs: 4,
            work_budget: None,
            incremental: true,
            incremental_threshold: 5,
            echidna: PathBuf::from("echidna-test"),
            engine: PathBuf::from("hybrid-engine"),
            slither: PathBuf::from("slither"),
            replay_timeout: Duration::from_secs(60),
            display: true,
        }
    }
}

/// `hybrid-<unix secs>` under the current dir.
pub fn default_corpus_dir() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let name = format!("hybrid-{}", now);
    current_dir()
        .map(|d| d.join(&name))
        .unwrap_or_else(|_| PathBuf::from(name))
}

impl Config {
    pub fn check(&mut self) -> anyhow::Result<()> {
        if self.files.is_empty() {
            anyhow::bail!("no contract file given");
        }
        for f in self.files.iter() {
            if !f.is_file() {
                anyhow::bail!("bad contract file: {}", f.display());
            }
        }
        if self.contract.is_none() {
            if self.files.len() != 1 {
                anyhow::bail!("--contract is required with multiple files");
            }
            self.contract = self.files[0]
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned());
        }
        if let Some(c) = self.echidna_config.as_ref() {
            if !c.is_file() {
                anyhow::bail!("bad echidna config file: {}", c.display());
            }
        }
        if self.corpus_dir.exists() && !self.corpus_dir.is_dir() {
            anyhow::bail!("corpus dir is not a directory: {}", self.corpus_dir.display());
        }
        if self.seq_len == 0 {
            anyhow::bail!("seq-len must be positive");
        }
        if self.jobs == 0 {
            anyhow::bail!("jobs must be positive");
        }
        if self.incremental_threshold == 0 {
            anyhow::bail!("incremental-threshold must be positive");
        }
        if self.solver_timeout.as_millis() == 0 || self.replay_timeout.as_millis() == 0 {
            anyhow::bail!("timeouts must be positive");
        }
        if self.work_budget == Some(0) {
            anyhow::bail!("work-budget must be positive");
        }
        if self.senders.is_empty() {
            anyhow::bail!("at least one sender is required");
        }
        Ok(())
    }

    /// Name of the contract under test, known after `check`.
    pub fn contract_name(&self) -> &str {
        self.contract.as_deref().unwrap_or_default()
    }

    pub fn echidna_config(&self) -> EchidnaConfig {
        EchidnaConfig {
            bin: self.echidna.clone(),
            files: self.files.clone(),
            contract: self.contract.clone(),
            corpus_dir: self.corpus_dir.clone(),
            test_mode: self.test_mode.clone(),
            test_limit: self.test_limit,
            contract_addr: self.contract_addr.to_string(),
            deployer: self.deployer.to_string(),
            senders: self.senders.iter().map(|s| s.to_string()).collect(),
            seed: self.seed,
            config: self.echidna_config.clone(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            bin: self.engine.clone(),
            args: Vec::new(),
            contract_file: self.files.first().cloned().unwrap_or_default(),
            contract: self.contract.clone(),
            contract_addr: self.contract_addr,
            deployer: self.deployer,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            timeout_retries: self.solver_retries,
            ..Default::default()
        }
    }
}

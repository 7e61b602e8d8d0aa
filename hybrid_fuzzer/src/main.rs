use anyhow::Context;
use env_logger::{Env, Target, TimestampPrecision};
use hybrid_core::{coverage::CovMode, tx::Address};
use hybrid_fuzzer::{
    boot,
    config::{default_corpus_dir, Config, DEFAULT_CONTRACT_ADDR},
};
use std::{fs::File, path::PathBuf, time::Duration};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "hybrid-echidna")]
struct Settings {
    /// Solidity files to analyze.
    #[structopt(required = true)]
    files: Vec<PathBuf>,
    /// Contract under test.
    #[structopt(long)]
    contract: Option<String>,
    /// Directory shared with echidna, a fresh one is created if absent.
    #[structopt(long)]
    corpus_dir: Option<PathBuf>,
    /// Echidna test mode.
    #[structopt(long, default_value = "assertion")]
    test_mode: String,
    /// Maximum length of transaction sequences.
    #[structopt(long, default_value = "10")]
    seq_len: usize,
    /// Echidna config file.
    #[structopt(long)]
    config: Option<PathBuf>,
    /// Number of sequences echidna runs per campaign.
    #[structopt(long, default_value = "50000")]
    test_limit: u64,
    /// Address the contract is deployed at.
    #[structopt(long, default_value = DEFAULT_CONTRACT_ADDR)]
    contract_addr: Address,
    /// Address of the deployer.
    #[structopt(long, default_value = "30000")]
    deployer: Address,
    /// Transaction sender, may be repeated. Defaults to 10000, 20000 and 30000.
    #[structopt(long = "sender", number_of_values = 1)]
    senders: Vec<Address>,
    /// Random seed for echidna and seed sampling.
    #[structopt(long)]
    seed: Option<u64>,
    /// Stop after this many iterations.
    #[structopt(long)]
    max_iters: Option<u64>,
    /// Coverage mode: inst, inst-tx, inst-sg, path or path-relaxed.
    #[structopt(long, default_value = "inst-tx")]
    cov_mode: CovMode,
    /// Solver timeout per branch in milliseconds.
    #[structopt(long, default_value = "30000")]
    solver_timeout: u64,
    /// Retries of a branch after a solver timeout.
    #[structopt(long, default_value = "2")]
    solver_retries: u32,
    /// Parallel solver workers.
    #[structopt(long, short = "j", default_value = "4")]
    jobs: usize,
    /// Work items solved per iteration.
    #[structopt(long)]
    work_budget: Option<usize>,
    /// Disable incremental seeding.
    #[structopt(long)]
    no_incremental: bool,
    /// Sequence length up to which incremental seeding runs.
    #[structopt(long, default_value = "5")]
    incremental_threshold: usize,
    /// Path to echidna.
    #[structopt(long, default_value = "echidna-test")]
    echidna: PathBuf,
    /// Path to the symbolic engine.
    #[structopt(long, default_value = "hybrid-engine")]
    engine: PathBuf,
    /// Path to slither.
    #[structopt(long, default_value = "slither")]
    slither: PathBuf,
    /// Replay timeout in milliseconds.
    #[structopt(long, default_value = "60000")]
    replay_timeout: u64,
    /// Debug logging.
    #[structopt(long)]
    debug: bool,
    /// Log destination, a file path or 'stdout'.
    #[structopt(long)]
    logs: Option<PathBuf>,
    /// Disable the periodic status display.
    #[structopt(long)]
    no_display: bool,
}

fn main() -> anyhow::Result<()> {
    let settings = Settings::from_args();

    let log_env = Env::new()
        .filter_or("HYBRID_LOG", "info")
        .default_write_style_or("auto");
    let mut builder = env_logger::Builder::from_env(log_env);
    builder.format_timestamp(Some(TimestampPrecision::Seconds));
    if settings.debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    if let Some(logs) = settings.logs.as_ref() {
        if logs.as_os_str() == "stdout" {
            if !settings.no_display {
                anyhow::bail!("cannot log to stdout with the display enabled, add --no-display");
            }
            builder.target(Target::Stdout);
        } else {
            let f = File::create(logs)
                .with_context(|| format!("failed to create log file {}", logs.display()))?;
            builder.target(Target::Pipe(Box::new(f)));
        }
    }
    builder.init();

    let mut config = Config {
        files: settings.files,
        contract: settings.contract,
        corpus_dir: settings.corpus_dir.unwrap_or_else(default_corpus_dir),
        test_mode: settings.test_mode,
        seq_len: settings.seq_len,
        echidna_config: settings.config,
        test_limit: settings.test_limit,
        contract_addr: settings.contract_addr,
        deployer: settings.deployer,
        senders: Vec::new(),
        seed: settings.seed,
        max_iters: settings.max_iters,
        cov_mode: settings.cov_mode,
        solver_timeout: Duration::from_millis(settings.solver_timeout),
        solver_retries: settings.solver_retries,
        jobs: settings.jobs,
        work_budget: settings.work_budget,
        incremental: !settings.no_incremental,
        incremental_threshold: settings.incremental_threshold,
        echidna: settings.echidna,
        engine: settings.engine,
        slither: settings.slither,
        replay_timeout: Duration::from_millis(settings.replay_timeout),
        display: !settings.no_display,
    };
    if settings.senders.is_empty() {
        config.senders = Config::default().senders;
    } else {
        config.senders = settings.senders;
    }

    boot(config)
}

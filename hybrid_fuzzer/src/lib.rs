//! Hybrid echidna: echidna campaigns extended by a symbolic engine.

#[macro_use]
pub mod worker_log;
pub mod config;
pub mod controller;
pub mod corpus;
pub mod recorder;
pub mod seeding;
pub mod solver;
pub mod stats;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use hybrid_core::{HashMap, HashSet};

use crate::{
    config::Config, controller::Controller, corpus::CorpusSync, seeding::IncrementalSeeder,
    stats::Stats, util::Stop,
};
use anyhow::Context;
use hybrid_core::RngType;
use hybrid_wrapper::{echidna::EchidnaRunner, engine::ProcessEngine, slither::extract_dataflow};
use rand::SeedableRng;
use std::{os::raw::c_int, sync::Arc, thread, time::Duration};

pub fn boot(mut config: Config) -> anyhow::Result<()> {
    config.check().context("config error")?;
    println!("{}", HYBRID);

    let stop = Stop::new();
    setup_signal_handler(stop.clone()).context("failed to setup signal handler")?;

    log::info!("corpus dir: {}", config.corpus_dir.display());
    let corpus = CorpusSync::open(&config.corpus_dir).context("failed to open corpus dir")?;
    let stats = Arc::new(Stats::new());
    let engine = Arc::new(ProcessEngine::new(config.engine_config()));
    let campaign = Box::new(EchidnaRunner::new(config.echidna_config()));

    let mut seeder = None;
    if config.incremental {
        log::info!("extracting dataflow of {}...", config.contract_name());
        match extract_dataflow(&config.slither, &config.files[0], config.contract_name()) {
            Ok(graph) => {
                log::info!("dataflow: {} functions", graph.len());
                let rng = config
                    .seed
                    .map(RngType::seed_from_u64)
                    .unwrap_or_else(RngType::from_entropy);
                seeder = Some(IncrementalSeeder::new(
                    graph,
                    rng,
                    config.senders[0],
                    config.contract_addr,
                ));
            }
            Err(e) => log::warn!("dataflow unavailable, incremental seeding skipped: {}", e),
        }
    }

    let mut controller = Controller::new(
        config.clone(),
        campaign,
        engine,
        corpus,
        Arc::clone(&stats),
        stop.clone(),
    );
    if let Some(s) = seeder {
        controller = controller.with_seeder(s);
    }

    if config.display {
        let stats = Arc::clone(&stats);
        let stop = stop.clone();
        thread::spawn(move || {
            stats.report(Duration::from_secs(10), &stop);
        });
    }

    let r = controller.run();
    stop.stop_req();
    let stats_file = config.corpus_dir.join("stats.json");
    if let Err(e) = stats.dump(&stats_file) {
        log::warn!("failed to write {}: {}", stats_file.display(), e);
    }
    let summary = r.context("hybrid-echidna failed")?;
    log::info!(
        "{:?} after {} iterations, {} sequences solved",
        summary.reason,
        summary.iterations,
        summary.solved
    );
    println!("corpus: {}", config.corpus_dir.display());
    Ok(())
}

fn setup_signal_handler(stop: Stop) -> anyhow::Result<()> {
    use signal_hook::consts::*;
    use signal_hook::iterator::exfiltrator::WithOrigin;
    use signal_hook::iterator::SignalsInfo;

    fn named_signal(sig: c_int) -> String {
        signal_hook::low_level::signal_name(sig)
            .map(|n| format!("{}({})", n, sig))
            .unwrap_or_else(|| sig.to_string())
    }

    let mut signals = SignalsInfo::<WithOrigin>::new(TERM_SIGNALS)?;
    thread::spawn(move || {
        if let Some(info) = signals.into_iter().next() {
            let from = if let Some(p) = info.process {
                format!("(pid: {}, uid: {})", p.pid, p.uid)
            } else {
                "unknown".to_string()
            };
            log::info!(
                "{} recved, from: {}, cause: {:?}",
                named_signal(info.signal),
                from,
                info.cause
            );
            println!("please wait for in-flight work to finish...");
            stop.stop_req();
        }
    });
    Ok(())
}

const HYBRID: &str = r"
 _           _          _     _                _     _     _
| |__  _   _| |__  _ __(_) __| |       ___  ___| |__ (_) __| |_ __   __ _
| '_ \| | | | '_ \| '__| |/ _` |_____ / _ \/ __| '_ \| |/ _` | '_ \ / _` |
| | | | |_| | |_) | |  | | (_| |_____|  __/ (__| | | | | (_| | | | | (_| |
|_| |_|\__, |_.__/|_|  |_|\__,_|      \___|\___|_| |_|_|\__,_|_| |_|\__,_|
       |___/
";

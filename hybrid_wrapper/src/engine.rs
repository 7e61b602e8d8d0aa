//! Symbolic engine driven as a child process.
//!
//! Every request spawns `<bin> [args..] replay|solve`, writes one json request
//! to stdin and reads one json reply, tagged by `status`, from stdout.

use crate::{
    echidna::format::{encode_txs, EchidnaTx, HexAddr, HexWord},
    io::read_background,
};
use hybrid_core::{
    engine::{
        EngineError, RawBranch, ReplayReport, ReplayRequest, SolveReply, SolveRequest,
        SymbolicEngine, TxReplay,
    },
    tx::{Address, Transaction},
};
use nix::{
    sys::signal::{
        killpg,
        Signal::{SIGKILL, SIGTERM},
    },
    unistd::{setsid, Pid},
};
use serde_derive::{Deserialize, Serialize};
use std::{
    convert::TryFrom,
    io::{ErrorKind, Read, Write},
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread::{self, sleep},
    time::{Duration, Instant},
};
use timeout_readwrite::TimeoutReader;

/// Extra time granted to the engine to report its own solver timeout.
const SOLVE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bin: PathBuf,
    pub args: Vec<String>,
    pub contract_file: PathBuf,
    pub contract: Option<String>,
    pub contract_addr: Address,
    pub deployer: Address,
}

#[derive(Serialize)]
struct TargetMsg<'a> {
    file: &'a Path,
    contract: Option<&'a str>,
    address: HexAddr,
    deployer: HexAddr,
}

#[derive(Serialize)]
struct ReplayMsg<'a> {
    target: TargetMsg<'a>,
    txs: Vec<EchidnaTx>,
    storage: bool,
}

#[derive(Serialize)]
struct BranchMsg {
    pc: u64,
    taken: bool,
}

#[derive(Serialize)]
struct SolveMsg<'a> {
    target: TargetMsg<'a>,
    prefix: Vec<EchidnaTx>,
    template: EchidnaTx,
    branch_index: usize,
    branch: BranchMsg,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct RawBranchMsg {
    pc: u64,
    taken: bool,
    #[serde(default)]
    storage: Vec<(HexWord, HexWord)>,
}

#[derive(Deserialize)]
struct TxReplayMsg {
    branches: Vec<RawBranchMsg>,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ReplayReplyMsg {
    Ok { txs: Vec<TxReplayMsg> },
    Nondeterministic { reason: String },
    Error { message: String },
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum SolveReplyMsg {
    Sat { tx: EchidnaTx },
    Unsat,
    Timeout,
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct ProcessEngine {
    config: EngineConfig,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn target(&self) -> TargetMsg<'_> {
        TargetMsg {
            file: &self.config.contract_file,
            contract: self.config.contract.as_deref(),
            address: HexAddr(self.config.contract_addr),
            deployer: HexAddr(self.config.deployer),
        }
    }

    fn call(&self, sub: &str, input: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, EngineError> {
        let mut cmd = Command::new(&self.config.bin);
        cmd.args(&self.config.args)
            .arg(sub)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // own process group, so a timeout takes down the engine's children too
        unsafe {
            cmd.pre_exec(|| {
                let _ = setsid();
                Ok(())
            });
        }
        let mut child = cmd.spawn()?;
        let stderr = child
            .stderr
            .take()
            .map(read_background)
            .ok_or_else(|| EngineError::Protocol("stderr not piped".to_string()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("stdin not piped".to_string()))?;
        // the engine may reply before consuming all of its input
        thread::spawn(move || {
            let _ = stdin.write_all(&input);
        });
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("stdout not piped".to_string()))?;

        let deadline = Instant::now() + timeout;
        let mut reader = TimeoutReader::new(stdout, timeout);
        let mut out = Vec::with_capacity(4096);
        let mut buf = [0_u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    out.extend_from_slice(&buf[..n]);
                    if Instant::now() > deadline {
                        terminate(&mut child);
                        return Err(EngineError::Timeout);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    terminate(&mut child);
                    return Err(EngineError::Timeout);
                }
                Err(e) => {
                    terminate(&mut child);
                    return Err(e.into());
                }
            }
        }
        let status = child.wait()?;
        let stderr = stderr.wait_string();
        if out.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(EngineError::Crash(format!(
                "no reply, {}: {}",
                status,
                stderr.trim()
            )));
        }
        if !stderr.trim().is_empty() {
            log::debug!("engine {} stderr: {}", sub, stderr.trim());
        }
        Ok(out)
    }
}

fn terminate(child: &mut Child) {
    let group = Pid::from_raw(child.id() as i32);
    let _ = killpg(group, SIGTERM);
    for _ in 0..10 {
        if let Ok(Some(_)) = child.try_wait() {
            // the leader is gone, make sure nothing it left behind survives
            let _ = killpg(group, SIGKILL);
            return;
        }
        sleep(Duration::from_millis(50));
    }
    let _ = killpg(group, SIGKILL);
    let _ = child.kill();
    let _ = child.wait();
}

fn protocol_err<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::Protocol(e.to_string())
}

impl SymbolicEngine for ProcessEngine {
    fn replay(&self, req: &ReplayRequest<'_>) -> Result<ReplayReport, EngineError> {
        let msg = ReplayMsg {
            target: self.target(),
            txs: encode_txs(req.seq),
            storage: req.with_storage,
        };
        let input = serde_json::to_vec(&msg).map_err(protocol_err)?;
        let out = self.call("replay", input, req.timeout)?;
        match serde_json::from_slice(&out).map_err(protocol_err)? {
            ReplayReplyMsg::Ok { txs } => Ok(ReplayReport {
                txs: txs
                    .into_iter()
                    .map(|t| TxReplay {
                        branches: t
                            .branches
                            .into_iter()
                            .map(|b| RawBranch {
                                pc: b.pc,
                                taken: b.taken,
                                storage: b.storage.into_iter().map(|(k, v)| (k.0, v.0)).collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            }),
            ReplayReplyMsg::Nondeterministic { reason } => {
                Err(EngineError::Nondeterministic(reason))
            }
            ReplayReplyMsg::Error { message } => Err(EngineError::Crash(message)),
        }
    }

    fn solve(&self, req: &SolveRequest<'_>) -> Result<SolveReply, EngineError> {
        let msg = SolveMsg {
            target: self.target(),
            prefix: encode_txs(req.prefix),
            template: EchidnaTx::from(req.template),
            branch_index: req.branch_index,
            branch: BranchMsg {
                pc: req.target.pc,
                taken: req.target.taken,
            },
            timeout_ms: req.timeout.as_millis() as u64,
        };
        let input = serde_json::to_vec(&msg).map_err(protocol_err)?;
        let out = self.call("solve", input, req.timeout + SOLVE_GRACE)?;
        match serde_json::from_slice(&out).map_err(protocol_err)? {
            SolveReplyMsg::Sat { tx } => {
                let tx = Transaction::try_from(tx).map_err(protocol_err)?;
                Ok(SolveReply::Sat(tx))
            }
            SolveReplyMsg::Unsat => Ok(SolveReply::Unsat),
            SolveReplyMsg::Timeout => Err(EngineError::Timeout),
            SolveReplyMsg::Error { message } => Err(EngineError::Crash(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethnum::U256;
    use hybrid_core::{
        branch::BranchId,
        tx::{AbiValue, Call, Delay, TxSequence},
    };
    use std::fs::write;

    fn tx(x: u64) -> Transaction {
        Transaction {
            sender: "10000".parse().unwrap(),
            target: "00a329c0648769a73afac7f9381e08fb43dbea72".parse().unwrap(),
            value: U256::ZERO,
            gas: U256::new(0xffff_ffff),
            gas_price: U256::ZERO,
            call: Some(Call::new(
                "f",
                vec![AbiValue::Uint {
                    bits: 256,
                    value: U256::from(x),
                }],
            )),
            delay: Delay::default(),
        }
    }

    fn engine(dir: &Path, script: &str) -> ProcessEngine {
        let path = dir.join("engine.sh");
        write(&path, script).unwrap();
        ProcessEngine::new(EngineConfig {
            bin: PathBuf::from("/bin/sh"),
            args: vec![path.to_string_lossy().into_owned()],
            contract_file: dir.join("A.sol"),
            contract: Some("A".to_string()),
            contract_addr: "00a329c0648769a73afac7f9381e08fb43dbea72".parse().unwrap(),
            deployer: "30000".parse().unwrap(),
        })
    }

    const SCRIPT: &str = r#"cat > /dev/null
case "$1" in
replay) echo '{"status":"ok","txs":[{"branches":[{"pc":16,"taken":false,"storage":[["0x0","5"]]}]}]}' ;;
solve) echo '{"status":"sat","tx":{"_call":{"tag":"SolCall","contents":["f",[{"tag":"AbiUInt","contents":[256,"101"]}]]},"_src":"0x10000","_dst":"0x00a329c0648769a73afac7f9381e08fb43dbea72","_gas'"'"'":"0xffffffff","_gasprice'"'"'":"0x0","_value":"0x0","_delay":["0x0","0x0"]}}' ;;
esac
"#;

    #[test]
    fn replay_and_solve() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), SCRIPT);
        let seq = TxSequence::new(vec![tx(0)]);
        let report = e
            .replay(&ReplayRequest {
                seq: &seq,
                with_storage: true,
                timeout: Duration::from_secs(10),
            })
            .unwrap();
        assert_eq!(report.txs.len(), 1);
        assert_eq!(report.txs[0].branches[0].pc, 16);
        assert_eq!(report.txs[0].branches[0].storage, vec![(U256::ZERO, U256::new(5))]);

        let template = tx(0);
        let reply = e
            .solve(&SolveRequest {
                prefix: &TxSequence::empty(),
                template: &template,
                branch_index: 0,
                target: BranchId::new(16, true),
                timeout: Duration::from_secs(10),
            })
            .unwrap();
        assert_eq!(reply, SolveReply::Sat(tx(101)));
    }

    #[test]
    fn status_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(
            dir.path(),
            "cat > /dev/null\ncase \"$1\" in\nreplay) echo '{\"status\":\"nondeterministic\",\"reason\":\"symbolic hash\"}' ;;\nsolve) echo '{\"status\":\"timeout\"}' ;;\nesac\n",
        );
        let seq = TxSequence::new(vec![tx(0)]);
        let r = e.replay(&ReplayRequest {
            seq: &seq,
            with_storage: false,
            timeout: Duration::from_secs(10),
        });
        assert!(matches!(r, Err(EngineError::Nondeterministic(_))));
        let template = tx(0);
        let r = e.solve(&SolveRequest {
            prefix: &seq,
            template: &template,
            branch_index: 0,
            target: BranchId::new(16, true),
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(r, Err(EngineError::Timeout)));
    }

    #[test]
    fn hung_engine_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), "cat > /dev/null\nsleep 30\n");
        let seq = TxSequence::new(vec![tx(0)]);
        let start = Instant::now();
        let r = e.replay(&ReplayRequest {
            seq: &seq,
            with_storage: false,
            timeout: Duration::from_millis(300),
        });
        assert!(matches!(r, Err(EngineError::Timeout)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn timeout_kills_engine_children() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(
            dir.path(),
            "cat > /dev/null\n(while :; do echo x >> \"$0.tick\"; sleep 0.1; done) &\nwait\n",
        );
        let seq = TxSequence::new(vec![tx(0)]);
        let r = e.replay(&ReplayRequest {
            seq: &seq,
            with_storage: false,
            timeout: Duration::from_millis(500),
        });
        assert!(matches!(r, Err(EngineError::Timeout)));

        let tick = dir.path().join("engine.sh.tick");
        let len = || std::fs::metadata(&tick).map(|m| m.len()).unwrap_or(0);
        sleep(Duration::from_millis(300));
        let before = len();
        assert!(before > 0);
        sleep(Duration::from_millis(600));
        assert_eq!(len(), before);
    }

    #[test]
    fn silent_crash() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path(), "echo oops >&2\nexit 3\n");
        let seq = TxSequence::new(vec![tx(0)]);
        let r = e.replay(&ReplayRequest {
            seq: &seq,
            with_storage: false,
            timeout: Duration::from_secs(10),
        });
        match r {
            Err(EngineError::Crash(m)) => assert!(m.contains("oops")),
            r => panic!("unexpected: {:?}", r),
        }
    }
}

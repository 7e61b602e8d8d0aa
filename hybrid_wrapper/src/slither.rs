//! Function dataflow extracted with slither's `echidna` printer.

use crate::io::read_background;
use hybrid_core::dataflow::DataflowGraph;
use serde_derive::Deserialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataflowError {
    #[error("failed to spawn {bin}: {source}")]
    Spawn {
        bin: PathBuf,
        source: std::io::Error,
    },
    #[error("slither failed ({status}):\n{stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("unexpected slither output: {0}")]
    Parse(String),
    #[error("no contract named '{0}' in slither output")]
    UnknownContract(String),
}

#[derive(Deserialize)]
struct SlitherOutput {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: SlitherResults,
}

#[derive(Deserialize, Default)]
struct SlitherResults {
    #[serde(default)]
    printers: Vec<PrinterResult>,
}

#[derive(Deserialize)]
struct PrinterResult {
    printer: String,
    description: String,
}

#[derive(Deserialize)]
struct EchidnaPrinter {
    functions_relations: BTreeMap<String, BTreeMap<String, Relations>>,
}

#[derive(Deserialize)]
struct Relations {
    #[serde(default)]
    impacts: Vec<String>,
    #[serde(default)]
    is_impacted_by: Vec<String>,
}

/// Run slither on `file` and build the dataflow graph of `contract`.
pub fn extract_dataflow(
    slither: &Path,
    file: &Path,
    contract: &str,
) -> Result<DataflowGraph, DataflowError> {
    let mut child = Command::new(slither)
        .arg(file)
        .args(&["--print", "echidna", "--json", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| DataflowError::Spawn {
            bin: slither.to_path_buf(),
            source,
        })?;
    let stdout = child.stdout.take().map(read_background);
    let stderr = child.stderr.take().map(read_background);
    let status = child.wait().map_err(|source| DataflowError::Spawn {
        bin: slither.to_path_buf(),
        source,
    })?;
    let stdout = stdout.map(|r| r.wait_string()).unwrap_or_default();
    let stderr = stderr.map(|r| r.wait_string()).unwrap_or_default();
    // slither exits non-zero when detectors fire, judge by the json instead
    if stdout.trim().is_empty() {
        return Err(DataflowError::Failed { status, stderr });
    }
    parse_printer_output(&stdout, contract)
}

fn is_constructor(sig: &str, contract: &str) -> bool {
    let name = sig.split('(').next().unwrap_or(sig);
    name == "constructor" || name == contract
}

pub fn parse_printer_output(json: &str, contract: &str) -> Result<DataflowGraph, DataflowError> {
    let out: SlitherOutput =
        serde_json::from_str(json).map_err(|e| DataflowError::Parse(e.to_string()))?;
    if !out.success {
        return Err(DataflowError::Parse(
            out.error.unwrap_or_else(|| "slither reported failure".to_string()),
        ));
    }
    let desc = out
        .results
        .printers
        .iter()
        .find(|p| p.printer == "echidna")
        .map(|p| &p.description)
        .ok_or_else(|| DataflowError::Parse("missing echidna printer result".to_string()))?;
    let printer: EchidnaPrinter =
        serde_json::from_str(desc).map_err(|e| DataflowError::Parse(e.to_string()))?;
    let rels = printer
        .functions_relations
        .get(contract)
        .ok_or_else(|| DataflowError::UnknownContract(contract.to_string()))?;

    let mut graph = DataflowGraph::new();
    for (sig, deps) in rels.iter() {
        if is_constructor(sig, contract) {
            continue;
        }
        graph.add_function(sig);
        for reader in deps.impacts.iter() {
            if !is_constructor(reader, contract) {
                graph.add_dataflow(sig, reader);
            }
        }
        for writer in deps.is_impacted_by.iter() {
            if !is_constructor(writer, contract) {
                graph.add_dataflow(writer, sig);
            }
        }
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(relations: &str) -> String {
        let desc = format!(r#"{{"payable":{{}},"functions_relations":{}}}"#, relations);
        serde_json::json!({
            "success": true,
            "error": null,
            "results": {
                "printers": [
                    {"printer": "echidna", "description": desc}
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn builds_graph() {
        let json = output(
            r#"{"Token":{
                "constructor()":{"impacts":["mint(uint256)"],"is_impacted_by":[]},
                "mint(uint256)":{"impacts":["burn(uint256)"],"is_impacted_by":["setOwner(address)"]},
                "burn(uint256)":{"impacts":[],"is_impacted_by":["mint(uint256)"]},
                "setOwner(address)":{"impacts":["mint(uint256)"],"is_impacted_by":[]}
            },
            "Other":{}}"#,
        );
        let g = parse_printer_output(&json, "Token").unwrap();
        assert_eq!(g.len(), 3);
        assert!(!g.functions().iter().any(|f| f.starts_with("constructor")));
        assert_eq!(g.parents("burn(uint256)"), vec!["mint(uint256)"]);
        assert_eq!(g.parents("mint(uint256)"), vec!["setOwner(address)"]);
        assert!(g.parents("setOwner(address)").is_empty());
    }

    #[test]
    fn unknown_contract() {
        let json = output(r#"{"Token":{}}"#);
        assert!(matches!(
            parse_printer_output(&json, "Nope"),
            Err(DataflowError::UnknownContract(_))
        ));
    }

    #[test]
    fn slither_failure() {
        let json = r#"{"success":false,"error":"compilation failed","results":{}}"#;
        match parse_printer_output(json, "Token") {
            Err(DataflowError::Parse(m)) => assert_eq!(m, "compilation failed"),
            r => panic!("unexpected: {:?}", r.map(|g| g.len())),
        }
    }
}

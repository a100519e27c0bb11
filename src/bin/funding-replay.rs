use std::{
    env,
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};

use community_funding::{
    config::{self, Config},
    store, Address, Chain, ChainError, Timestamp, Transaction,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

fn usage() -> ! {
    eprintln!(
"Usage:
  funding-replay <script.jsonl> [--state=<file>] [--owner=<address>] [--out=<file>] [--keep-going]

Notes:
  - each script line is {{\"timestamp\": <unix seconds>, \"tx\": <transaction>}}
  - --state      : load the chain from <file> and write it back afterwards
                   (default: a fresh in-memory chain)
  - --owner      : owner of a fresh chain (default: zero address)
  - --out        : write one JSON result per line to <file> instead of stdout
  - --keep-going : continue after a rejected transaction"
    );
    std::process::exit(1)
}

fn flag(args: &[String], name: &str) -> Option<String> {
    for a in args {
        if let Some(rest) = a.strip_prefix(&format!("--{}=", name)) {
            return Some(rest.to_string());
        }
        if a.as_str() == format!("--{}", name) {
            return Some(String::new());
        }
    }
    None
}

#[derive(Serialize, Deserialize)]
struct ScriptStep {
    timestamp: Timestamp,
    tx: Transaction,
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args[0].starts_with("--") {
        usage();
    }
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when at least one transaction was rejected.
fn run(args: &[String]) -> Result<bool, String> {
    let config = Config::from_env().map_err(|e| e.to_string())?;
    config::init_tracing(&config);

    let script = PathBuf::from(&args[0]);
    let state = flag(args, "state").filter(|s| !s.is_empty()).map(PathBuf::from);
    let owner = match flag(args, "owner").filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<Address>().map_err(|e| e.to_string())?,
        None => Address::ZERO,
    };
    let keep_going = flag(args, "keep-going").is_some();

    let mut chain = match &state {
        Some(path) => store::load_or_init(path, owner).map_err(|e| e.to_string())?,
        None => Chain::new(owner),
    };

    let mut out: Box<dyn Write> = match flag(args, "out").filter(|s| !s.is_empty()) {
        Some(path) => Box::new(BufWriter::new(
            File::create(&path).map_err(|e| format!("{path}: {e}"))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    let file = File::open(&script).map_err(|e| format!("{}: {e}", script.display()))?;
    let mut all_ok = true;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| e.to_string())?;
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let step: ScriptStep = serde_json::from_str(&line)
            .map_err(|e| format!("{}:{line_no}: {e}", script.display()))?;

        let result = match chain.submit(step.tx, step.timestamp) {
            Ok(receipt) => json!({ "line": line_no, "ok": true, "receipt": receipt }),
            Err(err) => {
                all_ok = false;
                warn!(line = line_no, error = %err, "transaction rejected");
                json!({
                    "line": line_no,
                    "ok": false,
                    "error": err.to_string(),
                    "kind": error_kind(&err),
                })
            }
        };
        writeln!(out, "{result}").map_err(|e| e.to_string())?;
        if !all_ok && !keep_going {
            break;
        }
    }
    out.flush().map_err(|e| e.to_string())?;

    if let Some(path) = &state {
        store::save(path, &chain).map_err(|e| e.to_string())?;
    }
    Ok(all_ok)
}

fn error_kind(err: &ChainError) -> &'static str {
    match err {
        ChainError::Ledger(inner) => match inner.kind() {
            community_funding::ErrorKind::Validation => "validation",
            community_funding::ErrorKind::Authorization => "authorization",
            community_funding::ErrorKind::State => "state",
            community_funding::ErrorKind::Custody => "custody",
        },
        _ => "chain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_script_lines_parse() {
        let steps: Vec<ScriptStep> = include_str!("../../demos/community-garden.jsonl")
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(steps.len(), 6);
        assert!(matches!(
            steps[0].tx,
            Transaction::Faucet { amount: 2_000_000_000_000_000_000, .. }
        ));
        assert!(matches!(
            steps[2].tx,
            Transaction::Donate { project_id: 1, value: 500_000_000_000_000_000, .. }
        ));
    }

    #[test]
    fn steps_carry_amounts_beyond_u64() {
        let line = r#"{"timestamp": 5, "tx": {"type": "faucet", "to": "0x0101010101010101010101010101010101010101", "amount": "340282366920938463463374607431768211455"}}"#;
        let step: ScriptStep = serde_json::from_str(line).unwrap();
        assert_eq!(step.timestamp, 5);
        match step.tx {
            Transaction::Faucet { amount, .. } => assert_eq!(amount, u128::MAX),
            other => panic!("unexpected transaction {other:?}"),
        }
    }
}

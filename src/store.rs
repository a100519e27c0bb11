//! JSON persistence for [`Chain`] state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::chain::Chain;
use crate::ledger::Address;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

/// Loads the chain at `path`, or starts a fresh one owned by `owner` when the
/// file does not exist yet.
pub fn load_or_init(path: &Path, owner: Address) -> Result<Chain, StoreError> {
    if !path.exists() {
        debug!(path = %path.display(), %owner, "no state file, starting a new chain");
        return Ok(Chain::new(owner));
    }
    load(path)
}

pub fn load(path: &Path) -> Result<Chain, StoreError> {
    let raw = fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes through a sibling temp file and renames it into place.
pub fn save(path: &Path, chain: &Chain) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(chain).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    {
        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(&bytes).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_err(path))?;
    debug!(path = %path.display(), height = chain.meta().height, "state saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Transaction;
    use crate::ledger::{Amount, NewProject};

    #[test]
    fn missing_file_starts_fresh_chain() {
        let dir = tempfile::tempdir().unwrap();
        let owner = Address::from_bytes([7; 20]);
        let chain = load_or_init(&dir.path().join("state.json"), owner).unwrap();
        assert_eq!(chain.ledger().owner(), owner);
        assert_eq!(chain.meta().height, 0);
    }

    #[test]
    fn saved_chain_loads_back_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut chain = Chain::new(Address::from_bytes([7; 20]));
        chain
            .submit(
                Transaction::CreateProject {
                    sender: Address::from_bytes([1; 20]),
                    project: NewProject {
                        title: "Well".into(),
                        description: "Village water well".into(),
                        goal: 10,
                        deadline: 200,
                        ..NewProject::default()
                    },
                },
                100,
            )
            .unwrap();

        save(&path, &chain).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, chain);
        assert_eq!(loaded.ledger().state_root(), chain.ledger().state_root());
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn donations_and_withdrawals_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let creator = Address::from_bytes([1; 20]);
        let donor = Address::from_bytes([2; 20]);
        let big = Amount::from(u64::MAX) * 4;

        let mut chain = Chain::new(Address::from_bytes([7; 20]));
        chain
            .submit(Transaction::Faucet { to: donor, amount: big }, 100)
            .unwrap();
        chain
            .submit(
                Transaction::CreateProject {
                    sender: creator,
                    project: NewProject {
                        title: "Library".into(),
                        description: "Books for the reading room".into(),
                        goal: big,
                        deadline: 500,
                        ..NewProject::default()
                    },
                },
                100,
            )
            .unwrap();
        chain
            .submit(
                Transaction::Donate {
                    sender: donor,
                    project_id: 1,
                    value: big - 1,
                },
                110,
            )
            .unwrap();
        chain
            .submit(
                Transaction::Withdraw {
                    sender: creator,
                    project_id: 1,
                },
                120,
            )
            .unwrap();

        save(&path, &chain).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains(&format!("\"{}\"", big - 1)));

        let loaded = load(&path).unwrap();
        assert_eq!(loaded, chain);
        assert_eq!(loaded.ledger().events().len(), 3);
        assert_eq!(loaded.wallets().balance(&creator), big - 1);
        assert_eq!(loaded.wallets().balance(&donor), 1);
        assert_eq!(loaded.ledger().get_project(1).total_withdrawn, big - 1);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }
}

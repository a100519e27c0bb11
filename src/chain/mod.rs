//! Single-threaded transaction environment hosting the [`Ledger`].
//!
//! Transactions are applied one at a time in submission order. Each one
//! either commits fully (height bump, receipt, wallet movements) or leaves
//! the chain exactly as it was.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, info_span};

use crate::ledger::{
    amount_str, Address, Amount, Ledger, LedgerError, LedgerEvent, NewProject, Payee, ProjectId,
    Timestamp, TransferError,
};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("insufficient wallet balance")]
    InsufficientBalance {
        account: Address,
        balance: Amount,
        needed: Amount,
    },
    #[error("faucet amount must be greater than zero")]
    ZeroFaucet,
    #[error("wallet balance overflow")]
    WalletOverflow { account: Address },
    #[error("block timestamp moved backwards")]
    ClockSkew { last: Timestamp, given: Timestamp },
    #[error("failed to encode transaction: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transaction {
    Faucet {
        to: Address,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
    CreateProject {
        sender: Address,
        project: NewProject,
    },
    Donate {
        sender: Address,
        project_id: ProjectId,
        #[serde(with = "amount_str")]
        value: Amount,
    },
    Withdraw {
        sender: Address,
        project_id: ProjectId,
    },
}

impl Transaction {
    pub fn sender(&self) -> Address {
        match self {
            Transaction::Faucet { .. } => Address::ZERO,
            Transaction::CreateProject { sender, .. }
            | Transaction::Donate { sender, .. }
            | Transaction::Withdraw { sender, .. } => *sender,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Transaction::Faucet { .. } => "faucet",
            Transaction::CreateProject { .. } => "create_project",
            Transaction::Donate { .. } => "donate",
            Transaction::Withdraw { .. } => "withdraw",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Wallets {
    #[serde(with = "amount_str::map")]
    balances: BTreeMap<Address, Amount>,
}

impl Wallets {
    pub fn balance(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, account: &Address, amount: Amount) -> Result<(), ChainError> {
        let balance = self
            .balance(account)
            .checked_add(amount)
            .ok_or(ChainError::WalletOverflow { account: *account })?;
        self.balances.insert(*account, balance);
        Ok(())
    }

    pub fn debit(&mut self, account: &Address, amount: Amount) -> Result<(), ChainError> {
        let balance = self.balance(account);
        if balance < amount {
            return Err(ChainError::InsufficientBalance {
                account: *account,
                balance,
                needed: amount,
            });
        }
        self.balances.insert(*account, balance - amount);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }
}

impl Payee for Wallets {
    fn pay(&mut self, to: &Address, amount: Amount) -> Result<(), TransferError> {
        self.credit(to, amount)
            .map_err(|err| TransferError(err.to_string()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BlockMeta {
    pub height: u64,
    pub timestamp: Timestamp,
    pub last_tx: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: String,
    pub height: u64,
    pub timestamp: Timestamp,
    pub sender: Address,
    /// Project touched by the transaction, if any.
    pub project_id: Option<ProjectId>,
    pub events: Vec<LedgerEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chain {
    meta: BlockMeta,
    wallets: Wallets,
    ledger: Ledger,
    receipts: Vec<Receipt>,
}

impl Chain {
    pub fn new(owner: Address) -> Self {
        Self {
            meta: BlockMeta::default(),
            wallets: Wallets::default(),
            ledger: Ledger::new(owner),
            receipts: Vec::new(),
        }
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn wallets(&self) -> &Wallets {
        &self.wallets
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn receipts_for_project(&self, id: ProjectId) -> impl Iterator<Item = &Receipt> {
        self.receipts
            .iter()
            .filter(move |receipt| receipt.project_id == Some(id))
    }

    pub fn submit(&mut self, tx: Transaction, timestamp: Timestamp) -> Result<Receipt, ChainError> {
        let span = info_span!("tx", kind = tx.label(), height = self.meta.height + 1);
        let _enter = span.enter();

        if timestamp < self.meta.timestamp {
            return Err(ChainError::ClockSkew {
                last: self.meta.timestamp,
                given: timestamp,
            });
        }
        let height = self.meta.height + 1;
        let tx_hash = self.tx_hash(&tx, height, timestamp)?;
        let events_before = self.ledger.events().len();

        let project_id = match &tx {
            Transaction::Faucet { to, amount } => {
                if *amount == 0 {
                    return Err(ChainError::ZeroFaucet);
                }
                self.wallets.credit(to, *amount)?;
                None
            }
            Transaction::CreateProject { sender, project } => {
                let id = self
                    .ledger
                    .create_project(*sender, project.clone(), timestamp)?;
                Some(id)
            }
            Transaction::Donate {
                sender,
                project_id,
                value,
            } => {
                let balance = self.wallets.balance(sender);
                if balance < *value {
                    return Err(ChainError::InsufficientBalance {
                        account: *sender,
                        balance,
                        needed: *value,
                    });
                }
                self.ledger.donate_to_project(*sender, *project_id, *value)?;
                self.wallets.debit(sender, *value)?;
                Some(*project_id)
            }
            Transaction::Withdraw { sender, project_id } => {
                self.ledger
                    .withdraw_funds(sender, *project_id, &mut self.wallets)?;
                Some(*project_id)
            }
        };

        let receipt = Receipt {
            tx_hash: tx_hash.clone(),
            height,
            timestamp,
            sender: tx.sender(),
            project_id,
            events: self.ledger.events()[events_before..].to_vec(),
        };
        self.meta.height = height;
        self.meta.timestamp = timestamp;
        self.meta.last_tx = Some(tx_hash);
        self.receipts.push(receipt.clone());
        info!(tx_hash = %receipt.tx_hash, events = receipt.events.len(), "transaction committed");
        Ok(receipt)
    }

    fn tx_hash(
        &self,
        tx: &Transaction,
        height: u64,
        timestamp: Timestamp,
    ) -> Result<String, ChainError> {
        let mut hasher = Sha256::new();
        if let Some(prev) = &self.meta.last_tx {
            hasher.update(prev.as_bytes());
        }
        hasher.update(height.to_le_bytes());
        hasher.update(timestamp.to_le_bytes());
        hasher.update(serde_json::to_vec(tx)?);
        Ok(format!("0x{}", hex::encode(hasher.finalize())))
    }
}

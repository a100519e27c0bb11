//! Project ledger: the authoritative record of fundraising projects and the
//! value held on their behalf.
//!
//! All mutation goes through [`Ledger::create_project`],
//! [`Ledger::donate_to_project`] and [`Ledger::withdraw_funds`]. Each call is
//! all-or-nothing: a rejected call leaves every field untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub type ProjectId = u64;
pub type Amount = u128;
pub type Timestamp = u64;

/// Serde codec writing an [`Amount`] as a decimal string.
///
/// Internally tagged enums buffer their fields and cannot carry `u128`, so
/// every amount in stored state, receipts and scripts uses this form. Plain
/// integers that fit in `u64` are still accepted on input.
pub mod amount_str {
    use std::collections::BTreeMap;
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serialize, Serializer};

    use super::Amount;

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = Amount;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a wei amount as a decimal string")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Amount, E> {
            Ok(Amount::from(value))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Amount, E> {
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(E::invalid_value(de::Unexpected::Str(value), &self));
            }
            value
                .parse()
                .map_err(|_| E::custom(format!("amount {value} does not fit in 128 bits")))
        }
    }

    /// Same encoding for the values of an address-keyed balance map.
    pub mod map {
        use super::*;

        struct Out<'a>(&'a Amount);

        impl Serialize for Out<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                super::serialize(self.0, serializer)
            }
        }

        #[derive(serde::Deserialize)]
        struct In(#[serde(with = "crate::ledger::amount_str")] Amount);

        pub fn serialize<K, S>(map: &BTreeMap<K, Amount>, serializer: S) -> Result<S::Ok, S::Error>
        where
            K: Serialize,
            S: Serializer,
        {
            serializer.collect_map(map.iter().map(|(k, v)| (k, Out(v))))
        }

        pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Amount>, D::Error>
        where
            K: serde::Deserialize<'de> + Ord,
            D: Deserializer<'de>,
        {
            let raw: BTreeMap<K, In> = serde::Deserialize::deserialize(deserializer)?;
            Ok(raw.into_iter().map(|(k, In(v))| (k, v)).collect())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address {input:?}: {reason}")]
pub struct AddressError {
    pub input: String,
    pub reason: &'static str,
}

/// 20-byte account identifier, displayed as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 20];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| AddressError {
            input: s.to_string(),
            reason,
        };
        let raw = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if raw.len() != 40 {
            return Err(err("expected 40 hex characters"));
        }
        let decoded = hex::decode(raw).map_err(|_| err("not hex"))?;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Failure reported by a [`Payee`] while moving value out of custody.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransferError(pub String);

/// Receiving side of a withdrawal. The ledger has already committed the
/// balance reset when `pay` runs.
pub trait Payee {
    fn pay(&mut self, to: &Address, amount: Amount) -> Result<(), TransferError>;
}

/// Rejection classes surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    State,
    Custody,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("goal must be greater than zero")]
    ZeroGoal,
    #[error("deadline must be in the future")]
    DeadlineNotInFuture { deadline: Timestamp, now: Timestamp },
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("description must not be empty")]
    EmptyDescription,
    #[error("project does not exist")]
    UnknownProject { id: ProjectId },
    #[error("donation amount must be greater than zero")]
    ZeroDonation,
    #[error("only the project creator can withdraw funds")]
    NotCreator { id: ProjectId, caller: Address },
    #[error("no funds available to withdraw")]
    NoFunds { id: ProjectId },
    #[error("amount overflow")]
    AmountOverflow,
    #[error("project ids exhausted")]
    ProjectIdsExhausted,
    #[error("transfer failed: {source}")]
    TransferFailed {
        id: ProjectId,
        amount: Amount,
        #[source]
        source: TransferError,
    },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::ZeroGoal
            | LedgerError::DeadlineNotInFuture { .. }
            | LedgerError::EmptyTitle
            | LedgerError::EmptyDescription
            | LedgerError::UnknownProject { .. }
            | LedgerError::ZeroDonation
            | LedgerError::AmountOverflow => ErrorKind::Validation,
            LedgerError::ProjectIdsExhausted => ErrorKind::State,
            LedgerError::NotCreator { .. } => ErrorKind::Authorization,
            LedgerError::NoFunds { .. } => ErrorKind::State,
            LedgerError::TransferFailed { .. } => ErrorKind::Custody,
        }
    }
}

/// Creation inputs for a project.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(with = "amount_str")]
    pub goal: Amount,
    pub deadline: Timestamp,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub image_url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Empty,
    Funded,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(with = "amount_str")]
    pub goal: Amount,
    #[serde(with = "amount_str")]
    pub current_amount: Amount,
    pub creator: Address,
    pub deadline: Timestamp,
    pub created_at: Timestamp,
    pub location: String,
    pub image_url: String,
    #[serde(with = "amount_str")]
    pub total_raised: Amount,
    #[serde(with = "amount_str")]
    pub total_withdrawn: Amount,
}

impl Project {
    /// False for the empty record handed out for unknown ids.
    pub fn exists(&self) -> bool {
        self.id != 0
    }

    pub fn state(&self) -> ProjectState {
        if self.current_amount > 0 {
            ProjectState::Funded
        } else {
            ProjectState::Empty
        }
    }

    /// Display-only; the ledger never acts on it.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.deadline
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    ProjectCreated {
        id: ProjectId,
        creator: Address,
        title: String,
        #[serde(with = "amount_str")]
        goal: Amount,
        deadline: Timestamp,
    },
    DonationReceived {
        id: ProjectId,
        donor: Address,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
    FundsWithdrawn {
        id: ProjectId,
        creator: Address,
        #[serde(with = "amount_str")]
        amount: Amount,
    },
}

impl LedgerEvent {
    pub fn project_id(&self) -> ProjectId {
        match self {
            LedgerEvent::ProjectCreated { id, .. }
            | LedgerEvent::DonationReceived { id, .. }
            | LedgerEvent::FundsWithdrawn { id, .. } => *id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    owner: Address,
    project_count: ProjectId,
    projects: BTreeMap<ProjectId, Project>,
    #[serde(with = "amount_str")]
    custody: Amount,
    events: Vec<LedgerEvent>,
}

impl Ledger {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            project_count: 0,
            projects: BTreeMap::new(),
            custody: 0,
            events: Vec::new(),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn create_project(
        &mut self,
        creator: Address,
        input: NewProject,
        now: Timestamp,
    ) -> Result<ProjectId, LedgerError> {
        if input.goal == 0 {
            return Err(LedgerError::ZeroGoal);
        }
        if input.deadline <= now {
            return Err(LedgerError::DeadlineNotInFuture {
                deadline: input.deadline,
                now,
            });
        }
        if input.title.trim().is_empty() {
            return Err(LedgerError::EmptyTitle);
        }
        if input.description.trim().is_empty() {
            return Err(LedgerError::EmptyDescription);
        }
        let id = self
            .project_count
            .checked_add(1)
            .ok_or(LedgerError::ProjectIdsExhausted)?;

        let project = Project {
            id,
            title: input.title,
            description: input.description,
            category: input.category,
            goal: input.goal,
            current_amount: 0,
            creator,
            deadline: input.deadline,
            created_at: now,
            location: input.location,
            image_url: input.image_url,
            total_raised: 0,
            total_withdrawn: 0,
        };
        self.events.push(LedgerEvent::ProjectCreated {
            id,
            creator,
            title: project.title.clone(),
            goal: project.goal,
            deadline: project.deadline,
        });
        self.projects.insert(id, project);
        self.project_count = id;
        debug!(id, %creator, goal = %input.goal, "project created");
        Ok(id)
    }

    pub fn donate_to_project(
        &mut self,
        donor: Address,
        id: ProjectId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let project = self
            .projects
            .get_mut(&id)
            .ok_or(LedgerError::UnknownProject { id })?;
        if amount == 0 {
            return Err(LedgerError::ZeroDonation);
        }
        let current = project
            .current_amount
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        let raised = project
            .total_raised
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        let custody = self
            .custody
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;

        project.current_amount = current;
        project.total_raised = raised;
        self.custody = custody;
        self.events
            .push(LedgerEvent::DonationReceived { id, donor, amount });
        debug!(id, %donor, amount = %amount, balance = %current, "donation received");
        Ok(())
    }

    /// Pays the whole balance of project `id` to its creator.
    ///
    /// The balance is zeroed before `payee` runs. If the payee fails the
    /// balance is restored and no event is recorded.
    pub fn withdraw_funds<P: Payee + ?Sized>(
        &mut self,
        caller: &Address,
        id: ProjectId,
        payee: &mut P,
    ) -> Result<Amount, LedgerError> {
        let project = match self.projects.get_mut(&id) {
            Some(project) if project.creator == *caller => project,
            _ => {
                warn!(id, caller = %caller, "withdrawal rejected: caller is not the creator");
                return Err(LedgerError::NotCreator {
                    id,
                    caller: *caller,
                });
            }
        };
        if project.current_amount == 0 {
            return Err(LedgerError::NoFunds { id });
        }
        let amount = project.current_amount;
        let withdrawn = project
            .total_withdrawn
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        let custody = self
            .custody
            .checked_sub(amount)
            .ok_or(LedgerError::AmountOverflow)?;

        project.current_amount = 0;
        project.total_withdrawn = withdrawn;
        self.custody = custody;

        if let Err(source) = payee.pay(caller, amount) {
            project.current_amount = amount;
            project.total_withdrawn -= amount;
            self.custody += amount;
            warn!(id, amount = %amount, error = %source, "withdrawal transfer failed, balance restored");
            return Err(LedgerError::TransferFailed { id, amount, source });
        }

        self.events.push(LedgerEvent::FundsWithdrawn {
            id,
            creator: *caller,
            amount,
        });
        debug!(id, creator = %caller, amount = %amount, "funds withdrawn");
        Ok(amount)
    }

    pub fn get_project_count(&self) -> ProjectId {
        self.project_count
    }

    /// Returns an all-empty record for ids that were never issued.
    pub fn get_project(&self, id: ProjectId) -> Project {
        self.projects.get(&id).cloned().unwrap_or_default()
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(&id)
    }

    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn custody(&self) -> Amount {
        self.custody
    }

    pub fn state_root(&self) -> [u8; 32] {
        let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(self.projects.len() + 1);
        let mut hasher = Sha256::new();
        hasher.update(b"ledger");
        hasher.update(self.owner.as_bytes());
        hasher.update(self.project_count.to_le_bytes());
        hasher.update(self.custody.to_le_bytes());
        leaves.push(hasher.finalize().into());
        for project in self.projects.values() {
            leaves.push(project_leaf(project));
        }
        build_merkle(leaves)
    }
}

fn project_leaf(project: &Project) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"project");
    hasher.update(project.id.to_le_bytes());
    hasher.update(project.creator.as_bytes());
    for text in [
        &project.title,
        &project.description,
        &project.category,
        &project.location,
        &project.image_url,
    ] {
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    hasher.update(project.goal.to_le_bytes());
    hasher.update(project.current_amount.to_le_bytes());
    hasher.update(project.total_raised.to_le_bytes());
    hasher.update(project.total_withdrawn.to_le_bytes());
    hasher.update(project.deadline.to_le_bytes());
    hasher.update(project.created_at.to_le_bytes());
    hasher.finalize().into()
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"funding-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

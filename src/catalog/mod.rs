//! Read-side views over the ledger: project listings, per-project history
//! and per-address dashboards. Nothing here mutates state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::ledger::{
    amount_str, Address, Amount, Ledger, LedgerEvent, Project, ProjectId, ProjectState,
    Timestamp,
};

pub const SECONDS_PER_DAY: Timestamp = 86_400;

/// Category ids offered by the client. The ledger stores any string.
pub const CATEGORIES: [&str; 6] = [
    "environment",
    "community",
    "infrastructure",
    "education",
    "health",
    "arts",
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub title: String,
    pub category: String,
    pub location: String,
    pub creator: Address,
    #[serde(with = "amount_str")]
    pub goal: Amount,
    #[serde(with = "amount_str")]
    pub current_amount: Amount,
    pub progress_percent: u8,
    pub days_left: u64,
    pub expired: bool,
    pub state: ProjectState,
    pub deadline: Timestamp,
    pub created_at: Timestamp,
}

impl ProjectSummary {
    pub fn from_project(project: &Project, now: Timestamp) -> Self {
        Self {
            id: project.id,
            title: project.title.clone(),
            category: project.category.clone(),
            location: project.location.clone(),
            creator: project.creator,
            goal: project.goal,
            current_amount: project.current_amount,
            progress_percent: progress_percent(project.current_amount, project.goal),
            days_left: days_left(project.deadline, now),
            expired: project.is_expired(now),
            state: project.state(),
            deadline: project.deadline,
            created_at: project.created_at,
        }
    }
}

/// Rounded share of `goal` reached, capped at 100.
pub fn progress_percent(current: Amount, goal: Amount) -> u8 {
    if goal == 0 {
        return 0;
    }
    let scaled = current.saturating_mul(100).saturating_add(goal / 2) / goal;
    scaled.min(100) as u8
}

/// Whole days until `deadline`, rounded up; zero once it has passed.
pub fn days_left(deadline: Timestamp, now: Timestamp) -> u64 {
    if now >= deadline {
        return 0;
    }
    (deadline - now).div_ceil(SECONDS_PER_DAY)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectFilter {
    pub category: Option<String>,
    pub search: Option<String>,
}

impl ProjectFilter {
    pub fn matches(&self, project: &Project) -> bool {
        if let Some(category) = self.category.as_deref() {
            if category != "all" && project.category != category {
                return false;
            }
        }
        if let Some(term) = self.search.as_deref() {
            let term = term.trim().to_lowercase();
            if !term.is_empty()
                && !project.title.to_lowercase().contains(&term)
                && !project.description.to_lowercase().contains(&term)
                && !project.location.to_lowercase().contains(&term)
            {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    EndingSoon,
    MostFunded,
    GoalAsc,
    GoalDesc,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectQuery {
    pub filter: ProjectFilter,
    pub sort: SortOrder,
    pub limit: Option<usize>,
}

pub fn list_projects(ledger: &Ledger, query: &ProjectQuery, now: Timestamp) -> Vec<ProjectSummary> {
    let mut rows: Vec<&Project> = ledger
        .projects()
        .filter(|project| query.filter.matches(project))
        .collect();
    // stable sort over id order keeps ties by ascending id
    match query.sort {
        SortOrder::Newest => rows.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortOrder::EndingSoon => rows.sort_by_key(|p| p.deadline),
        SortOrder::MostFunded => rows.sort_by(|a, b| b.current_amount.cmp(&a.current_amount)),
        SortOrder::GoalAsc => rows.sort_by_key(|p| p.goal),
        SortOrder::GoalDesc => rows.sort_by(|a, b| b.goal.cmp(&a.goal)),
    }
    rows.into_iter()
        .take(query.limit.unwrap_or(usize::MAX))
        .map(|project| ProjectSummary::from_project(project, now))
        .collect()
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Donation,
    Withdrawal,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub from: Address,
    #[serde(with = "amount_str")]
    pub amount: Amount,
    pub timestamp: Timestamp,
    pub tx_hash: String,
}

/// Donations and withdrawals of one project in commit order.
pub fn project_history(chain: &Chain, id: ProjectId) -> Vec<HistoryEntry> {
    let mut out = Vec::new();
    for receipt in chain.receipts_for_project(id) {
        for event in receipt.events.iter().filter(|e| e.project_id() == id) {
            let (kind, from, amount) = match event {
                LedgerEvent::DonationReceived { donor, amount, .. } => {
                    (HistoryKind::Donation, *donor, *amount)
                }
                LedgerEvent::FundsWithdrawn { creator, amount, .. } => {
                    (HistoryKind::Withdrawal, *creator, *amount)
                }
                LedgerEvent::ProjectCreated { .. } => continue,
            };
            out.push(HistoryEntry {
                kind,
                from,
                amount,
                timestamp: receipt.timestamp,
                tx_hash: receipt.tx_hash.clone(),
            });
        }
    }
    out
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupportedProject {
    pub project: ProjectSummary,
    #[serde(with = "amount_str")]
    pub donated: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dashboard {
    pub address: Address,
    pub created: Vec<ProjectSummary>,
    /// Sum of the current balances of `created`.
    #[serde(with = "amount_str")]
    pub created_balance: Amount,
    pub supported: Vec<SupportedProject>,
    #[serde(with = "amount_str")]
    pub total_donated: Amount,
}

pub fn dashboard(chain: &Chain, address: &Address, now: Timestamp) -> Dashboard {
    let ledger = chain.ledger();
    let created: Vec<ProjectSummary> = ledger
        .projects()
        .filter(|project| project.creator == *address)
        .map(|project| ProjectSummary::from_project(project, now))
        .collect();
    let created_balance = created
        .iter()
        .fold(0, |acc: Amount, p| acc.saturating_add(p.current_amount));

    let mut donated: BTreeMap<ProjectId, Amount> = BTreeMap::new();
    for event in ledger.events() {
        if let LedgerEvent::DonationReceived { id, donor, amount } = event {
            if donor == address {
                let entry = donated.entry(*id).or_insert(0);
                *entry = entry.saturating_add(*amount);
            }
        }
    }
    let total_donated = donated
        .values()
        .fold(0, |acc: Amount, amount| acc.saturating_add(*amount));
    let supported = donated
        .into_iter()
        .filter_map(|(id, donated)| {
            ledger.project(id).map(|project| SupportedProject {
                project: ProjectSummary::from_project(project, now),
                donated,
            })
        })
        .collect();

    Dashboard {
        address: *address,
        created,
        created_balance,
        supported,
        total_donated,
    }
}

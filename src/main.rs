#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use community_funding::catalog::{
    self, Dashboard, HistoryEntry, HistoryKind, ProjectFilter, ProjectQuery, ProjectSummary,
    SortOrder,
};
use community_funding::config::{self, Config};
use community_funding::ledger::amount_str;
use community_funding::store;
use community_funding::units::{format_ether, parse_ether, UnitsError};
use community_funding::{
    Address, Amount, Chain, LedgerEvent, NewProject, ProjectId, Receipt, Transaction,
};

#[derive(Parser)]
#[command(name = "funding")]
#[command(about = "Community crowdfunding ledger CLI", version)]
#[command(
    after_help = "Environment:\n  FUNDING_STATE     State file (default funding-state.json)\n  FUNDING_NOW       Fixed block timestamp\n  FUNDING_LOG_JSON  JSON log lines\n  RUST_LOG          Log filter (default warn)"
)]
struct Cli {
    /// Chain state file.
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    /// Block timestamp to use instead of the wall clock.
    #[arg(long, global = true)]
    now: Option<u64>,
    /// Print machine readable JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    /// Write log lines to stderr as JSON.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty state file.
    Init {
        #[arg(long)]
        owner: Option<Address>,
    },
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },
    /// Mint dev-chain value into a wallet.
    Faucet {
        #[arg(long)]
        to: Address,
        #[arg(long, value_parser = parse_ether_arg)]
        amount: Amount,
    },
    Create {
        #[arg(long)]
        from: Address,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "community")]
        category: String,
        /// Goal in ether.
        #[arg(long, value_parser = parse_ether_arg)]
        goal: Amount,
        /// Absolute deadline (unix seconds).
        #[arg(long, conflicts_with = "days")]
        deadline: Option<u64>,
        /// Deadline relative to the block timestamp.
        #[arg(long)]
        days: Option<u64>,
        #[arg(long, default_value = "")]
        location: String,
        #[arg(long, default_value = "")]
        image_url: String,
    },
    Donate {
        #[arg(long)]
        from: Address,
        #[arg(long)]
        project: ProjectId,
        #[arg(long, value_parser = parse_ether_arg)]
        amount: Amount,
    },
    Withdraw {
        #[arg(long)]
        from: Address,
        #[arg(long)]
        project: ProjectId,
    },
    Count,
    Show {
        #[arg(long)]
        project: ProjectId,
    },
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value_t = SortCli::Newest)]
        sort: SortCli,
        #[arg(long)]
        limit: Option<usize>,
    },
    Dashboard {
        #[arg(long)]
        address: Address,
    },
    History {
        #[arg(long)]
        project: ProjectId,
    },
    Events,
    Snapshot,
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Generate a fresh address.
    New,
    Balance {
        #[arg(long)]
        address: Address,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SortCli {
    Newest,
    EndingSoon,
    MostFunded,
    GoalAsc,
    GoalDesc,
}

impl From<SortCli> for SortOrder {
    fn from(value: SortCli) -> Self {
        match value {
            SortCli::Newest => SortOrder::Newest,
            SortCli::EndingSoon => SortOrder::EndingSoon,
            SortCli::MostFunded => SortOrder::MostFunded,
            SortCli::GoalAsc => SortOrder::GoalAsc,
            SortCli::GoalDesc => SortOrder::GoalDesc,
        }
    }
}

fn parse_ether_arg(raw: &str) -> Result<Amount, UnitsError> {
    parse_ether(raw)
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    let mut config = Config::from_env().map_err(|e| e.to_string())?;
    if let Some(state) = cli.state {
        config.state_path = state;
    }
    if let Some(now) = cli.now {
        config.fixed_now = Some(now);
    }
    config.log_json |= cli.log_json;
    config::init_tracing(&config);

    let json = cli.json;
    let path = config.state_path.clone();
    match cli.command {
        Commands::Init { owner } => init_cmd(&path, owner, json),
        Commands::Account { command } => match command {
            AccountCommand::New => {
                let address = Address::random();
                emit(json, &address, || address.to_string())
            }
            AccountCommand::Balance { address } => {
                let chain = open(&path)?;
                let balance = chain.wallets().balance(&address);
                emit(json, &balance.to_string(), || {
                    format!("{address}: {} ETH", format_ether(balance))
                })
            }
        },
        Commands::Faucet { to, amount } => {
            submit_cmd(&path, &config, json, Transaction::Faucet { to, amount })
        }
        Commands::Create {
            from,
            title,
            description,
            category,
            goal,
            deadline,
            days,
            location,
            image_url,
        } => {
            if !catalog::CATEGORIES.contains(&category.as_str()) {
                warn!(%category, "unknown category, stored as given");
            }
            let now = config.now();
            let deadline = match (deadline, days) {
                (Some(deadline), _) => deadline,
                (None, Some(days)) => {
                    now.saturating_add(days.saturating_mul(catalog::SECONDS_PER_DAY))
                }
                (None, None) => return Err("one of --deadline or --days is required".to_string()),
            };
            let project = NewProject {
                title,
                description,
                category,
                goal,
                deadline,
                location,
                image_url,
            };
            submit_cmd(
                &path,
                &config,
                json,
                Transaction::CreateProject {
                    sender: from,
                    project,
                },
            )
        }
        Commands::Donate {
            from,
            project,
            amount,
        } => submit_cmd(
            &path,
            &config,
            json,
            Transaction::Donate {
                sender: from,
                project_id: project,
                value: amount,
            },
        ),
        Commands::Withdraw { from, project } => submit_cmd(
            &path,
            &config,
            json,
            Transaction::Withdraw {
                sender: from,
                project_id: project,
            },
        ),
        Commands::Count => {
            let chain = open(&path)?;
            let count = chain.ledger().get_project_count();
            emit(json, &count, || count.to_string())
        }
        Commands::Show { project } => {
            let chain = open(&path)?;
            let record = chain.ledger().get_project(project);
            if !record.exists() {
                return Err(format!("project {project} not found"));
            }
            emit(json, &record, || {
                let summary = ProjectSummary::from_project(&record, config.now());
                format!(
                    "#{} {}\n  {}\n  category: {}  location: {}\n  creator: {}\n  raised: {} / {} ETH ({}%)\n  deadline: {} ({} days left)\n  lifetime raised: {} ETH, withdrawn: {} ETH",
                    record.id,
                    record.title,
                    record.description,
                    record.category,
                    record.location,
                    record.creator,
                    format_ether(record.current_amount),
                    format_ether(record.goal),
                    summary.progress_percent,
                    record.deadline,
                    summary.days_left,
                    format_ether(record.total_raised),
                    format_ether(record.total_withdrawn),
                )
            })
        }
        Commands::List {
            category,
            search,
            sort,
            limit,
        } => {
            let chain = open(&path)?;
            let query = ProjectQuery {
                filter: ProjectFilter { category, search },
                sort: sort.into(),
                limit,
            };
            let rows = catalog::list_projects(chain.ledger(), &query, config.now());
            emit(json, &rows, || render_summaries(&rows))
        }
        Commands::Dashboard { address } => {
            let chain = open(&path)?;
            let board = catalog::dashboard(&chain, &address, config.now());
            emit(json, &board, || render_dashboard(&board))
        }
        Commands::History { project } => {
            let chain = open(&path)?;
            let history = catalog::project_history(&chain, project);
            emit(json, &history, || render_history(&history))
        }
        Commands::Events => {
            let chain = open(&path)?;
            let events = chain.ledger().events();
            if json {
                return emit(json, &events, String::new);
            }
            for event in events {
                println!("{}", serde_json::to_string(event).map_err(|e| e.to_string())?);
            }
            Ok(())
        }
        Commands::Snapshot => {
            let chain = open(&path)?;
            let snapshot = Snapshot {
                height: chain.meta().height,
                timestamp: chain.meta().timestamp,
                last_tx: chain.meta().last_tx.clone(),
                owner: chain.ledger().owner(),
                project_count: chain.ledger().get_project_count(),
                custody: chain.ledger().custody(),
                state_root: hex::encode(chain.ledger().state_root()),
            };
            emit(json, &snapshot, || {
                format!(
                    "height={} timestamp={} projects={} custody={} ETH\nowner={}\nstate_root={}",
                    snapshot.height,
                    snapshot.timestamp,
                    snapshot.project_count,
                    format_ether(snapshot.custody),
                    snapshot.owner,
                    snapshot.state_root,
                )
            })
        }
    }
}

#[derive(Serialize)]
struct Snapshot {
    height: u64,
    timestamp: u64,
    last_tx: Option<String>,
    owner: Address,
    project_count: ProjectId,
    #[serde(with = "amount_str")]
    custody: Amount,
    state_root: String,
}

fn emit<T: Serialize + ?Sized>(
    json: bool,
    value: &T,
    human: impl FnOnce() -> String,
) -> Result<(), String> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).map_err(|e| e.to_string())?
        );
    } else {
        println!("{}", human());
    }
    Ok(())
}

fn open(path: &Path) -> Result<Chain, String> {
    if !path.exists() {
        return Err(format!(
            "no state at {}; run `funding init` first",
            path.display()
        ));
    }
    store::load(path).map_err(|e| e.to_string())
}

fn init_cmd(path: &Path, owner: Option<Address>, json: bool) -> Result<(), String> {
    if path.exists() {
        return Err(format!("state file {} already exists", path.display()));
    }
    let owner = owner.unwrap_or_else(Address::random);
    let chain = store::load_or_init(path, owner).map_err(|e| e.to_string())?;
    store::save(path, &chain).map_err(|e| e.to_string())?;
    info!(path = %path.display(), %owner, "state initialised");
    emit(json, &owner, || {
        format!("initialised {} (owner {owner})", path.display())
    })
}

fn submit_cmd(path: &Path, config: &Config, json: bool, tx: Transaction) -> Result<(), String> {
    let mut chain = open(path)?;
    let receipt = chain
        .submit(tx, config.now())
        .map_err(|e| e.to_string())?;
    store::save(path, &chain).map_err(|e| e.to_string())?;
    emit(json, &receipt, || render_receipt(&receipt))
}

fn render_receipt(receipt: &Receipt) -> String {
    let mut out = format!("tx {} (height {})", receipt.tx_hash, receipt.height);
    for event in &receipt.events {
        let line = match event {
            LedgerEvent::ProjectCreated { id, title, goal, .. } => {
                format!("project #{id} created: {title} (goal {} ETH)", format_ether(*goal))
            }
            LedgerEvent::DonationReceived { id, donor, amount } => {
                format!("{donor} donated {} ETH to #{id}", format_ether(*amount))
            }
            LedgerEvent::FundsWithdrawn { id, creator, amount } => {
                format!("{creator} withdrew {} ETH from #{id}", format_ether(*amount))
            }
        };
        out.push_str("\n  ");
        out.push_str(&line);
    }
    out
}

fn render_summaries(rows: &[ProjectSummary]) -> String {
    if rows.is_empty() {
        return "no projects match".to_string();
    }
    rows.iter()
        .map(|p| {
            format!(
                "#{:<4} {:<32} {:<14} {:>3}%  {} / {} ETH  {}",
                p.id,
                p.title,
                p.category,
                p.progress_percent,
                format_ether(p.current_amount),
                format_ether(p.goal),
                if p.expired {
                    "ended".to_string()
                } else {
                    format!("{} days left", p.days_left)
                },
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_dashboard(board: &Dashboard) -> String {
    let mut out = format!(
        "{}\ncreated projects: {} (available {} ETH)",
        board.address,
        board.created.len(),
        format_ether(board.created_balance)
    );
    if !board.created.is_empty() {
        out.push('\n');
        out.push_str(&render_summaries(&board.created));
    }
    out.push_str(&format!(
        "\nsupported projects: {} (donated {} ETH)",
        board.supported.len(),
        format_ether(board.total_donated)
    ));
    for supported in &board.supported {
        out.push_str(&format!(
            "\n#{:<4} {:<32} donated {} ETH",
            supported.project.id,
            supported.project.title,
            format_ether(supported.donated)
        ));
    }
    out
}

fn render_history(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return "no transactions".to_string();
    }
    history
        .iter()
        .map(|entry| {
            let kind = match entry.kind {
                HistoryKind::Donation => "donation",
                HistoryKind::Withdrawal => "withdrawal",
            };
            format!(
                "{} {:<10} {} {} ETH {}",
                entry.timestamp,
                kind,
                entry.from,
                format_ether(entry.amount),
                entry.tx_hash
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

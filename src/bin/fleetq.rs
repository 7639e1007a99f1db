//! fleetq CLI — operator interface to the worker fleet.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use serde_json::json;

use fleetq::agent::{WorkerAgent, identity};
use fleetq::config::Config;
use fleetq::db::Db;
use fleetq::dispatch::{TaskDispatcher, TaskQueue};
use fleetq::model::{
    AccountId, AccountSession, OP_GET_ALL_ACCOUNTS_STATUS, OP_REMOVE_ACCOUNT, OP_START_ACCOUNT,
    OP_STOP_ACCOUNT, OP_STOP_ALL_ACCOUNTS, OP_ADD_ACCOUNT, OpOutcome, WorkerStatus,
};
use fleetq::reconciler::{Reconciler, WorkerRegistry};
use fleetq::runtime::AccountRuntime;
use fleetq::runtime::connector::BotApiConnector;
use fleetq::store::LivenessStore;
use fleetq::telemetry::{TelemetryConfig, init_telemetry};

/// Wait applied to account operations dispatched from the CLI.
const DISPATCH_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "fleetq", about = "Worker fleet coordination")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker agent daemon
    Serve {
        /// Identity file (created on first launch, reused on restart)
        #[arg(long)]
        identity_file: Option<PathBuf>,
    },
    /// Run the registry reconciler daemon
    Reconcile {
        /// Scan interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Worker registry operations
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
    /// Account operations on a specific worker
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
}

#[derive(Subcommand)]
enum WorkerAction {
    /// List registered workers with registry and live status
    List {
        #[arg(long)]
        active_only: bool,
    },
    /// Show one worker in detail
    Show { name: String },
    /// Active liveness probe: store staleness plus a ping
    Status { name: String },
    /// Force the registry active flag on
    Activate { name: String },
    /// Force the registry active flag off
    Deactivate { name: String },
    /// Delete a worker row and its liveness entries
    Delete { name: String },
}

#[derive(Subcommand)]
enum AccountAction {
    /// Add an account to a worker's runtime (does not start it)
    Add {
        worker: String,
        account_id: i64,
        phone: String,
        #[arg(long)]
        api_id: String,
        #[arg(long)]
        api_hash: String,
        /// Transport credential; absent accounts stay unauthorized
        #[arg(long)]
        session: Option<String>,
    },
    /// Remove an account from a worker's runtime
    Remove { worker: String, account_id: i64 },
    Start { worker: String, account_id: i64 },
    Stop { worker: String, account_id: i64 },
    Status { worker: String, account_id: i64 },
    /// Status of every account on the worker
    StatusAll { worker: String },
    /// Stop every account on the worker
    StopAll { worker: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { identity_file } => cmd_serve(identity_file).await,
        Command::Reconcile { interval } => cmd_reconcile(interval).await,
        Command::Worker { action } => cmd_worker(action).await,
        Command::Account { action } => cmd_account(action).await,
    }
}

async fn open_db(config: &Config) -> anyhow::Result<Arc<Db>> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok(Arc::new(db))
}

async fn cmd_serve(identity_file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "fleetq-worker".to_string(),
    })?;

    let db = open_db(&config).await?;
    let identity = identity::load_or_generate(
        identity_file.as_deref().unwrap_or(&config.identity_file),
        &config.server_address,
    )?;

    let store: Arc<dyn LivenessStore> = db.clone();
    let queue: Arc<dyn TaskQueue> = db.clone();
    let runtime = Arc::new(AccountRuntime::new(Arc::new(BotApiConnector::new())));

    let agent = Arc::new(WorkerAgent::new(
        identity,
        store,
        queue,
        runtime,
        config.heartbeat_period,
    ));

    let handle = Arc::clone(&agent);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    agent.run().await?;
    Ok(())
}

async fn cmd_reconcile(interval: Option<u64>) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "fleetq-reconciler".to_string(),
    })?;

    let db = open_db(&config).await?;
    let store: Arc<dyn LivenessStore> = db.clone();
    let registry: Arc<dyn WorkerRegistry> = db.clone();

    let reconciler = Arc::new(Reconciler::new(store, registry, config.online_timeout));

    let handle = Arc::clone(&reconciler);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        handle.shutdown();
    });

    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or(config.reconcile_interval);
    reconciler.run(interval).await?;
    Ok(())
}

async fn cmd_worker(action: WorkerAction) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let db = open_db(&config).await?;
    let store: Arc<dyn LivenessStore> = db.clone();
    let registry: Arc<dyn WorkerRegistry> = db.clone();

    match action {
        WorkerAction::List { active_only } => {
            let workers = registry.list(active_only).await?;
            if workers.is_empty() {
                println!("No workers registered.");
                return Ok(());
            }

            println!(
                "{:<6}  {:<24}  {:<20}  {:<8}  {:<8}  CREATED",
                "ID", "NAME", "SERVER", "REGISTRY", "LIVE"
            );
            println!("{}", "-".repeat(92));
            for worker in &workers {
                let live = match store.get(&worker.name).await? {
                    Some(record) => record.status.to_string(),
                    None => "unknown".to_string(),
                };
                println!(
                    "{:<6}  {:<24}  {:<20}  {:<8}  {:<8}  {}",
                    worker.id,
                    worker.name,
                    worker.server_address,
                    if worker.is_active { "active" } else { "inactive" },
                    live,
                    worker.created_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
            println!("\n{} worker(s)", workers.len());
        }
        WorkerAction::Show { name } => {
            let Some(worker) = registry.get_by_name(&name).await? else {
                anyhow::bail!("worker {name} not found");
            };
            println!("ID:       {}", worker.id);
            println!("Name:     {}", worker.name);
            println!("Server:   {}", worker.server_address);
            println!(
                "Registry: {}",
                if worker.is_active { "active" } else { "inactive" }
            );
            println!("Created:  {}", worker.created_at);
            match store.get(&worker.name).await? {
                Some(record) => {
                    println!("Live:     {}", record.status);
                    println!("Record:   {}", serde_json::to_string_pretty(&record)?);
                }
                None => println!("Live:     unknown (no liveness entry)"),
            }
            if let Some(last_seen) = store.last_seen(&worker.name).await? {
                println!("Last seen: {last_seen}");
            }
        }
        WorkerAction::Status { name } => {
            let dispatcher = TaskDispatcher::new(db.clone(), store, config.online_timeout);
            let status = dispatcher.check_worker_status(&name).await?;
            println!("{name}: {status}");
        }
        WorkerAction::Activate { name } => {
            let Some(worker) = registry.get_by_name(&name).await? else {
                anyhow::bail!("worker {name} not found");
            };
            registry.set_active(worker.id, true).await?;
            println!("worker {name} activated");
        }
        WorkerAction::Deactivate { name } => {
            let Some(worker) = registry.get_by_name(&name).await? else {
                anyhow::bail!("worker {name} not found");
            };
            registry.set_active(worker.id, false).await?;
            println!("worker {name} deactivated");
        }
        WorkerAction::Delete { name } => {
            let Some(worker) = registry.get_by_name(&name).await? else {
                anyhow::bail!("worker {name} not found");
            };
            let reconciler = Reconciler::new(store, registry, config.online_timeout);
            reconciler.delete_worker(worker.id).await?;
            println!("worker {name} deleted");
        }
    }
    Ok(())
}

async fn cmd_account(action: AccountAction) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let db = open_db(&config).await?;
    let store: Arc<dyn LivenessStore> = db.clone();
    let dispatcher = TaskDispatcher::new(db.clone(), store, config.online_timeout);

    match action {
        AccountAction::Add {
            worker,
            account_id,
            phone,
            api_id,
            api_hash,
            session,
        } => {
            ensure_online(&dispatcher, &worker).await?;
            let payload = AccountSession {
                account_id: AccountId(account_id),
                phone,
                api_id,
                api_hash,
                session_credential: session,
            };
            let outcome = dispatcher
                .submit(
                    &worker,
                    OP_ADD_ACCOUNT,
                    serde_json::to_value(&payload)?,
                    Some(DISPATCH_WAIT),
                )
                .await?;
            print_outcome(outcome);
        }
        AccountAction::Remove { worker, account_id } => {
            ensure_online(&dispatcher, &worker).await?;
            let outcome = dispatcher
                .submit(
                    &worker,
                    OP_REMOVE_ACCOUNT,
                    json!({ "account_id": account_id }),
                    Some(DISPATCH_WAIT),
                )
                .await?;
            print_outcome(outcome);
        }
        AccountAction::Start { worker, account_id } => {
            ensure_online(&dispatcher, &worker).await?;
            let outcome = dispatcher
                .submit(
                    &worker,
                    OP_START_ACCOUNT,
                    json!({ "account_id": account_id }),
                    Some(DISPATCH_WAIT),
                )
                .await?;
            print_outcome(outcome);
        }
        AccountAction::Stop { worker, account_id } => {
            ensure_online(&dispatcher, &worker).await?;
            let outcome = dispatcher
                .submit(
                    &worker,
                    OP_STOP_ACCOUNT,
                    json!({ "account_id": account_id }),
                    Some(DISPATCH_WAIT),
                )
                .await?;
            print_outcome(outcome);
        }
        AccountAction::Status { worker, account_id } => {
            ensure_online(&dispatcher, &worker).await?;
            let outcome = dispatcher
                .account_status(&worker, AccountId(account_id), DISPATCH_WAIT)
                .await?;
            print_outcome(Some(outcome));
        }
        AccountAction::StatusAll { worker } => {
            ensure_online(&dispatcher, &worker).await?;
            let outcome = dispatcher
                .submit(
                    &worker,
                    OP_GET_ALL_ACCOUNTS_STATUS,
                    json!({}),
                    Some(DISPATCH_WAIT),
                )
                .await?;
            print_outcome(outcome);
        }
        AccountAction::StopAll { worker } => {
            ensure_online(&dispatcher, &worker).await?;
            let outcome = dispatcher
                .submit(
                    &worker,
                    OP_STOP_ALL_ACCOUNTS,
                    json!({}),
                    Some(DISPATCH_WAIT),
                )
                .await?;
            print_outcome(outcome);
        }
    }
    Ok(())
}

/// Refuse to enqueue when the target is stale — the message would sit
/// queued indefinitely and the wait would always time out.
async fn ensure_online(dispatcher: &TaskDispatcher, worker: &str) -> anyhow::Result<()> {
    if !dispatcher.is_online(worker).await? {
        anyhow::bail!(
            "worker {worker} is {}; only last-known registry state is available",
            WorkerStatus::Offline
        );
    }
    Ok(())
}

fn print_outcome(outcome: Option<OpOutcome>) {
    match outcome {
        Some(outcome) => {
            println!("{}: {}", outcome.status, outcome.message);
            if let Some(data) = outcome.data {
                match serde_json::to_string_pretty(&data) {
                    Ok(pretty) => println!("{pretty}"),
                    Err(_) => println!("{data}"),
                }
            }
        }
        None => println!("submitted (no wait requested)"),
    }
}

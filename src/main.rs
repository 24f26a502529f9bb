use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowsplit::allocation::segments_from_buckets;
use flowsplit::api::PlanApi;
use flowsplit::buckets::BucketBook;
use flowsplit::flow::backend::BackendTransfers;
use flowsplit::flow::poller::{PlanPoller, PollOutcome};
use flowsplit::flow::simulated::SimulatedTransfers;
use flowsplit::flow::{
    CancelHandle, ExecutionStatus, SourceAccount, SplitFlowController, TransferExecutor,
};
use flowsplit::links::{DeepLink, NotificationData};
use flowsplit::store::LocalStore;
use flowsplit::{ApiClient, ClientConfig, FlowStep};

#[derive(Parser, Debug)]
#[command(name = "flowsplit", version, about = "Split incoming deposits across buckets")]
struct Cli {
    /// Client config file (TOML); created with defaults if missing
    #[arg(long, default_value = "flowsplit.toml")]
    config: PathBuf,

    /// Backend base URL (overrides config and FLOWSPLIT_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer token (overrides config and FLOWSPLIT_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List buckets, optionally reordering them first
    Buckets {
        /// New order as comma separated bucket ids
        #[arg(long, value_delimiter = ',')]
        reorder: Vec<String>,
    },

    /// List deposits waiting to be split
    Deposits,

    /// Show the plan for a deposit (the saved one, or the server's proposal)
    Preview { deposit_id: String },

    /// Allocate and execute a split for a deposit
    Split {
        deposit_id: String,

        /// Source account id
        #[arg(long)]
        source: String,

        /// Source account display name
        #[arg(long, default_value = "Checking")]
        source_name: String,

        /// Override a bucket's percentage, e.g. --set savings=20
        #[arg(long = "set", value_parser = parse_assignment)]
        overrides: Vec<(String, f64)>,

        /// Run against the simulated executor instead of the backend
        #[arg(long, default_value_t = false)]
        simulate: bool,
    },

    /// Retry the failed buckets of a saved split
    Retry {
        deposit_id: String,

        #[arg(long, default_value_t = false)]
        simulate: bool,

        /// Accept the partial result instead of retrying
        #[arg(long, default_value_t = false)]
        accept: bool,
    },

    /// Follow a plan on the server until it settles
    Watch { deposit_id: String },

    /// Resolve a deep link or a notification payload (JSON)
    Link {
        url: Option<String>,

        #[arg(long)]
        notification: Option<String>,
    },
}

fn parse_assignment(raw: &str) -> Result<(String, f64), String> {
    let (id, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected bucket=percent, got {}", raw))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("bad percentage in {}: {}", raw, e))?;
    Ok((id.trim().to_string(), value))
}

fn init_tracing() {
    let filter = std::env::var("FLOWSPLIT_LOG")
        .unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut cfg = ClientConfig::load_or_create(&cli.config).map_err(|e| anyhow!(e))?;
    cfg.apply_env_overrides();
    if let Some(url) = &cli.api_url {
        cfg.api_base_url = url.clone();
    }
    if let Some(token) = &cli.token {
        cfg.access_token = Some(token.clone()).filter(|t| !t.is_empty());
    }
    cfg.validate().map_err(|e| anyhow!(e))?;
    Ok(cfg)
}

/// Cancel `handle` on Ctrl-C
fn cancel_on_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            handle.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Link { url, notification } = &cli.cmd {
        return resolve_link(url.as_deref(), notification.as_deref());
    }

    let cfg = load_config(&cli)?;
    let api = ApiClient::new(&cfg)?;
    let store = LocalStore::open(&cfg.data_dir)?;
    info!(api = %api.base_url(), data_dir = %cfg.data_dir.display(), "flowsplit starting");

    match cli.cmd {
        Commands::Buckets { reorder } => list_buckets(&api, &store, &reorder).await,
        Commands::Deposits => {
            for deposit in api.pending_deposits().await? {
                println!(
                    "{}  {:>10.2}  {}",
                    deposit.id,
                    deposit.amount,
                    deposit.source.unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Preview { deposit_id } => preview(&api, &deposit_id).await,
        Commands::Split {
            deposit_id,
            source,
            source_name,
            overrides,
            simulate,
        } => {
            let source = SourceAccount::new(source, source_name);
            split(&cfg, &api, &store, &deposit_id, source, &overrides, simulate).await
        }
        Commands::Retry {
            deposit_id,
            simulate,
            accept,
        } => retry(&cfg, &api, &store, &deposit_id, simulate, accept).await,
        Commands::Watch { deposit_id } => watch(&cfg, &api, &deposit_id).await,
        Commands::Link { .. } => Ok(()),
    }
}

async fn list_buckets(api: &ApiClient, store: &LocalStore, reorder: &[String]) -> Result<()> {
    let mut book = match store.load_buckets()? {
        Some(snapshot) => BucketBook::from_snapshot(snapshot),
        None => BucketBook::new(),
    };

    if let Err(e) = book.refresh(api).await {
        if book.buckets().is_empty() {
            return Err(e.into());
        }
        warn!(error = %e, "using cached buckets");
    }
    if !reorder.is_empty() {
        book.reorder(api, reorder).await?;
    }
    store.save_buckets(&book.snapshot())?;

    for bucket in book.buckets() {
        println!(
            "{:>3}  {:<20} {:?} {:>8.2}{}",
            bucket.sort_order,
            bucket.name,
            bucket.bucket_type,
            bucket.allocation_value,
            if bucket.is_active { "" } else { "  (inactive)" }
        );
    }
    println!("percentage total: {:.2}%", book.total_percentage_allocation());
    Ok(())
}

async fn preview(api: &ApiClient, deposit_id: &str) -> Result<()> {
    match api.split_plan_by_deposit(deposit_id).await {
        Ok(plan) => {
            println!("plan {} ({})", plan.id, plan.status.as_str());
            for action in &plan.actions {
                let mark = if action.executed { "done" } else { "open" };
                println!("  {:<20} {:>10.2}  {}", action.bucket_id, action.amount, mark);
            }
        }
        Err(e) if e.is_not_found() => {
            let preview = api.preview_split_plan(deposit_id).await?;
            println!("proposed split of {:.2}", preview.total_amount);
            for action in &preview.actions {
                println!("  {:<20} {:>10.2}", action.bucket_id, action.amount);
            }
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn split(
    cfg: &ClientConfig,
    api: &ApiClient,
    store: &LocalStore,
    deposit_id: &str,
    source: SourceAccount,
    overrides: &[(String, f64)],
    simulate: bool,
) -> Result<()> {
    let deposit = api
        .get_deposit(deposit_id)
        .await
        .with_context(|| format!("loading deposit {}", deposit_id))?;

    let mut book = BucketBook::new();
    book.refresh(api).await?;
    store.save_buckets(&book.snapshot())?;

    let mut flow = SplitFlowController::with_completion_delay(cfg.completion_delay());
    flow.start_from_deposit(&deposit, Some(source))?;
    flow.set_segments(segments_from_buckets(book.buckets(), deposit.amount));
    flow.continue_to_allocate()?;
    for (bucket_id, percentage) in overrides {
        if book.get(bucket_id).is_none() {
            bail!("unknown bucket {}", bucket_id);
        }
        flow.update_allocation(bucket_id, *percentage);
    }
    flow.proceed_to_confirm()?;

    for allocation in &flow.state().allocations {
        println!(
            "  {:<20} {:>6.2}%  {:>10.2}",
            allocation.bucket_name, allocation.percentage, allocation.amount
        );
    }
    println!(
        "  {:<20} {:>6.2}%  {:>10.2}",
        "unallocated",
        flow.state().remainder_percentage,
        flow.state().remainder
    );

    let outcome = if simulate {
        execute(&mut flow, &SimulatedTransfers::new(), false).await
    } else {
        execute(&mut flow, &BackendTransfers::from_config(api, cfg), false).await
    };
    store.save_flow(flow.state())?;
    report(&flow, deposit_id);
    outcome
}

async fn retry(
    cfg: &ClientConfig,
    api: &ApiClient,
    store: &LocalStore,
    deposit_id: &str,
    simulate: bool,
    accept: bool,
) -> Result<()> {
    let state = store
        .load_flow(deposit_id)?
        .ok_or_else(|| anyhow!("no saved split for deposit {}", deposit_id))?;
    if state.current_step != FlowStep::Processing {
        bail!("split for {} is at {}, nothing to retry", deposit_id, state.current_step);
    }

    let mut flow = SplitFlowController::restore(state, cfg.completion_delay());
    if accept {
        flow.continue_anyway()?;
        store.save_flow(flow.state())?;
        report(&flow, deposit_id);
        return Ok(());
    }

    let outcome = if simulate {
        execute(&mut flow, &SimulatedTransfers::new(), true).await
    } else {
        execute(&mut flow, &BackendTransfers::from_config(api, cfg), true).await
    };
    store.save_flow(flow.state())?;
    report(&flow, deposit_id);
    outcome
}

async fn execute<E: TransferExecutor>(
    flow: &mut SplitFlowController,
    executor: &E,
    is_retry: bool,
) -> Result<()> {
    cancel_on_ctrl_c(flow.cancel_handle());

    let mut updates = flow.subscribe();
    let progress = tokio::spawn(async move {
        let mut reported = 0;
        while updates.changed().await.is_ok() {
            let done = updates.borrow().completed_count();
            if done != reported {
                reported = done;
                let total = updates.borrow().allocations.len();
                println!("  {}/{} buckets complete", done, total);
            }
        }
    });

    let result = if is_retry {
        flow.retry(executor).await
    } else {
        flow.confirm_split(executor).await
    };
    progress.abort();

    result.map(|_| ()).map_err(Into::into)
}

fn report(flow: &SplitFlowController, deposit_id: &str) {
    let state = flow.state();
    match (state.current_step, state.execution_status) {
        (FlowStep::Complete, ExecutionStatus::Complete) => {
            println!("split complete for {}", deposit_id);
        }
        (FlowStep::Complete, _) => {
            println!("split for {} finished with failures accepted", deposit_id);
        }
        (FlowStep::Processing, ExecutionStatus::Partial) => {
            for allocation in state.failed_allocations() {
                println!(
                    "  failed: {:<20} {}",
                    allocation.bucket_name,
                    state.error_of(&allocation.bucket_id).unwrap_or("unknown error")
                );
            }
            println!(
                "run `flowsplit retry {}` to retry, or add --accept to continue anyway",
                deposit_id
            );
        }
        (step, status) => println!("split for {} is at {} ({:?})", deposit_id, step, status),
    }
    if let Some(err) = &state.error {
        println!("error: {}", err);
    }
}

async fn watch(cfg: &ClientConfig, api: &ApiClient, deposit_id: &str) -> Result<()> {
    let cancel = CancelHandle::new();
    cancel_on_ctrl_c(cancel.clone());

    let poller = PlanPoller::new(api, cfg.poll_interval(), cfg.max_poll_attempts);
    let outcome = poller
        .watch(deposit_id, &cancel, |plan| {
            let executed = plan.actions.iter().filter(|a| a.executed).count();
            println!(
                "  {} {}/{} actions executed",
                plan.status.as_str(),
                executed,
                plan.actions.len()
            );
        })
        .await;

    match outcome {
        PollOutcome::Ready(plan) => println!("plan {} is {}", plan.id, plan.status.as_str()),
        PollOutcome::Cancelled => println!("stopped watching"),
        PollOutcome::Exhausted { attempts, .. } => {
            bail!("plan for {} did not settle after {} checks", deposit_id, attempts)
        }
    }
    Ok(())
}

fn resolve_link(url: Option<&str>, notification: Option<&str>) -> Result<()> {
    let link = match (url, notification) {
        (Some(url), _) => DeepLink::parse(url)?,
        (None, Some(payload)) => {
            let data: NotificationData =
                serde_json::from_str(payload).context("parsing notification payload")?;
            data.link()
                .ok_or_else(|| anyhow!("notification does not open a deposit"))?
        }
        (None, None) => bail!("pass a link or --notification"),
    };
    println!("{} -> deposit {} at {}", link, link.deposit_id, link.step);
    Ok(())
}

//! Data market node CLI
//!
//! Every invocation is one ledger call: load state, apply the command as
//! `--from`, commit state and notifications atomically, print the
//! notifications as JSON lines. Read-only commands do not advance the height.

use clap::{Parser, Subcommand};
use datamarket::types::hex_hash;
use datamarket::{
    batch_root_hash, Address, Amount, CallContext, DeployConfig, EpochId, Hash, InMemoryNodeRegistry, MarketError,
    MarketId, MarketRegistry, NodeRegistry, Notification, Role, Setting, SlotId, Storage,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "datamarket", version, about = "Data market: epochs, batches, attestations and rewards")]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Calling principal: 0x-prefixed address or a label
    #[arg(short, long, value_parser = parse_principal)]
    from: Address,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the registry with the caller as owner
    Init {
        #[arg(long, value_parser = parse_principal)]
        factory: Option<Address>,
    },
    /// Create a market from a JSON deployment file
    Deploy { config: PathBuf },
    Toggle {
        market: MarketId,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Grant (or with --revoke, remove) a role
    Roles {
        market: MarketId,
        role: Role,
        #[arg(value_parser = parse_principal)]
        principal: Address,
        #[arg(long)]
        revoke: bool,
    },
    EpochManager {
        market: MarketId,
        #[arg(value_parser = parse_principal)]
        manager: Address,
    },
    Set {
        market: MarketId,
        name: String,
        value: String,
    },
    ToggleRewards { market: MarketId },
    SequencerId { market: MarketId, id: String },
    ReleaseEpoch { market: MarketId, begin: u64, end: u64 },
    SkipEpoch { market: MarketId, begin: u64, end: u64 },
    /// Submit a batch; the root hash defaults to the Merkle root of the snapshot CIDs
    SubmitBatch {
        market: MarketId,
        cid: String,
        epoch: EpochId,
        #[arg(long = "project")]
        projects: Vec<String>,
        #[arg(long = "snapshot")]
        snapshots: Vec<String>,
        #[arg(long, value_parser = hex_hash::parse)]
        root: Option<Hash>,
    },
    EndBatches { market: MarketId, epoch: EpochId },
    Attest {
        market: MarketId,
        cid: String,
        epoch: EpochId,
        #[arg(value_parser = hex_hash::parse)]
        root: Hash,
    },
    /// Whether the attestation window for a batch has lapsed without consensus
    CheckConsensus { market: MarketId, cid: String, epoch: EpochId },
    ForceComplete { market: MarketId, cid: String, epoch: EpochId },
    /// Registry owner only: bind a slot to its owner and snapshotter
    AssignSlot {
        slot: SlotId,
        #[arg(value_parser = parse_principal)]
        owner: Address,
        #[arg(value_parser = parse_principal)]
        snapshotter: Address,
    },
    UpdateRewards {
        market: MarketId,
        day: u64,
        eligible: u64,
        #[arg(long = "slot")]
        slots: Vec<SlotId>,
        #[arg(long = "count")]
        counts: Vec<u64>,
    },
    EligibleNodes { market: MarketId, day: u64, count: u64 },
    Deposit { amount: Amount },
    Claim,
    EmergencyWithdraw,
    /// Print registry or market state
    Status { market: Option<MarketId> },
    /// Print stored notifications starting at a sequence number
    Events {
        #[arg(default_value = "0")]
        from: u64,
    },
}

impl Command {
    fn is_read_only(&self) -> bool {
        matches!(self, Command::Status { .. } | Command::Events { .. } | Command::CheckConsensus { .. })
    }
}

fn parse_principal(s: &str) -> Result<Address, String> {
    if s.starts_with("0x") {
        s.parse().map_err(|e| format!("{}", e))
    } else {
        Ok(Address::from_label(s))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("datamarket=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&args.data_dir)?;
    let storage = Storage::open(&args.data_dir)?;
    let mut nodes = storage.load_nodes()?;
    let loaded = storage.load_registry()?;

    if args.command.is_read_only() {
        return query(&storage, loaded.as_ref(), &nodes, args.from, &args.command);
    }

    let mut registry = open_registry(loaded, &args.command, args.from)?;
    for n in call(&storage, &mut registry, &mut nodes, args.from, args.command)? {
        println!("{}", serde_json::to_string(&n)?);
    }
    Ok(())
}

fn open_registry(
    loaded: Option<MarketRegistry>,
    command: &Command,
    from: Address,
) -> Result<MarketRegistry, Box<dyn std::error::Error>> {
    match (loaded, command) {
        (Some(_), Command::Init { .. }) => Err("registry already initialized".into()),
        (Some(registry), _) => Ok(registry),
        (None, Command::Init { factory }) => {
            info!("Data market v{} | registry owner {}", VERSION, from);
            Ok(MarketRegistry::new(from, factory.unwrap_or(from)))
        }
        (None, _) => Err("registry not initialized, run `init` first".into()),
    }
}

/// Apply one mutating command at the next block and commit its notifications
fn call(
    storage: &Storage,
    registry: &mut MarketRegistry,
    nodes: &mut InMemoryNodeRegistry,
    from: Address,
    command: Command,
) -> Result<Vec<Notification>, Box<dyn std::error::Error>> {
    let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
    let ctx = CallContext::new(from, timestamp, storage.next_block()?);
    execute(registry, nodes, &ctx, command)?;
    Ok(storage.commit(registry, nodes)?)
}

fn execute(
    registry: &mut MarketRegistry,
    nodes: &mut InMemoryNodeRegistry,
    ctx: &CallContext,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Init { .. } => {}
        Command::Deploy { config } => {
            let config = DeployConfig::load(config)?;
            let (id, _) = config.deploy(registry, ctx)?;
            info!("Market {} deployed", id);
        }
        Command::Toggle { market, enabled } => {
            registry.toggle_market(ctx, market, enabled)?;
        }
        Command::Roles { market, role, principal, revoke } => {
            registry.update_addresses(ctx, market, role, &[principal], &[!revoke])?;
        }
        Command::EpochManager { market, manager } => {
            registry.update_epoch_manager(ctx, market, manager)?;
        }
        Command::Set { market, name, value } => {
            registry.update_setting(ctx, market, Setting::parse(&name, &value)?)?;
        }
        Command::ToggleRewards { market } => {
            registry.toggle_rewards(ctx, market)?;
        }
        Command::SequencerId { market, id } => {
            registry.set_sequencer_id(ctx, market, &id)?;
        }
        Command::ReleaseEpoch { market, begin, end } => {
            registry.release_epoch(ctx, market, begin, end)?;
        }
        Command::SkipEpoch { market, begin, end } => {
            registry.force_skip_epoch(ctx, market, begin, end)?;
        }
        Command::SubmitBatch { market, cid, epoch, projects, snapshots, root } => {
            let root = root.unwrap_or_else(|| batch_root_hash(&snapshots));
            registry.submit_batch(ctx, market, &cid, epoch, &projects, &snapshots, root)?;
        }
        Command::EndBatches { market, epoch } => {
            registry.end_batch_submissions(ctx, market, epoch)?;
        }
        Command::Attest { market, cid, epoch, root } => {
            registry.submit_attestation(ctx, market, &cid, epoch, root)?;
        }
        Command::ForceComplete { market, cid, epoch } => {
            registry.force_complete_consensus(ctx, market, &cid, epoch)?;
        }
        Command::AssignSlot { slot, owner, snapshotter } => {
            if ctx.caller != registry.owner() {
                return Err(MarketError::OnlyRegistryOwner(ctx.caller).into());
            }
            nodes.assign_slot(slot, owner, snapshotter);
            info!("Slot {} assigned to {} (snapshotter {})", slot, owner, snapshotter);
        }
        Command::UpdateRewards { market, day, eligible, slots, counts } => {
            registry.update_rewards(ctx, market, &slots, &counts, day, eligible, &*nodes)?;
        }
        Command::EligibleNodes { market, day, count } => {
            registry.update_eligible_nodes(ctx, market, day, count)?;
        }
        Command::Deposit { amount } => {
            registry.deposit(ctx, amount)?;
        }
        Command::Claim => {
            registry.claim_rewards(ctx, ctx.caller, &*nodes)?;
        }
        Command::EmergencyWithdraw => {
            registry.emergency_withdraw(ctx)?;
        }
        Command::Status { .. } | Command::Events { .. } | Command::CheckConsensus { .. } => {}
    }
    Ok(())
}

fn query(
    storage: &Storage,
    registry: Option<&MarketRegistry>,
    nodes: &InMemoryNodeRegistry,
    caller: Address,
    command: &Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Events { from } => {
            for n in storage.events_since(*from)? {
                println!("{}", serde_json::to_string(&n)?);
            }
        }
        Command::CheckConsensus { market, cid, epoch } => {
            let registry = registry.ok_or("registry not initialized")?;
            let ctx = CallContext::new(caller, 0, storage.height()?);
            let stalled = registry.check_dynamic_consensus(&ctx, *market, cid, *epoch)?;
            println!("{}", json!({ "market": market, "batch_cid": cid, "epoch_id": epoch, "stalled": stalled }));
        }
        Command::Status { market: None } => {
            let registry = registry.ok_or("registry not initialized")?;
            let counts = registry.node_counts(nodes);
            let status = json!({
                "owner": registry.owner(),
                "factory": registry.factory(),
                "markets": registry.market_count(),
                "vault_balance": registry.vault_balance().to_string(),
                "total_claimed": registry.total_claimed().to_string(),
                "pending_rewards": registry.pending_rewards(&caller, nodes).to_string(),
                "nodes": counts,
                "height": storage.height()?,
                "events": storage.event_count()?,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Status { market: Some(id) } => {
            let registry = registry.ok_or("registry not initialized")?;
            let market = registry.require_market(*id)?;
            let status = json!({
                "record": market.record(),
                "settings": {
                    "snapshot_submission_window": market.settings().snapshot_submission_window,
                    "batch_submission_window": market.settings().batch_submission_window,
                    "attestation_submission_window": market.settings().attestation_submission_window,
                    "min_attestations_for_consensus": market.settings().min_attestations_for_consensus,
                    "daily_snapshot_quota": market.settings().daily_snapshot_quota,
                    "reward_pool_size": market.settings().reward_pool_size.to_string(),
                    "day_size": market.settings().day_size,
                    "rewards_enabled": market.settings().rewards_enabled,
                },
                "epoch_manager": market.epoch_manager(),
                "sequencer_id": market.sequencer_id(),
                "validators": market.roles().members(Role::Validator),
                "sequencers": market.roles().members(Role::Sequencer),
                "admins": market.roles().members(Role::Admin),
                "current_epoch": market.current_epoch(),
                "day_counter": market.day_counter(),
                "epochs_in_a_day": market.epochs_in_a_day(),
                "batches": market.batches().len(),
                "epochs": market.epochs().len(),
                "total_nodes": nodes.total_node_count(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        _ => {}
    }
    Ok(())
}

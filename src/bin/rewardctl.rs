//! rewardctl - config template, deterministic simulation, state inspection

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use primitive_types::U256;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tt_epoch_rewards::beacon::EpochBeacon;
use tt_epoch_rewards::core::{network_id, now_ts, parse_node_id, short_hex};
use tt_epoch_rewards::crypto::kmac256_hash;
use tt_epoch_rewards::store::{load_state, save_state};
use tt_epoch_rewards::{
    settle_cluster, Amount, CallContext, ClusterId, InMemoryClusters, InMemoryReceiverStaking, InMemoryVault,
    NetworkId, NodeId, RewardConfig, RewardEngine, Role,
};

#[derive(Parser, Debug)]
#[command(name = "rewardctl", version, author)]
#[command(about = "TT epoch rewards - cluster selection and ticket payouts")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Write a starter configuration
    InitConfig {
        #[arg(long, default_value = "rewards.json")]
        out: PathBuf,

        /// Epoch 0 start (unix seconds); defaults to now
        #[arg(long)]
        start_time: Option<u64>,
    },

    /// Run epochs against in-memory staking with random participants
    Simulate {
        /// Config file (template when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 6)]
        epochs: u64,

        /// Clusters per network
        #[arg(long, default_value_t = 12)]
        clusters: u8,

        #[arg(long, default_value_t = 8)]
        receivers: u8,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Admin identity (hex); derived from the seed when omitted
        #[arg(long)]
        admin: Option<String>,

        /// Save the final core state (bincode)
        #[arg(long)]
        state_out: Option<PathBuf>,

        /// Settle every cluster out of a funded vault at the end
        #[arg(long, default_value_t = false)]
        settle: bool,
    },

    /// Summarize a saved state
    Inspect {
        #[arg(long)]
        state: PathBuf,
    },
}

type SimEngine = RewardEngine<InMemoryReceiverStaking, InMemoryClusters>;

fn sim_id(label: &[u8], n: u64) -> NodeId {
    kmac256_hash(b"SIM.id.v1", &[label, &n.to_le_bytes()])
}

/// Random split of `budget` tickets over `n` clusters (sums exactly).
fn random_split(rng: &mut StdRng, budget: u64, n: usize) -> Result<Vec<u32>> {
    let raw: Vec<u64> = (0..n).map(|_| rng.gen_range(1..=100)).collect();
    let sum: u64 = raw.iter().sum();
    let mut shares: Vec<u64> = raw.iter().map(|r| budget * r / sum).collect();
    let assigned: u64 = shares.iter().sum();
    if let Some(last) = shares.last_mut() {
        *last += budget - assigned;
    }
    shares
        .into_iter()
        .map(|s| u32::try_from(s).context("ticket share does not fit u32"))
        .collect()
}

struct SimOpts {
    epochs: u64,
    clusters: u8,
    receivers: u8,
    seed: u64,
    admin: Option<NodeId>,
    state_out: Option<PathBuf>,
    settle: bool,
}

fn simulate(cfg: RewardConfig, opts: SimOpts) -> Result<()> {
    let SimOpts { epochs, clusters, receivers, seed, admin, state_out, settle } = opts;
    let mut rng = StdRng::seed_from_u64(seed);
    let admin = admin.unwrap_or_else(|| sim_id(b"admin", seed));
    let mut engine: SimEngine = cfg.build_engine(admin, InMemoryReceiverStaking::default(), InMemoryClusters::default())?;
    let clock = *engine.clock();

    let setup = CallContext::new(admin, clock.start_time());
    for role in [Role::Updater, Role::Claimer] {
        engine.grant_role(&setup, role, admin)?;
    }

    // clusters with random commission and weight, per network
    let networks: Vec<NetworkId> = cfg.networks.iter().map(|n| network_id(&n.name)).collect();
    let mut all_clusters: Vec<ClusterId> = Vec::new();
    for (ni, net) in networks.iter().enumerate() {
        for c in 0..clusters {
            let id = sim_id(b"cluster", ((ni as u64) << 8) | u64::from(c));
            let payout = sim_id(b"payout", ((ni as u64) << 8) | u64::from(c));
            engine.clusters_mut().register(id, rng.gen_range(0..=30), payout, *net)?;
            engine.upsert_cluster_weight(&setup, id, U256::from(rng.gen_range(1u64..=1_000)))?;
            all_clusters.push(id);
        }
    }

    let signers: Vec<NodeId> = (0..receivers)
        .map(|r| {
            let receiver = sim_id(b"receiver", u64::from(r));
            let signer = sim_id(b"signer", u64::from(r));
            let stake = U256::from(rng.gen_range(1u64..=1_000_000));
            engine.stakes_mut().set_stake(receiver, 0, stake);
            engine.stakes_mut().set_signer(signer, receiver, 0);
            signer
        })
        .collect();
    engine.stakes_mut().set_next_epoch(u64::MAX);
    info!(clusters = all_clusters.len(), receivers, epochs, seed, "simulation set up");

    for epoch in 0..epochs {
        let opening = clock.epoch_start(epoch) + 1;
        for net in &networks {
            let picked = engine.select_clusters(&CallContext::new(admin, opening), *net, epoch)?;
            println!(
                "epoch {epoch:>3} {} selected [{}]",
                short_hex(net),
                picked.iter().map(short_hex).collect::<Vec<_>>().join(" ")
            );
        }

        // beacon: every signer commits and reveals, finalized after the epoch
        for signer in &signers {
            let r: [u8; 32] = rng.gen();
            let ctx = CallContext::new(*signer, opening + 1);
            engine.beacon_commit(&ctx, epoch, EpochBeacon::commit_hash(epoch, signer, &r))?;
            engine.beacon_reveal(&ctx, epoch, r)?;
        }

        // one random weight drift per epoch
        if let Some(c) = all_clusters.get(rng.gen_range(0..all_clusters.len().max(1))) {
            engine.upsert_cluster_weight(&CallContext::new(admin, opening + 2), *c, U256::from(rng.gen_range(0u64..=1_000)))?;
        }

        let closing = clock.epoch_end(epoch);
        engine.finalize_beacon(&CallContext::new(admin, closing), epoch)?;
        for net in &networks {
            let selected = engine.selected_clusters(net, epoch, closing)?;
            if selected.is_empty() {
                continue;
            }
            for signer in &signers {
                let shares = random_split(&mut rng, engine.ledger().ticket_budget(), selected.len())?;
                engine.issue_tickets(&CallContext::new(*signer, closing), *net, epoch, &shares)?;
            }
            println!(
                "epoch {epoch:>3} {} distributed {} of {}",
                short_hex(net),
                engine.distributed_in_epoch(net, epoch),
                engine.network_budget(net)?
            );
        }
    }

    if settle {
        let mut funded: Amount = U256::zero();
        for (_, amount) in engine.ledger().pending_balances() {
            funded = funded.saturating_add(*amount);
        }
        let mut vault = InMemoryVault::funded(funded);
        let pool = sim_id(b"delegators", 0);
        let ctx = CallContext::new(admin, clock.epoch_end(epochs));
        for c in &all_clusters {
            let s = settle_cluster(&mut engine, &ctx, *c, &pool, &mut vault)?;
            if !s.claimed.is_zero() {
                println!("settled {} claimed {} commission {}", short_hex(c), s.claimed, s.commission);
            }
        }
        println!("delegator pool received {}", vault.paid_to(&pool));
    }

    if let Some(path) = state_out {
        save_state(&path, engine.state())?;
        println!("state written to {}", path.display());
    }
    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let state = load_state(&path)?;
    let clock = state.clock;
    println!("clock: start {} epoch length {}s", clock.start_time(), clock.epoch_length());
    println!("rewards per epoch: {}", state.params.total_rewards_per_epoch);
    println!("ticket budget: {}", state.ledger.ticket_budget());
    println!("beacon: {}", hex::encode(state.beacon.current()));

    for id in state.networks.ids() {
        let Some(info) = state.networks.get(id) else { continue };
        let budget = state
            .networks
            .network_budget(id, state.params.total_rewards_per_epoch)
            .unwrap_or_default();
        println!("network {} weight {} budget {}", short_hex(id), info.reward_weight, budget);
        let Some(sel) = info.selector.and_then(|s| state.selectors.get(&s)) else {
            println!("  (inactive)");
            continue;
        };
        println!(
            "  tree: {} clusters, total weight {}, k = {}",
            sel.tree().len(),
            sel.tree().total_weight(),
            sel.clusters_to_select()
        );
        for (epoch, picked) in sel.selections() {
            println!(
                "  epoch {epoch:>3}: distributed {} to [{}]",
                state.ledger.distributed(id, epoch),
                picked.iter().map(short_hex).collect::<Vec<_>>().join(" ")
            );
        }
    }

    let pending: BTreeMap<String, Amount> = state
        .ledger
        .pending_balances()
        .map(|(c, a)| (short_hex(c), *a))
        .collect();
    println!("pending balances: {}", pending.len());
    for (cluster, amount) in pending {
        println!("  {cluster} {amount}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::InitConfig { out, start_time } => {
            let cfg = RewardConfig::template(start_time.unwrap_or_else(now_ts));
            cfg.save(&out)?;
            println!("config written to {}", out.display());
        }
        Cmd::Simulate { config, epochs, clusters, receivers, seed, admin, state_out, settle } => {
            let cfg = match config {
                Some(p) => RewardConfig::load(&p)?,
                None => RewardConfig::template(0),
            };
            let admin = admin.as_deref().map(parse_node_id).transpose()?;
            simulate(cfg, SimOpts { epochs, clusters, receivers, seed, admin, state_out, settle })?;
        }
        Cmd::Inspect { state } => inspect(state)?,
    }
    Ok(())
}

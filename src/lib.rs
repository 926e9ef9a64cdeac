//! TRUE_TRUST epoch rewards
//!
//! Per-epoch cluster selection and ticket-based reward distribution:
//! - selection_tree: weighted sum tree with sampling without replacement
//! - selector: per-tree clock, k and memoized per-epoch selections
//! - beacon: commit/reveal randomness for selection seeds
//! - network: reward weights and tree references per network
//! - ledger: ticket math, per-epoch caps, pending balances
//! - engine: the transactional facade (roles, timing, idempotency)
//! - payout: claim settlement with operator commission
//! - config / store: JSON configuration and bincode state snapshots

#![forbid(unsafe_code)]

pub mod beacon;
pub mod config;
pub mod core;
pub mod crypto;
pub mod engine;
pub mod epoch;
pub mod errors;
pub mod ledger;
pub mod network;
pub mod payout;
pub mod roles;
pub mod selection_tree;
pub mod selector;
pub mod staking;
pub mod store;

pub use crate::core::{network_id, Amount, CallContext, ClusterId, NetworkId, NodeId, Role, SelectorId};
pub use config::{NetworkConfig, RewardConfig};
pub use engine::{CoreState, RewardEngine, RewardParams};
pub use epoch::EpochClock;
pub use errors::{Result, RewardError};
pub use ledger::{DEFAULT_TICKET_BUDGET, FEED_PAYOUT_SCALE};
pub use payout::{settle_cluster, Settlement};
pub use selection_tree::SelectionTree;
pub use selector::ClusterSelector;
pub use staking::{
    ClusterRegistry, InMemoryClusters, InMemoryReceiverStaking, InMemoryVault, ReceiverStakeRegistry,
    RewardInfo, TokenVault,
};

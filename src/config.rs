#![forbid(unsafe_code)]

//! JSON configuration for a rewards deployment.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{dec_u256, network_id, Amount, CallContext, NodeId};
use crate::crypto::kmac256_hash;
use crate::engine::{CoreState, RewardEngine, RewardParams};
use crate::epoch::EpochClock;
use crate::errors::{Result, RewardError};
use crate::ledger::DEFAULT_TICKET_BUDGET;
use crate::selector::DEFAULT_CLUSTERS_TO_SELECT;
use crate::staking::{ClusterRegistry, ReceiverStakeRegistry};

pub const DEFAULT_SUBMISSION_GRACE_SECS: u64 = 86_400;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(with = "dec_u256")]
    pub weight: Amount,
    #[serde(default = "default_clusters_to_select")]
    pub clusters_to_select: usize,
}

fn default_clusters_to_select() -> usize {
    DEFAULT_CLUSTERS_TO_SELECT
}

fn default_ticket_budget() -> u64 {
    DEFAULT_TICKET_BUDGET
}

fn default_grace() -> u64 {
    DEFAULT_SUBMISSION_GRACE_SECS
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub start_time: u64,
    pub epoch_length: u64,
    #[serde(default = "default_ticket_budget")]
    pub ticket_budget: u64,
    #[serde(with = "dec_u256")]
    pub total_rewards_per_epoch: Amount,
    #[serde(default = "default_grace")]
    pub submission_grace_secs: u64,
    #[serde(default)]
    pub switchover_time: u64,
    #[serde(default)]
    pub feed_wait_secs: u64,
    pub networks: Vec<NetworkConfig>,
}

impl RewardConfig {
    /// Starter config: two networks, 4h epochs, 1e21 base units per epoch.
    pub fn template(start_time: u64) -> Self {
        Self {
            start_time,
            epoch_length: 4 * 3_600,
            ticket_budget: DEFAULT_TICKET_BUDGET,
            total_rewards_per_epoch: U256::exp10(21),
            submission_grace_secs: DEFAULT_SUBMISSION_GRACE_SECS,
            switchover_time: start_time,
            feed_wait_secs: 3_600,
            networks: vec![
                NetworkConfig { name: "ETH".into(), weight: U256::from(70u8), clusters_to_select: 5 },
                NetworkConfig { name: "DOT".into(), weight: U256::from(30u8), clusters_to_select: 3 },
            ],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let buf = std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        let cfg: Self =
            serde_json::from_slice(&buf).with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let buf = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, buf).with_context(|| format!("write config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |m: &str| Err(RewardError::InvalidConfig(m.to_string()));
        if self.epoch_length == 0 {
            return bad("epoch_length must be > 0");
        }
        if self.ticket_budget == 0 {
            return bad("ticket_budget must be > 0");
        }
        let mut seen = HashSet::new();
        for n in &self.networks {
            if n.name.is_empty() {
                return bad("network name must not be empty");
            }
            if !seen.insert(n.name.as_str()) {
                return Err(RewardError::InvalidConfig(format!("duplicate network {}", n.name)));
            }
            if n.clusters_to_select == 0 {
                return Err(RewardError::InvalidConfig(format!("{}: clusters_to_select must be > 0", n.name)));
            }
        }
        let total = self
            .networks
            .iter()
            .try_fold(U256::zero(), |acc, n| acc.checked_add(n.weight));
        if total.is_none() {
            return bad("network weights overflow");
        }
        Ok(())
    }

    pub fn clock(&self) -> Result<EpochClock> {
        EpochClock::new(self.start_time, self.epoch_length)
    }

    pub fn params(&self) -> RewardParams {
        RewardParams {
            total_rewards_per_epoch: self.total_rewards_per_epoch,
            submission_grace_secs: self.submission_grace_secs,
            switchover_time: self.switchover_time,
            feed_wait_secs: self.feed_wait_secs,
        }
    }

    /// Deploys one selection tree per network and registers the networks,
    /// with `admin` as the only role holder.
    pub fn build_engine<S, C>(&self, admin: NodeId, stakes: S, clusters: C) -> Result<RewardEngine<S, C>>
    where
        S: ReceiverStakeRegistry,
        C: ClusterRegistry,
    {
        self.validate()?;
        let clock = self.clock()?;
        let genesis = kmac256_hash(b"BEACON.genesis.v1", &[&self.start_time.to_le_bytes()]);
        let core = CoreState::new(admin, clock, self.params(), self.ticket_budget, genesis)?;
        let mut engine = RewardEngine::new(core, stakes, clusters);

        let ctx = CallContext::new(admin, self.start_time);
        for n in &self.networks {
            let sel = engine.deploy_selector(&ctx, clock, n.clusters_to_select)?;
            engine.add_network(&ctx, network_id(&n.name), n.weight, sel)?;
        }
        info!(networks = self.networks.len(), epoch_length = self.epoch_length, "engine built from config");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staking::{InMemoryClusters, InMemoryReceiverStaking};

    #[test]
    fn template_round_trips_through_json() {
        let cfg = RewardConfig::template(1_700_000_000);
        let dir = std::env::temp_dir().join(format!("rewardcfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rewards.json");
        cfg.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"1000000000000000000000\""));
        assert_eq!(RewardConfig::load(&path).unwrap(), cfg);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let raw = r#"{
            "start_time": 10,
            "epoch_length": 60,
            "total_rewards_per_epoch": "5000",
            "networks": [{ "name": "ETH", "weight": "1" }]
        }"#;
        let cfg: RewardConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.ticket_budget, DEFAULT_TICKET_BUDGET);
        assert_eq!(cfg.submission_grace_secs, DEFAULT_SUBMISSION_GRACE_SECS);
        assert_eq!(cfg.networks[0].clusters_to_select, DEFAULT_CLUSTERS_TO_SELECT);
        assert_eq!(cfg.total_rewards_per_epoch, U256::from(5_000));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = RewardConfig::template(0);
        cfg.epoch_length = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RewardConfig::template(0);
        cfg.networks[1].name = "ETH".into();
        assert_eq!(cfg.validate(), Err(RewardError::InvalidConfig("duplicate network ETH".into())));

        let mut cfg = RewardConfig::template(0);
        cfg.networks[0].weight = U256::MAX;
        assert!(cfg.validate().is_err());

        let mut cfg = RewardConfig::template(0);
        cfg.networks[0].clusters_to_select = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn build_engine_registers_networks() {
        let cfg = RewardConfig::template(0);
        let admin = [1u8; 32];
        let e = cfg
            .build_engine(admin, InMemoryReceiverStaking::default(), InMemoryClusters::default())
            .unwrap();
        let eth = network_id("ETH");
        let dot = network_id("DOT");
        assert_eq!(e.networks().total_weight(), U256::from(100));
        assert_eq!(e.network_budget(&eth), Ok(U256::exp10(20) * U256::from(7)));
        assert_eq!(e.selector(e.networks().selector_of(&dot).unwrap()).unwrap().clusters_to_select(), 3);
    }
}

#![forbid(unsafe_code)]

//! Bincode snapshot of the engine's core state.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use primitive_types::U256;

use crate::engine::CoreState;

const MAGIC: &[u8; 4] = b"TTRW";
const VERSION: u8 = 2;

pub fn save_state(path: impl AsRef<Path>, state: &CoreState) -> Result<()> {
    let path = path.as_ref();
    let mut buf = Vec::with_capacity(1 << 12);
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend(bincode::serialize(state)?);

    // write then rename so a crash never leaves a torn file
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &buf).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename to {}", path.display()))?;
    Ok(())
}

pub fn load_state(path: impl AsRef<Path>) -> Result<CoreState> {
    let path = path.as_ref();
    let buf = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    ensure!(buf.len() > MAGIC.len() && &buf[..4] == MAGIC, "{} is not a reward state file", path.display());
    ensure!(buf[4] == VERSION, "unsupported state version {}", buf[4]);
    let state: CoreState = bincode::deserialize(&buf[5..]).context("decode reward state")?;
    check_state(&state).with_context(|| format!("{} failed integrity checks", path.display()))?;
    Ok(state)
}

/// Invariants the engine relies on without re-checking; a decoded state that
/// breaks one would panic later instead of returning an error.
fn check_state(state: &CoreState) -> Result<()> {
    ensure!(state.clock.epoch_length() > 0, "epoch length is zero");
    ensure!(state.ledger.ticket_budget() > 0, "ticket budget is zero");
    ensure!(
        state.networks.canonical_clock() == &state.clock,
        "network registry clock differs from the platform clock"
    );
    for (id, sel) in &state.selectors {
        ensure!(*id < state.next_selector, "selection tree {id} is above the id counter");
        ensure!(sel.clusters_to_select() > 0, "selection tree {id} selects no clusters");
        ensure!(sel.tree().verify_sums(), "selection tree {id} is corrupt");
    }

    let mut total = U256::zero();
    for net in state.networks.ids() {
        let Some(info) = state.networks.get(net) else { continue };
        total = total
            .checked_add(info.reward_weight)
            .context("network weights overflow")?;
        if let Some(sel) = info.selector {
            ensure!(state.selectors.contains_key(&sel), "network references missing selection tree {sel}");
        }
    }
    ensure!(total == state.networks.total_weight(), "network weight total is stale");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{network_id, CallContext};
    use crate::engine::{RewardEngine, RewardParams};
    use crate::epoch::EpochClock;
    use crate::ledger::DEFAULT_TICKET_BUDGET;
    use crate::staking::{InMemoryClusters, InMemoryReceiverStaking};
    use crate::selection_tree::SelectionTree;

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tt-rewards-{}-{}", std::process::id(), name))
    }

    #[test]
    fn state_survives_restart() {
        let admin = [9u8; 32];
        let clock = EpochClock::new(0, 60).unwrap();
        let params = RewardParams {
            total_rewards_per_epoch: U256::from(600u64),
            submission_grace_secs: 10,
            switchover_time: 0,
            feed_wait_secs: 0,
        };
        let core = CoreState::new(admin, clock, params, DEFAULT_TICKET_BUDGET, [1u8; 32]).unwrap();
        let mut e = RewardEngine::new(core, InMemoryReceiverStaking::default(), InMemoryClusters::default());
        let ctx = CallContext::new(admin, 61);
        let net = network_id("ETH");
        let sel = e.deploy_selector(&ctx, clock, 2).unwrap();
        e.add_network(&ctx, net, U256::one(), sel).unwrap();
        e.grant_role(&ctx, crate::core::Role::Feeder, admin).unwrap();
        e.feed(&ctx, net, 0, &[[4u8; 32]], &[U256::exp10(18)]).unwrap();

        let path = tmp("state.bin");
        save_state(&path, e.state()).unwrap();
        let back = load_state(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let restored = RewardEngine::new(back, InMemoryReceiverStaking::default(), InMemoryClusters::default());
        assert_eq!(restored.pending_reward(&[4u8; 32]), U256::from(600u64));
        assert_eq!(restored.network_budget(&net), Ok(U256::from(600u64)));
        assert!(restored.has_role(crate::core::Role::Feeder, &admin));
    }

    fn one_tree_state() -> CoreState {
        let admin = [9u8; 32];
        let clock = EpochClock::new(0, 60).unwrap();
        let params = RewardParams {
            total_rewards_per_epoch: U256::from(600u64),
            submission_grace_secs: 10,
            switchover_time: 0,
            feed_wait_secs: 0,
        };
        let core = CoreState::new(admin, clock, params, DEFAULT_TICKET_BUDGET, [1u8; 32]).unwrap();
        let mut e = RewardEngine::new(core, InMemoryReceiverStaking::default(), InMemoryClusters::default());
        let ctx = CallContext::new(admin, 1);
        let net = network_id("ETH");
        let sel = e.deploy_selector(&ctx, clock, 2).unwrap();
        e.add_network(&ctx, net, U256::one(), sel).unwrap();
        e.grant_role(&ctx, crate::core::Role::Updater, admin).unwrap();
        for c in 1..=3u8 {
            e.clusters_mut().register([c; 32], 0, [c; 32], net).unwrap();
            e.upsert_cluster_weight(&ctx, [c; 32], U256::from(10)).unwrap();
        }
        e.into_parts().0
    }

    #[test]
    fn corrupt_tree_is_rejected() {
        let path = tmp("skewed.bin");
        let mut state = one_tree_state();
        state.selectors.get_mut(&0).unwrap().tree_mut().skew_left_sum(1, U256::from(5));
        save_state(&path, &state).unwrap();
        let err = load_state(&path).unwrap_err();
        assert!(format!("{err:#}").contains("selection tree 0 is corrupt"));

        let mut state = one_tree_state();
        *state.selectors.get_mut(&0).unwrap().tree_mut() = bincode::deserialize::<SelectionTree>(&[0u8; 16]).unwrap();
        save_state(&path, &state).unwrap();
        assert!(load_state(&path).is_err());

        save_state(&path, &one_tree_state()).unwrap();
        let ok = load_state(&path).unwrap();
        assert_eq!(ok.selectors[&0].tree().total_weight(), U256::from(30));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn dangling_network_tree_is_rejected() {
        let path = tmp("dangling.bin");
        let mut state = one_tree_state();
        state.selectors.clear();
        save_state(&path, &state).unwrap();
        let err = load_state(&path).unwrap_err();
        assert!(format!("{err:#}").contains("missing selection tree 0"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn garbage_is_rejected() {
        let path = tmp("garbage.bin");
        std::fs::write(&path, b"not a state").unwrap();
        assert!(load_state(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}

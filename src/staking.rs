#![forbid(unsafe_code)]

//! Collaborators outside the rewards core, plus in-memory implementations
//! used by the simulator and the tests.
//!
//! - [`ClusterRegistry`]: commission, payout address and network of a cluster.
//! - [`ReceiverStakeRegistry`]: epoch-scoped receiver stake, looked up by signer.
//! - [`TokenVault`]: custody of the reward token.

use std::collections::{BTreeMap, HashMap};

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::core::{Amount, ClusterId, NetworkId, NodeId};
use crate::errors::{Result, RewardError};

/* ===== cluster registry ===== */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardInfo {
    /// 0..=100
    pub commission_percent: u8,
    pub payout_address: NodeId,
}

pub trait ClusterRegistry {
    fn reward_info(&self, cluster: &ClusterId) -> Option<RewardInfo>;
    fn network_of(&self, cluster: &ClusterId) -> Option<NetworkId>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InMemoryClusters {
    clusters: HashMap<ClusterId, (RewardInfo, NetworkId)>,
}

impl InMemoryClusters {
    pub fn register(
        &mut self,
        cluster: ClusterId,
        commission_percent: u8,
        payout_address: NodeId,
        network: NetworkId,
    ) -> Result<()> {
        if commission_percent > 100 {
            return Err(RewardError::InvalidCommission(commission_percent));
        }
        self.clusters.insert(
            cluster,
            (RewardInfo { commission_percent, payout_address }, network),
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl ClusterRegistry for InMemoryClusters {
    fn reward_info(&self, cluster: &ClusterId) -> Option<RewardInfo> {
        self.clusters.get(cluster).map(|(info, _)| *info)
    }

    fn network_of(&self, cluster: &ClusterId) -> Option<NetworkId> {
        self.clusters.get(cluster).map(|(_, net)| *net)
    }
}

/* ===== receiver staking ===== */

pub trait ReceiverStakeRegistry {
    /// Stake of the receiver that `signer` acted for *at* `epoch`, and that receiver.
    fn stake_of_signer_at(&self, signer: &NodeId, epoch: u64) -> (Amount, Option<NodeId>);

    /// Total receiver stake at `epoch`, and the first epoch whose stake snapshot
    /// is not final yet (tickets for it and later epochs are premature).
    fn total_stake_and_next_epoch_at(&self, epoch: u64) -> (Amount, u64);
}

/// Receiver stake history as epoch checkpoints: a value set at epoch `e`
/// holds for every later epoch until the next checkpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InMemoryReceiverStaking {
    stakes: HashMap<NodeId, BTreeMap<u64, Amount>>,
    signers: HashMap<NodeId, BTreeMap<u64, Option<NodeId>>>,
    next_epoch: u64,
}

impl InMemoryReceiverStaking {
    fn at<T: Clone>(history: &BTreeMap<u64, T>, epoch: u64) -> Option<T> {
        history.range(..=epoch).next_back().map(|(_, v)| v.clone())
    }

    fn total_at(&self, epoch: u64) -> Amount {
        self.stakes
            .values()
            .filter_map(|h| Self::at(h, epoch))
            .fold(U256::zero(), |acc, s| acc.saturating_add(s))
    }

    /// Sets `receiver`'s stake from `epoch` on.
    pub fn set_stake(&mut self, receiver: NodeId, epoch: u64, stake: Amount) {
        self.stakes.entry(receiver).or_default().insert(epoch, stake);
    }

    /// Binds `signer` to `receiver` from `epoch` on. Any other signer of
    /// `receiver` is unbound from the same epoch, so a receiver has at most
    /// one signer per epoch.
    pub fn set_signer(&mut self, signer: NodeId, receiver: NodeId, epoch: u64) {
        for (other, history) in self.signers.iter_mut() {
            if *other == signer {
                continue;
            }
            history.retain(|e, r| *e <= epoch || *r != Some(receiver));
            if Self::at(history, epoch).flatten() == Some(receiver) {
                history.insert(epoch, None);
            }
        }
        self.signers.entry(signer).or_default().insert(epoch, Some(receiver));
    }

    /// Unbinds `signer` from `epoch` on (key rotation).
    pub fn clear_signer(&mut self, signer: NodeId, epoch: u64) {
        self.signers.entry(signer).or_default().insert(epoch, None);
    }

    /// Stake snapshots of every epoch before `epoch` are final.
    pub fn set_next_epoch(&mut self, epoch: u64) {
        self.next_epoch = epoch;
    }
}

impl ReceiverStakeRegistry for InMemoryReceiverStaking {
    fn stake_of_signer_at(&self, signer: &NodeId, epoch: u64) -> (Amount, Option<NodeId>) {
        let receiver = self.signers.get(signer).and_then(|h| Self::at(h, epoch)).flatten();
        match receiver {
            Some(r) => {
                let stake = self.stakes.get(&r).and_then(|h| Self::at(h, epoch)).unwrap_or_default();
                (stake, Some(r))
            }
            None => (U256::zero(), None),
        }
    }

    fn total_stake_and_next_epoch_at(&self, epoch: u64) -> (Amount, u64) {
        (self.total_at(epoch), self.next_epoch)
    }
}

/* ===== token vault ===== */

pub trait TokenVault {
    fn balance_available(&self) -> Amount;
    /// Expected to succeed whenever `balance_available` covers `amount`.
    /// A failed payment must not move any funds.
    fn pay(&mut self, amount: Amount, to: &NodeId) -> Result<()>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InMemoryVault {
    available: Amount,
    paid: HashMap<NodeId, Amount>,
}

impl InMemoryVault {
    pub fn funded(available: Amount) -> Self {
        Self { available, paid: HashMap::new() }
    }

    pub fn paid_to(&self, who: &NodeId) -> Amount {
        self.paid.get(who).copied().unwrap_or_default()
    }
}

impl TokenVault for InMemoryVault {
    fn balance_available(&self) -> Amount {
        self.available
    }

    fn pay(&mut self, amount: Amount, to: &NodeId) -> Result<()> {
        if amount > self.available {
            return Err(RewardError::InsufficientFunds);
        }
        self.available -= amount;
        *self.paid.entry(*to).or_default() += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> NodeId {
        [n; 32]
    }

    #[test]
    fn stake_lookup_is_epoch_scoped() {
        let mut s = InMemoryReceiverStaking::default();
        s.set_stake(id(1), 0, U256::from(100));
        s.set_signer(id(10), id(1), 0);
        s.set_stake(id(1), 5, U256::from(40));
        s.set_stake(id(2), 3, U256::from(60));

        assert_eq!(s.stake_of_signer_at(&id(10), 4), (U256::from(100), Some(id(1))));
        assert_eq!(s.stake_of_signer_at(&id(10), 5), (U256::from(40), Some(id(1))));
        assert_eq!(s.total_stake_and_next_epoch_at(2).0, U256::from(100));
        assert_eq!(s.total_stake_and_next_epoch_at(4).0, U256::from(160));
        assert_eq!(s.total_stake_and_next_epoch_at(5).0, U256::from(100));
    }

    #[test]
    fn rotated_signer_only_valid_in_its_epochs() {
        let mut s = InMemoryReceiverStaking::default();
        s.set_stake(id(1), 0, U256::from(10));
        s.set_signer(id(10), id(1), 0);
        s.clear_signer(id(10), 3);
        s.set_signer(id(11), id(1), 3);

        assert_eq!(s.stake_of_signer_at(&id(10), 2).1, Some(id(1)));
        assert_eq!(s.stake_of_signer_at(&id(10), 3), (U256::zero(), None));
        assert_eq!(s.stake_of_signer_at(&id(11), 2), (U256::zero(), None));
        assert_eq!(s.stake_of_signer_at(&id(11), 3).1, Some(id(1)));
    }

    #[test]
    fn rebinding_a_receiver_unbinds_its_old_signer() {
        let mut s = InMemoryReceiverStaking::default();
        s.set_stake(id(1), 0, U256::from(10));
        s.set_stake(id(2), 0, U256::from(10));
        s.set_signer(id(10), id(1), 0);
        s.set_signer(id(12), id(2), 0);
        s.set_signer(id(11), id(1), 4);

        assert_eq!(s.stake_of_signer_at(&id(10), 3).1, Some(id(1)));
        assert_eq!(s.stake_of_signer_at(&id(10), 4), (U256::zero(), None));
        assert_eq!(s.stake_of_signer_at(&id(11), 4).1, Some(id(1)));
        // other receivers keep their signers
        assert_eq!(s.stake_of_signer_at(&id(12), 4).1, Some(id(2)));

        // same epoch: the later binding wins
        s.set_signer(id(13), id(2), 0);
        assert_eq!(s.stake_of_signer_at(&id(12), 0), (U256::zero(), None));
        assert_eq!(s.stake_of_signer_at(&id(13), 0).1, Some(id(2)));
    }

    #[test]
    fn vault_pays_until_empty() {
        let mut v = InMemoryVault::funded(U256::from(10));
        v.pay(U256::from(4), &id(1)).unwrap();
        assert_eq!(v.pay(U256::from(7), &id(2)), Err(RewardError::InsufficientFunds));
        assert_eq!(v.balance_available(), U256::from(6));
        assert_eq!(v.paid_to(&id(1)), U256::from(4));
    }

    #[test]
    fn commission_bounds() {
        let mut c = InMemoryClusters::default();
        assert_eq!(
            c.register(id(1), 101, id(2), id(3)),
            Err(RewardError::InvalidCommission(101))
        );
        c.register(id(1), 10, id(2), id(3)).unwrap();
        assert_eq!(c.network_of(&id(1)), Some(id(3)));
        assert_eq!(c.reward_info(&id(1)).unwrap().commission_percent, 10);
    }
}

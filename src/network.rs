#![forbid(unsafe_code)]

//! Network registry: reward weight and selection tree per network.
//!
//! A network's share of the global per-epoch budget is
//! `weight / Σ weights` over all registered networks.

use std::collections::BTreeMap;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::core::{mul_div, Amount, NetworkId, SelectorId};
use crate::epoch::EpochClock;
use crate::errors::{Result, RewardError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub reward_weight: Amount,
    /// `None` once removed.
    pub selector: Option<SelectorId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkRegistry {
    canonical: EpochClock,
    networks: BTreeMap<NetworkId, NetworkInfo>,
    total_weight: Amount,
}

impl NetworkRegistry {
    pub fn new(canonical: EpochClock) -> Self {
        Self {
            canonical,
            networks: BTreeMap::new(),
            total_weight: U256::zero(),
        }
    }

    #[inline]
    pub fn canonical_clock(&self) -> &EpochClock {
        &self.canonical
    }

    /// `selector_clock` is `None` when the reference does not resolve.
    fn check_tree(&self, selector: SelectorId, selector_clock: Option<&EpochClock>) -> Result<()> {
        match selector_clock {
            None => Err(RewardError::UnknownSelector(selector)),
            Some(c) if *c != self.canonical => Err(RewardError::TreeInconsistent),
            Some(_) => Ok(()),
        }
    }

    /// A tree memoizes one selection per epoch, so it can back one network only.
    fn check_unshared(&self, id: &NetworkId, selector: SelectorId) -> Result<()> {
        let shared = self
            .networks
            .iter()
            .any(|(other, info)| other != id && info.selector == Some(selector));
        if shared {
            return Err(RewardError::SelectorInUse(selector));
        }
        Ok(())
    }

    pub fn add_network(
        &mut self,
        id: NetworkId,
        weight: Amount,
        selector: SelectorId,
        selector_clock: Option<&EpochClock>,
    ) -> Result<()> {
        if self.networks.contains_key(&id) {
            return Err(RewardError::NetworkExists);
        }
        self.check_tree(selector, selector_clock)?;
        self.check_unshared(&id, selector)?;
        let total = self
            .total_weight
            .checked_add(weight)
            .ok_or(RewardError::ArithmeticOverflow)?;

        self.networks.insert(id, NetworkInfo { reward_weight: weight, selector: Some(selector) });
        self.total_weight = total;
        Ok(())
    }

    pub fn update_network(
        &mut self,
        id: &NetworkId,
        weight: Amount,
        selector: SelectorId,
        selector_clock: Option<&EpochClock>,
    ) -> Result<()> {
        let old = self
            .networks
            .get(id)
            .ok_or(RewardError::UnknownNetwork)?
            .reward_weight;
        self.check_tree(selector, selector_clock)?;
        self.check_unshared(id, selector)?;
        let total = (self.total_weight - old)
            .checked_add(weight)
            .ok_or(RewardError::ArithmeticOverflow)?;

        if let Some(info) = self.networks.get_mut(id) {
            info.reward_weight = weight;
            info.selector = Some(selector);
        }
        self.total_weight = total;
        Ok(())
    }

    /// Zeroes the weight and drops the tree reference; the record stays so
    /// historical credits remain attributable.
    pub fn remove_network(&mut self, id: &NetworkId) -> Result<()> {
        let info = self.networks.get_mut(id).ok_or(RewardError::UnknownNetwork)?;
        self.total_weight -= info.reward_weight;
        info.reward_weight = U256::zero();
        info.selector = None;
        Ok(())
    }

    pub fn get(&self, id: &NetworkId) -> Option<&NetworkInfo> {
        self.networks.get(id)
    }

    /// Selector of an active network.
    pub fn selector_of(&self, id: &NetworkId) -> Result<SelectorId> {
        self.networks
            .get(id)
            .ok_or(RewardError::UnknownNetwork)?
            .selector
            .ok_or(RewardError::NetworkInactive)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NetworkId> {
        self.networks.keys()
    }

    #[inline]
    pub fn total_weight(&self) -> Amount {
        self.total_weight
    }

    /// `total_rewards_per_epoch * weight / total_weight`, zero when nothing is weighted.
    pub fn network_budget(&self, id: &NetworkId, total_rewards_per_epoch: Amount) -> Result<Amount> {
        let info = self.networks.get(id).ok_or(RewardError::UnknownNetwork)?;
        if self.total_weight.is_zero() {
            return Ok(U256::zero());
        }
        mul_div(total_rewards_per_epoch, info.reward_weight, self.total_weight)
            .ok_or(RewardError::ArithmeticOverflow)
    }
}

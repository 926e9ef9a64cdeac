#![forbid(unsafe_code)]

//! Cluster selector: one selection tree, its clock, the number of clusters to
//! pick per epoch, and the memoized per-epoch selections.
//!
//! Selections are write-once. Reading an epoch that was never selected falls
//! back to the most recent earlier non-empty selection, so a network whose
//! selection was not triggered in some epoch keeps paying the previous set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{Amount, ClusterId};
use crate::epoch::EpochClock;
use crate::errors::{Result, RewardError};
use crate::selection_tree::SelectionTree;

pub const DEFAULT_CLUSTERS_TO_SELECT: usize = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterSelector {
    clock: EpochClock,
    clusters_to_select: usize,
    tree: SelectionTree,
    selections: BTreeMap<u64, Vec<ClusterId>>,
}

impl ClusterSelector {
    pub fn new(clock: EpochClock, clusters_to_select: usize) -> Result<Self> {
        if clusters_to_select == 0 {
            return Err(RewardError::InvalidConfig("clusters_to_select must be > 0".into()));
        }
        Ok(Self {
            clock,
            clusters_to_select,
            tree: SelectionTree::new(),
            selections: BTreeMap::new(),
        })
    }

    #[inline]
    pub fn clock(&self) -> &EpochClock {
        &self.clock
    }

    #[inline]
    pub fn clusters_to_select(&self) -> usize {
        self.clusters_to_select
    }

    /// Applies from the next selection on; memoized epochs keep their size.
    pub fn set_clusters_to_select(&mut self, k: usize) -> Result<()> {
        if k == 0 {
            return Err(RewardError::InvalidConfig("clusters_to_select must be > 0".into()));
        }
        self.clusters_to_select = k;
        Ok(())
    }

    #[inline]
    pub fn tree(&self) -> &SelectionTree {
        &self.tree
    }

    #[cfg(test)]
    pub(crate) fn tree_mut(&mut self) -> &mut SelectionTree {
        &mut self.tree
    }

    /* ===== weight updates (delegation layer callback) ===== */

    pub fn insert(&mut self, id: ClusterId, weight: Amount) -> Result<()> {
        self.tree.insert(id, weight)
    }

    pub fn update(&mut self, id: &ClusterId, weight: Amount) -> Result<()> {
        self.tree.update(id, weight)
    }

    pub fn upsert(&mut self, id: ClusterId, weight: Amount) -> Result<()> {
        self.tree.upsert(id, weight)
    }

    pub fn upsert_many(&mut self, entries: &[(ClusterId, Amount)]) -> Result<()> {
        self.tree.upsert_many(entries)
    }

    pub fn remove(&mut self, id: &ClusterId) -> Result<()> {
        self.tree.remove(id)
    }

    pub fn remove_if_present(&mut self, id: &ClusterId) -> Result<bool> {
        self.tree.remove_if_present(id)
    }

    /* ===== selection ===== */

    /// Memoized selection for `epoch`.
    ///
    /// Only the running epoch and the next one can be selected. A second call
    /// for an already selected epoch returns the stored result without drawing.
    pub fn select(&mut self, epoch: u64, now: u64, seed: &[u8; 32]) -> Result<Vec<ClusterId>> {
        if let Some(done) = self.selections.get(&epoch) {
            return Ok(done.clone());
        }
        let current = self.clock.current_epoch(now);
        if epoch != current && epoch != current + 1 {
            return Err(RewardError::EpochNotSelectable { epoch });
        }

        let picked = self.tree.select_top_k(self.clusters_to_select, seed);
        self.selections.insert(epoch, picked.clone());
        Ok(picked)
    }

    /// Memoized selections in epoch order.
    pub fn selections(&self) -> impl Iterator<Item = (u64, &[ClusterId])> {
        self.selections.iter().map(|(e, v)| (*e, v.as_slice()))
    }

    #[inline]
    pub fn is_selected(&self, epoch: u64) -> bool {
        self.selections.contains_key(&epoch)
    }

    /// Selection that applies to `epoch` (exact or carried forward).
    pub fn selected_at(&self, epoch: u64, now: u64) -> Result<Vec<ClusterId>> {
        let current = self.clock.current_epoch(now);
        if epoch > current + 1 {
            return Err(RewardError::FutureEpoch { epoch, current });
        }
        Ok(self.effective_selection(epoch).to_vec())
    }

    /// Exact selection for `epoch` if non-empty, else the latest earlier one.
    pub(crate) fn effective_selection(&self, epoch: u64) -> &[ClusterId] {
        self.selections
            .range(..=epoch)
            .rev()
            .find(|(_, v)| !v.is_empty())
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }
}

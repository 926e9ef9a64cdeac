#![forbid(unsafe_code)]

//! Ticket ledger: once-per-epoch receiver attestations turned into pending
//! cluster rewards.
//!
//! Submissions are staged in a [`LedgerDraft`] and validated against the
//! ledger plus everything staged before them; only a fully valid draft is
//! applied. A rejected call therefore never burns the signer's one-shot
//! submission for that epoch.

use std::collections::{HashMap, HashSet};

use primitive_types::{U256, U512};
use serde::{Deserialize, Serialize};

use crate::core::{Amount, ClusterId, NetworkId, NodeId};
use crate::errors::{Result, RewardError};

/// 2^16 tickets per receiver per epoch.
pub const DEFAULT_TICKET_BUDGET: u64 = 1 << 16;

/// Feed payouts are fractions of the network budget scaled by 1e18.
pub const FEED_PAYOUT_SCALE: u64 = 1_000_000_000_000_000_000;

pub type IssueKey = (NetworkId, u64, NodeId);
pub type EpochKey = (NetworkId, u64);

/// A one-shot ticket submission: the signing key and the receiver it acts for.
/// Both are recorded, so a rotated key cannot resubmit for the same receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submitter {
    pub signer: NodeId,
    pub receiver: NodeId,
}

/// Effects of one call, not yet applied.
#[derive(Debug, Default)]
pub struct LedgerDraft {
    issued: Vec<IssueKey>,
    receivers: Vec<IssueKey>,
    distributed: HashMap<EpochKey, Amount>,
    credits: Vec<(ClusterId, Amount)>,
}

impl LedgerDraft {
    pub fn credits(&self) -> &[(ClusterId, Amount)] {
        &self.credits
    }

    pub fn total_credited(&self) -> Amount {
        self.credits.iter().fold(U256::zero(), |acc, (_, r)| acc.saturating_add(*r))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketLedger {
    ticket_budget: u64,
    issued: HashSet<IssueKey>,
    /// (network, epoch, receiver) of every submission
    receivers: HashSet<IssueKey>,
    distributed: HashMap<EpochKey, Amount>,
    pending: HashMap<ClusterId, Amount>,
    /// network -> (latest fed epoch, when it was fed)
    last_feed: HashMap<NetworkId, (u64, u64)>,
}

impl TicketLedger {
    pub fn new(ticket_budget: u64) -> Result<Self> {
        if ticket_budget == 0 {
            return Err(RewardError::InvalidConfig("ticket_budget must be > 0".into()));
        }
        Ok(Self {
            ticket_budget,
            issued: HashSet::new(),
            receivers: HashSet::new(),
            distributed: HashMap::new(),
            pending: HashMap::new(),
            last_feed: HashMap::new(),
        })
    }

    #[inline]
    pub fn ticket_budget(&self) -> u64 {
        self.ticket_budget
    }

    pub fn is_issued(&self, network: &NetworkId, epoch: u64, signer: &NodeId) -> bool {
        self.issued.contains(&(*network, epoch, *signer))
    }

    pub fn distributed(&self, network: &NetworkId, epoch: u64) -> Amount {
        self.distributed.get(&(*network, epoch)).copied().unwrap_or_default()
    }

    pub fn pending(&self, cluster: &ClusterId) -> Amount {
        self.pending.get(cluster).copied().unwrap_or_default()
    }

    pub fn pending_balances(&self) -> impl Iterator<Item = (&ClusterId, &Amount)> {
        self.pending.iter()
    }

    pub fn last_feed(&self, network: &NetworkId) -> Option<(u64, u64)> {
        self.last_feed.get(network).copied()
    }

    /* ===== staging ===== */

    pub fn is_issued_with(&self, draft: &LedgerDraft, key: &IssueKey) -> bool {
        self.issued.contains(key) || draft.issued.contains(key)
    }

    fn receiver_issued_with(&self, draft: &LedgerDraft, key: &IssueKey) -> bool {
        self.receivers.contains(key) || draft.receivers.contains(key)
    }

    fn distributed_with(&self, draft: &LedgerDraft, key: &EpochKey) -> Amount {
        draft
            .distributed
            .get(key)
            .copied()
            .unwrap_or_else(|| self.distributed(&key.0, key.1))
    }

    /// Converts a ticket split into per-cluster rewards.
    ///
    /// `reward_i = shares_i * budget * receiver_stake / (ticket_budget * total_stake)`,
    /// truncating. `shares` may be shorter than `selected` (implicit zeros).
    pub fn ticket_rewards(
        &self,
        selected: &[ClusterId],
        shares: &[u32],
        network_budget: Amount,
        receiver_stake: Amount,
        total_stake: Amount,
    ) -> Result<Vec<(ClusterId, Amount)>> {
        if shares.len() > selected.len() {
            return Err(RewardError::TicketLengthMismatch {
                got: shares.len(),
                selected: selected.len(),
            });
        }
        let sum: u64 = shares.iter().map(|s| u64::from(*s)).sum();
        if sum != self.ticket_budget {
            return Err(RewardError::TicketCountInvalid { got: sum, expected: self.ticket_budget });
        }
        if receiver_stake.is_zero() || total_stake.is_zero() || receiver_stake > total_stake {
            return Err(RewardError::NoReceiverStake);
        }

        // budget * stake = q * total + r, so that
        // floor(share * budget * stake / (total * T)) = floor((q * share + r * share / total) / T)
        // with every product below 2^512
        let total = U512::from(total_stake);
        let product: U512 = network_budget.full_mul(receiver_stake);
        let (q, r) = (product / total, product % total);
        let tickets = U512::from(self.ticket_budget);

        let mut out = Vec::with_capacity(shares.len());
        for (cluster, share) in selected.iter().zip(shares) {
            if *share == 0 {
                continue;
            }
            let s = U512::from(*share);
            let scaled = q * s + (r * s) / total;
            let reward = U256::try_from(scaled / tickets).map_err(|_| RewardError::ArithmeticOverflow)?;
            if !reward.is_zero() {
                out.push((*cluster, reward));
            }
        }
        Ok(out)
    }

    /// Feed rewards: `network_budget * payout / 1e18` per cluster.
    pub fn feed_rewards(
        clusters: &[ClusterId],
        payouts: &[Amount],
        network_budget: Amount,
    ) -> Result<Vec<(ClusterId, Amount)>> {
        if clusters.len() != payouts.len() {
            return Err(RewardError::InvalidInput("clusters and payouts differ in length"));
        }
        let scale = U256::from(FEED_PAYOUT_SCALE);
        let mut out = Vec::with_capacity(clusters.len());
        for (cluster, payout) in clusters.iter().zip(payouts) {
            let reward = crate::core::mul_div(network_budget, *payout, scale)
                .ok_or(RewardError::ArithmeticOverflow)?;
            if !reward.is_zero() {
                out.push((*cluster, reward));
            }
        }
        Ok(out)
    }

    /// Stages `credits` for `(network, epoch)`, enforcing the per-epoch cap.
    /// `issue` marks a one-shot ticket submission (None for feeds).
    pub fn stage(
        &self,
        draft: &mut LedgerDraft,
        network: NetworkId,
        epoch: u64,
        issue: Option<Submitter>,
        credits: Vec<(ClusterId, Amount)>,
        network_budget: Amount,
    ) -> Result<()> {
        if let Some(who) = issue {
            if self.is_issued_with(draft, &(network, epoch, who.signer))
                || self.receiver_issued_with(draft, &(network, epoch, who.receiver))
            {
                return Err(RewardError::AlreadyIssued { epoch });
            }
        }

        let added = credits
            .iter()
            .try_fold(U256::zero(), |acc, (_, r)| acc.checked_add(*r))
            .ok_or(RewardError::ArithmeticOverflow)?;
        let ekey = (network, epoch);
        let after = self
            .distributed_with(draft, &ekey)
            .checked_add(added)
            .ok_or(RewardError::ArithmeticOverflow)?;
        if after > network_budget {
            return Err(RewardError::EpochBudgetExceeded);
        }

        if let Some(who) = issue {
            draft.issued.push((network, epoch, who.signer));
            draft.receivers.push((network, epoch, who.receiver));
        }
        draft.distributed.insert(ekey, after);
        draft.credits.extend(credits);
        Ok(())
    }

    /// Applies a fully validated draft.
    pub fn apply(&mut self, draft: LedgerDraft) {
        self.issued.extend(draft.issued);
        self.receivers.extend(draft.receivers);
        self.distributed.extend(draft.distributed);
        for (cluster, reward) in draft.credits {
            // bounded by the epoch budgets, which are U256 themselves
            let slot = self.pending.entry(cluster).or_default();
            *slot = slot.saturating_add(reward);
        }
    }

    pub fn note_feed(&mut self, network: NetworkId, epoch: u64, at: u64) {
        let e = self.last_feed.entry(network).or_insert((epoch, at));
        if epoch >= e.0 {
            *e = (epoch, at);
        }
    }

    /// Drains the pending balance of `cluster`.
    pub fn claim(&mut self, cluster: &ClusterId) -> Amount {
        self.pending.remove(cluster).unwrap_or_default()
    }

    /// Puts back a claimed amount that could not be paid out.
    pub fn restore(&mut self, cluster: ClusterId, amount: Amount) {
        if amount.is_zero() {
            return;
        }
        let slot = self.pending.entry(cluster).or_default();
        *slot = slot.saturating_add(amount);
    }
}

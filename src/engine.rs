#![forbid(unsafe_code)]

//! Reward engine: the transactional surface over trees, networks, beacon and
//! ticket ledger.
//!
//! Every `&mut self` call validates completely before it touches state, so an
//! `Err` always means "nothing happened". Calls are expected to be serialized
//! by the host (one at a time, in commit order).
//!
//! Lifecycle of a `(network, epoch)` pair:
//! unselected → selected (memoized) → tickets open (epoch elapsed) → closed
//! (submission window over).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::beacon::EpochBeacon;
use crate::core::{short_hex, Amount, CallContext, ClusterId, NetworkId, NodeId, Role, SelectorId};
use crate::epoch::EpochClock;
use crate::errors::{Result, RewardError};
use crate::ledger::{LedgerDraft, Submitter, TicketLedger};
use crate::network::NetworkRegistry;
use crate::roles::Roles;
use crate::selector::ClusterSelector;
use crate::staking::{ClusterRegistry, ReceiverStakeRegistry};

/// Admin-tunable economics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardParams {
    /// Global budget per epoch, split across networks by weight.
    pub total_rewards_per_epoch: Amount,
    /// How long after the window anchor tickets are still accepted.
    pub submission_grace_secs: u64,
    /// Platform switchover reference time (window anchor floor).
    pub switchover_time: u64,
    /// Minimum spacing between feeds of successive epochs.
    pub feed_wait_secs: u64,
}

/// Everything the core owns. Serialized as a unit by `store`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreState {
    pub params: RewardParams,
    pub clock: EpochClock,
    pub roles: Roles,
    pub networks: NetworkRegistry,
    pub selectors: BTreeMap<SelectorId, ClusterSelector>,
    pub next_selector: SelectorId,
    pub beacon: EpochBeacon,
    pub ledger: TicketLedger,
}

impl CoreState {
    pub fn new(
        admin: NodeId,
        clock: EpochClock,
        params: RewardParams,
        ticket_budget: u64,
        genesis_beacon: [u8; 32],
    ) -> Result<Self> {
        Ok(Self {
            params,
            clock,
            roles: Roles::with_admin(admin),
            networks: NetworkRegistry::new(clock),
            selectors: BTreeMap::new(),
            next_selector: 0,
            beacon: EpochBeacon::new(genesis_beacon),
            ledger: TicketLedger::new(ticket_budget)?,
        })
    }
}

pub struct RewardEngine<S, C> {
    core: CoreState,
    stakes: S,
    clusters: C,
}

impl<S: ReceiverStakeRegistry, C: ClusterRegistry> RewardEngine<S, C> {
    pub fn new(core: CoreState, stakes: S, clusters: C) -> Self {
        Self { core, stakes, clusters }
    }

    pub fn into_parts(self) -> (CoreState, S, C) {
        (self.core, self.stakes, self.clusters)
    }

    /* ===== accessors ===== */

    #[inline]
    pub fn state(&self) -> &CoreState {
        &self.core
    }

    #[inline]
    pub fn clock(&self) -> &EpochClock {
        &self.core.clock
    }

    #[inline]
    pub fn params(&self) -> &RewardParams {
        &self.core.params
    }

    pub fn stakes(&self) -> &S {
        &self.stakes
    }

    pub fn stakes_mut(&mut self) -> &mut S {
        &mut self.stakes
    }

    pub fn clusters(&self) -> &C {
        &self.clusters
    }

    pub fn clusters_mut(&mut self) -> &mut C {
        &mut self.clusters
    }

    pub fn selector(&self, id: SelectorId) -> Option<&ClusterSelector> {
        self.core.selectors.get(&id)
    }

    pub fn networks(&self) -> &NetworkRegistry {
        &self.core.networks
    }

    pub fn ledger(&self) -> &TicketLedger {
        &self.core.ledger
    }

    pub fn beacon(&self) -> &EpochBeacon {
        &self.core.beacon
    }

    #[inline]
    pub fn current_epoch(&self, now: u64) -> u64 {
        self.core.clock.current_epoch(now)
    }

    pub fn pending_reward(&self, cluster: &ClusterId) -> Amount {
        self.core.ledger.pending(cluster)
    }

    pub fn is_ticket_issued(&self, network: &NetworkId, epoch: u64, signer: &NodeId) -> bool {
        self.core.ledger.is_issued(network, epoch, signer)
    }

    pub fn distributed_in_epoch(&self, network: &NetworkId, epoch: u64) -> Amount {
        self.core.ledger.distributed(network, epoch)
    }

    /// Current per-epoch budget of `network`.
    pub fn network_budget(&self, network: &NetworkId) -> Result<Amount> {
        self.core
            .networks
            .network_budget(network, self.core.params.total_rewards_per_epoch)
    }

    /// Last second at which tickets for `epoch` are accepted.
    pub fn ticket_deadline(&self, epoch: u64) -> u64 {
        let clock = &self.core.clock;
        let anchor = clock
            .epoch_end(epoch)
            .max(self.core.params.switchover_time.saturating_add(clock.epoch_length()));
        anchor.saturating_add(self.core.params.submission_grace_secs)
    }

    /* ===== administration ===== */

    fn admin(&self, ctx: &CallContext) -> Result<()> {
        self.core.roles.require(Role::Admin, &ctx.sender)
    }

    /// Creates a new selection tree. Any clock is accepted here; a tree whose
    /// clock differs from the platform clock just cannot back a network.
    pub fn deploy_selector(&mut self, ctx: &CallContext, clock: EpochClock, clusters_to_select: usize) -> Result<SelectorId> {
        self.admin(ctx)?;
        let selector = ClusterSelector::new(clock, clusters_to_select)?;
        let id = self.core.next_selector;
        let next = id.checked_add(1).ok_or(RewardError::ArithmeticOverflow)?;
        self.core.selectors.insert(id, selector);
        self.core.next_selector = next;
        info!(selector = id, k = clusters_to_select, "selection tree deployed");
        Ok(id)
    }

    pub fn set_clusters_to_select(&mut self, ctx: &CallContext, selector: SelectorId, k: usize) -> Result<()> {
        self.admin(ctx)?;
        self.core
            .selectors
            .get_mut(&selector)
            .ok_or(RewardError::UnknownSelector(selector))?
            .set_clusters_to_select(k)?;
        info!(selector, k, "clusters to select updated");
        Ok(())
    }

    pub fn add_network(&mut self, ctx: &CallContext, id: NetworkId, weight: Amount, selector: SelectorId) -> Result<()> {
        self.admin(ctx)?;
        let clock = self.core.selectors.get(&selector).map(|s| *s.clock());
        self.core.networks.add_network(id, weight, selector, clock.as_ref())?;
        info!(network = %short_hex(&id), %weight, selector, "network added");
        Ok(())
    }

    pub fn update_network(&mut self, ctx: &CallContext, id: NetworkId, weight: Amount, selector: SelectorId) -> Result<()> {
        self.admin(ctx)?;
        let clock = self.core.selectors.get(&selector).map(|s| *s.clock());
        self.core.networks.update_network(&id, weight, selector, clock.as_ref())?;
        info!(network = %short_hex(&id), %weight, selector, "network updated");
        Ok(())
    }

    pub fn remove_network(&mut self, ctx: &CallContext, id: NetworkId) -> Result<()> {
        self.admin(ctx)?;
        self.core.networks.remove_network(&id)?;
        info!(network = %short_hex(&id), "network removed");
        Ok(())
    }

    pub fn set_total_rewards_per_epoch(&mut self, ctx: &CallContext, amount: Amount) -> Result<()> {
        self.admin(ctx)?;
        self.core.params.total_rewards_per_epoch = amount;
        info!(%amount, "total rewards per epoch updated");
        Ok(())
    }

    pub fn set_submission_grace(&mut self, ctx: &CallContext, secs: u64) -> Result<()> {
        self.admin(ctx)?;
        self.core.params.submission_grace_secs = secs;
        info!(secs, "ticket submission grace updated");
        Ok(())
    }

    pub fn set_switchover_time(&mut self, ctx: &CallContext, ts: u64) -> Result<()> {
        self.admin(ctx)?;
        self.core.params.switchover_time = ts;
        info!(ts, "switchover time updated");
        Ok(())
    }

    pub fn set_feed_wait(&mut self, ctx: &CallContext, secs: u64) -> Result<()> {
        self.admin(ctx)?;
        self.core.params.feed_wait_secs = secs;
        info!(secs, "feed wait updated");
        Ok(())
    }

    pub fn grant_role(&mut self, ctx: &CallContext, role: Role, who: NodeId) -> Result<bool> {
        self.admin(ctx)?;
        let granted = self.core.roles.grant(role, who);
        info!(?role, who = %short_hex(&who), granted, "role granted");
        Ok(granted)
    }

    pub fn revoke_role(&mut self, ctx: &CallContext, role: Role, who: NodeId) -> Result<bool> {
        self.admin(ctx)?;
        let revoked = self.core.roles.revoke(role, &who)?;
        info!(?role, who = %short_hex(&who), revoked, "role revoked");
        Ok(revoked)
    }

    pub fn has_role(&self, role: Role, who: &NodeId) -> bool {
        self.core.roles.has(role, who)
    }

    /* ===== beacon ===== */

    /// Commits are accepted for the running epoch and the next one.
    pub fn beacon_commit(&mut self, ctx: &CallContext, epoch: u64, commitment: [u8; 32]) -> Result<()> {
        let current = self.current_epoch(ctx.timestamp);
        if epoch < current || epoch > current.saturating_add(1) {
            return Err(RewardError::InvalidInput("beacon commit outside the running or next epoch"));
        }
        if !self.core.beacon.commit(epoch, ctx.sender, commitment) {
            return Err(RewardError::InvalidInput("beacon epoch already finalized"));
        }
        Ok(())
    }

    pub fn beacon_reveal(&mut self, ctx: &CallContext, epoch: u64, secret: [u8; 32]) -> Result<()> {
        if !self.core.beacon.reveal(epoch, ctx.sender, secret) {
            return Err(RewardError::InvalidInput("reveal does not match a commitment"));
        }
        Ok(())
    }

    /// Mixes an elapsed epoch's reveals into the beacon. Anyone may call.
    pub fn finalize_beacon(&mut self, ctx: &CallContext, epoch: u64) -> Result<Vec<NodeId>> {
        let current = self.current_epoch(ctx.timestamp);
        if epoch >= current {
            return Err(RewardError::EpochNotComplete { epoch, current });
        }
        let (_, missing) = self.core.beacon.finalize_epoch(epoch);
        if !missing.is_empty() {
            warn!(epoch, missing = missing.len(), "beacon committers did not reveal");
        }
        Ok(missing)
    }

    /* ===== weight callback (delegation layer) ===== */

    fn selector_for_cluster(&self, cluster: &ClusterId) -> Result<(NetworkId, SelectorId)> {
        let network = self.clusters.network_of(cluster).ok_or(RewardError::UnknownCluster)?;
        let selector = self.core.networks.selector_of(&network)?;
        Ok((network, selector))
    }

    fn selector_mut(&mut self, id: SelectorId) -> Result<&mut ClusterSelector> {
        self.core.selectors.get_mut(&id).ok_or(RewardError::UnknownSelector(id))
    }

    /// Sets a cluster's selection weight in its network's tree.
    ///
    /// Must be called in the same step as any change to the cluster's
    /// effective stake; a stale weight skews every later selection.
    pub fn upsert_cluster_weight(&mut self, ctx: &CallContext, cluster: ClusterId, weight: Amount) -> Result<()> {
        self.core.roles.require(Role::Updater, &ctx.sender)?;
        let (_, sel) = self.selector_for_cluster(&cluster)?;
        self.selector_mut(sel)?.upsert(cluster, weight)?;
        debug!(cluster = %short_hex(&cluster), %weight, "cluster weight upserted");
        Ok(())
    }

    /// Batch variant for one network; all or nothing.
    pub fn upsert_cluster_weights(
        &mut self,
        ctx: &CallContext,
        network: NetworkId,
        entries: &[(ClusterId, Amount)],
    ) -> Result<()> {
        self.core.roles.require(Role::Updater, &ctx.sender)?;
        let sel = self.core.networks.selector_of(&network)?;
        if entries.iter().any(|(c, _)| self.clusters.network_of(c) != Some(network)) {
            return Err(RewardError::InvalidInput("cluster belongs to another network"));
        }
        self.selector_mut(sel)?.upsert_many(entries)?;
        debug!(network = %short_hex(&network), n = entries.len(), "cluster weights upserted");
        Ok(())
    }

    /// Removes a cluster from its network's tree; false if it was not there.
    pub fn remove_cluster(&mut self, ctx: &CallContext, cluster: ClusterId) -> Result<bool> {
        self.core.roles.require(Role::Updater, &ctx.sender)?;
        let (_, sel) = self.selector_for_cluster(&cluster)?;
        let removed = self.selector_mut(sel)?.remove_if_present(&cluster)?;
        debug!(cluster = %short_hex(&cluster), removed, "cluster removed from tree");
        Ok(removed)
    }

    /* ===== selection ===== */

    /// Runs (or returns the memoized) selection of `network` for `epoch`.
    /// Anyone may trigger it, for the running epoch or the next one.
    pub fn select_clusters(&mut self, ctx: &CallContext, network: NetworkId, epoch: u64) -> Result<Vec<ClusterId>> {
        let sel = self.core.networks.selector_of(&network)?;
        let seed = self.core.beacon.seed_for(&network, epoch);
        let now = ctx.timestamp;
        let selector = self.selector_mut(sel)?;
        let fresh = !selector.is_selected(epoch);
        let picked = selector.select(epoch, now, &seed)?;
        if fresh {
            info!(network = %short_hex(&network), epoch, selected = picked.len(), "clusters selected");
        }
        Ok(picked)
    }

    /// The selection tickets for `epoch` are checked against.
    pub fn selected_clusters(&self, network: &NetworkId, epoch: u64, now: u64) -> Result<Vec<ClusterId>> {
        let sel = self.core.networks.selector_of(network)?;
        self.core
            .selectors
            .get(&sel)
            .ok_or(RewardError::UnknownSelector(sel))?
            .selected_at(epoch, now)
    }

    /* ===== tickets ===== */

    fn stage_tickets(
        &self,
        draft: &mut LedgerDraft,
        ctx: &CallContext,
        network: NetworkId,
        epoch: u64,
        shares: &[u32],
    ) -> Result<()> {
        let now = ctx.timestamp;
        let current = self.current_epoch(now);
        if epoch >= current {
            return Err(RewardError::EpochNotComplete { epoch, current });
        }
        let deadline = self.ticket_deadline(epoch);
        if now > deadline {
            return Err(RewardError::WindowClosed { epoch, deadline });
        }

        let sel = self.core.networks.selector_of(&network)?;
        if self.core.ledger.is_issued_with(draft, &(network, epoch, ctx.sender)) {
            return Err(RewardError::AlreadyIssued { epoch });
        }

        let (total_stake, next_eligible) = self.stakes.total_stake_and_next_epoch_at(epoch);
        if epoch >= next_eligible {
            return Err(RewardError::NotYetEligible { epoch, next_eligible });
        }
        let (stake, receiver) = self.stakes.stake_of_signer_at(&ctx.sender, epoch);
        let receiver = match receiver {
            Some(r) if !stake.is_zero() => r,
            _ => return Err(RewardError::NoReceiverStake),
        };

        let selected = self
            .core
            .selectors
            .get(&sel)
            .ok_or(RewardError::UnknownSelector(sel))?
            .effective_selection(epoch);
        if selected.is_empty() {
            return Err(RewardError::NoClustersSelected(epoch));
        }

        let budget = self.network_budget(&network)?;
        let credits = self
            .core
            .ledger
            .ticket_rewards(selected, shares, budget, stake, total_stake)?;
        self.core
            .ledger
            .stage(draft, network, epoch, Some(Submitter { signer: ctx.sender, receiver }), credits, budget)
    }

    /// Records the caller's ticket split for a completed `epoch` and credits
    /// the selected clusters. Strictly once per (network, epoch) for both the
    /// signer and the receiver it acts for.
    pub fn issue_tickets(&mut self, ctx: &CallContext, network: NetworkId, epoch: u64, shares: &[u32]) -> Result<Amount> {
        let mut draft = LedgerDraft::default();
        self.stage_tickets(&mut draft, ctx, network, epoch, shares)?;
        let credited = draft.total_credited();
        self.core.ledger.apply(draft);
        info!(
            network = %short_hex(&network),
            epoch,
            signer = %short_hex(&ctx.sender),
            %credited,
            "tickets issued"
        );
        Ok(credited)
    }

    /// Several epochs in one call; every entry is checked against the ledger
    /// plus the earlier entries, and nothing is applied unless all pass.
    pub fn issue_tickets_batch(&mut self, ctx: &CallContext, network: NetworkId, entries: &[(u64, Vec<u32>)]) -> Result<Amount> {
        if entries.is_empty() {
            return Err(RewardError::InvalidInput("empty ticket batch"));
        }
        let mut draft = LedgerDraft::default();
        for (epoch, shares) in entries {
            self.stage_tickets(&mut draft, ctx, network, *epoch, shares)?;
        }
        let credited = draft.total_credited();
        self.core.ledger.apply(draft);
        info!(
            network = %short_hex(&network),
            epochs = entries.len(),
            signer = %short_hex(&ctx.sender),
            %credited,
            "ticket batch issued"
        );
        Ok(credited)
    }

    /// Additive bootstrap/backfill path. `payouts` are fractions of the
    /// network's epoch budget scaled by 1e18. Shares the per-epoch cap with
    /// ticket submissions.
    pub fn feed(
        &mut self,
        ctx: &CallContext,
        network: NetworkId,
        epoch: u64,
        clusters: &[ClusterId],
        payouts: &[Amount],
    ) -> Result<Amount> {
        self.core.roles.require(Role::Feeder, &ctx.sender)?;
        let now = ctx.timestamp;
        let current = self.current_epoch(now);
        if epoch >= current {
            return Err(RewardError::EpochNotComplete { epoch, current });
        }
        if self.core.networks.get(&network).is_none() {
            return Err(RewardError::UnknownNetwork);
        }
        if let Some((last_epoch, at)) = self.core.ledger.last_feed(&network) {
            let ready_at = at.saturating_add(self.core.params.feed_wait_secs);
            if epoch > last_epoch && now < ready_at {
                return Err(RewardError::FeedTooEarly { ready_at });
            }
        }

        let budget = self.network_budget(&network)?;
        let credits = TicketLedger::feed_rewards(clusters, payouts, budget)?;
        let mut draft = LedgerDraft::default();
        self.core.ledger.stage(&mut draft, network, epoch, None, credits, budget)?;
        let credited = draft.total_credited();
        self.core.ledger.apply(draft);
        self.core.ledger.note_feed(network, epoch, now);
        info!(network = %short_hex(&network), epoch, %credited, "rewards fed");
        Ok(credited)
    }

    /* ===== claims ===== */

    /// Re-credits part of a claim whose payout failed.
    pub(crate) fn restore_pending(&mut self, cluster: ClusterId, amount: Amount) {
        self.core.ledger.restore(cluster, amount);
        warn!(cluster = %short_hex(&cluster), %amount, "payout failed, reward restored");
    }

    /// Drains and returns the cluster's pending reward (zero is fine).
    pub fn claim_reward(&mut self, ctx: &CallContext, cluster: ClusterId) -> Result<Amount> {
        self.core.roles.require(Role::Claimer, &ctx.sender)?;
        let amount = self.core.ledger.claim(&cluster);
        debug!(cluster = %short_hex(&cluster), %amount, "reward claimed");
        Ok(amount)
    }
}

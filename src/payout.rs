#![forbid(unsafe_code)]

//! Cluster settlement: claim, split commission, pay out of the vault.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{mul_div, short_hex, Amount, CallContext, ClusterId, NodeId, Role};
use crate::engine::RewardEngine;
use crate::errors::{Result, RewardError};
use crate::staking::{ClusterRegistry, ReceiverStakeRegistry, TokenVault};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub cluster: ClusterId,
    pub claimed: Amount,
    /// Paid to the cluster's payout address.
    pub commission: Amount,
    /// Paid to the delegator pool.
    pub delegator_share: Amount,
}

/// `floor(claimed * pct / 100)` goes to the operator, the rest to delegators.
pub fn split_commission(claimed: Amount, commission_percent: u8) -> Result<(Amount, Amount)> {
    if commission_percent > 100 {
        return Err(RewardError::InvalidCommission(commission_percent));
    }
    let commission = mul_div(claimed, U256::from(commission_percent), U256::from(100u8))
        .ok_or(RewardError::ArithmeticOverflow)?;
    Ok((commission, claimed - commission))
}

/// Claims `cluster`'s pending reward and pays it out of `vault`.
///
/// Everything is checked before the claim. If the vault still refuses a
/// payment, whatever was not paid goes back to the cluster's pending balance.
pub fn settle_cluster<S, C, V>(
    engine: &mut RewardEngine<S, C>,
    ctx: &CallContext,
    cluster: ClusterId,
    delegator_pool: &NodeId,
    vault: &mut V,
) -> Result<Settlement>
where
    S: ReceiverStakeRegistry,
    C: ClusterRegistry,
    V: TokenVault,
{
    if !engine.has_role(Role::Claimer, &ctx.sender) {
        return Err(RewardError::Unauthorized(Role::Claimer));
    }
    let info = engine.clusters().reward_info(&cluster).ok_or(RewardError::UnknownCluster)?;
    let pending = engine.pending_reward(&cluster);
    let (commission, delegator_share) = split_commission(pending, info.commission_percent)?;
    if vault.balance_available() < pending {
        return Err(RewardError::InsufficientFunds);
    }

    let claimed = engine.claim_reward(ctx, cluster)?;
    if !commission.is_zero() {
        if let Err(e) = vault.pay(commission, &info.payout_address) {
            engine.restore_pending(cluster, claimed);
            return Err(e);
        }
    }
    if !delegator_share.is_zero() {
        if let Err(e) = vault.pay(delegator_share, delegator_pool) {
            engine.restore_pending(cluster, delegator_share);
            return Err(e);
        }
    }
    info!(
        cluster = %short_hex(&cluster),
        %claimed,
        %commission,
        "cluster settled"
    );
    Ok(Settlement { cluster, claimed, commission, delegator_share })
}

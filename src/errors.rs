//! Error taxonomy of the rewards core.
//!
//! Every variant is a strict abort: the call that returns it has not mutated
//! any state.

use thiserror::Error;

use crate::core::Role;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewardError {
    /* ===== invariant violations ===== */
    #[error("identity already present in selection tree")]
    DuplicateIdentity,

    #[error("identity not present in selection tree")]
    UnknownIdentity,

    #[error("zero weight cannot be inserted (use update)")]
    ZeroWeight,

    #[error("weight sum would overflow 256 bits")]
    WeightOverflow,

    #[error("reward arithmetic overflow")]
    ArithmeticOverflow,

    /* ===== timing ===== */
    #[error("epoch {epoch} not complete (current epoch {current})")]
    EpochNotComplete { epoch: u64, current: u64 },

    #[error("submission window for epoch {epoch} closed at {deadline}")]
    WindowClosed { epoch: u64, deadline: u64 },

    #[error("receiver stake for epoch {epoch} not final yet (next eligible {next_eligible})")]
    NotYetEligible { epoch: u64, next_eligible: u64 },

    #[error("epoch {epoch} is in the future (current epoch {current})")]
    FutureEpoch { epoch: u64, current: u64 },

    #[error("selection for epoch {epoch} can only run during epoch {epoch} or the one before it")]
    EpochNotSelectable { epoch: u64 },

    #[error("feed for a new epoch not allowed before {ready_at}")]
    FeedTooEarly { ready_at: u64 },

    /* ===== idempotency ===== */
    #[error("tickets already issued for this signer or receiver in epoch {epoch}")]
    AlreadyIssued { epoch: u64 },

    /* ===== budget ===== */
    #[error("ticket shares sum to {got}, expected {expected}")]
    TicketCountInvalid { got: u64, expected: u64 },

    #[error("{got} ticket shares for {selected} selected clusters")]
    TicketLengthMismatch { got: usize, selected: usize },

    #[error("epoch reward budget exceeded")]
    EpochBudgetExceeded,

    #[error("vault balance too low for payout")]
    InsufficientFunds,

    /* ===== registry ===== */
    #[error("network already registered")]
    NetworkExists,

    #[error("network not registered")]
    UnknownNetwork,

    #[error("network has no selection tree")]
    NetworkInactive,

    #[error("selection tree clock does not match platform clock")]
    TreeInconsistent,

    #[error("selection tree {0} does not exist")]
    UnknownSelector(u32),

    #[error("selection tree {0} already backs another network")]
    SelectorInUse(u32),

    #[error("cluster not registered")]
    UnknownCluster,

    #[error("commission {0}% out of range")]
    InvalidCommission(u8),

    /* ===== access ===== */
    #[error("caller lacks role {0:?}")]
    Unauthorized(Role),

    /* ===== misc ===== */
    #[error("receiver has no stake at this epoch")]
    NoReceiverStake,

    #[error("no clusters selected for epoch {0}")]
    NoClustersSelected(u64),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

pub type Result<T> = std::result::Result<T, RewardError>;

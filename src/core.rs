#![forbid(unsafe_code)]

//! Core primitives: identities, amounts, call context, timestamp utilities.

use primitive_types::{U256, U512};
use serde::{Deserialize, Serialize};

use crate::crypto::kmac256_hash;

/// 32-byte identity (cluster, signer, receiver, payout address, role holder).
pub type NodeId = [u8; 32];

/// Cluster identity (alias for readability).
pub type ClusterId = NodeId;

/// Network identifier: KMAC of the network name.
pub type NetworkId = [u8; 32];

/// Weights, stakes, budgets and rewards.
pub type Amount = U256;

/// Selection tree handle (index into the engine's selector arena).
pub type SelectorId = u32;

/// Who calls and when. Every state-changing engine call takes one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub sender: NodeId,
    pub timestamp: u64,
}

impl CallContext {
    pub fn new(sender: NodeId, timestamp: u64) -> Self {
        Self { sender, timestamp }
    }
}

/// `a * b / c` with a 512-bit intermediate product, truncating.
/// `None` when `c == 0` or the quotient does not fit 256 bits.
pub fn mul_div(a: Amount, b: Amount, c: Amount) -> Option<Amount> {
    if c.is_zero() {
        return None;
    }
    let q = a.full_mul(b) / U512::from(c);
    U256::try_from(q).ok()
}

/// Derive a network id from its human name (e.g. "ETH", "DOT").
pub fn network_id(name: &str) -> NetworkId {
    kmac256_hash(b"NET.id.v1", &[name.as_bytes()])
}

/// Short hex prefix for logs.
pub fn short_hex(id: &[u8; 32]) -> String {
    hex::encode(&id[..4])
}

pub fn parse_node_id(s: &str) -> anyhow::Result<NodeId> {
    let bytes = hex::decode(s.trim_start_matches("0x"))?;
    let id: NodeId = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("node id must be 32 bytes"))?;
    Ok(id)
}

pub fn now_ts() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Serde helper: `U256` as a decimal string (config files are edited by hand).
pub mod dec_u256 {
    use primitive_types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        U256::from_dec_str(raw.trim()).map_err(serde::de::Error::custom)
    }
}

/// Access roles of the administrative surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Admin,
    /// May drain pending cluster rewards.
    Claimer,
    /// May credit rewards through the additive feed path.
    Feeder,
    /// May push cluster weight changes into the selection trees.
    Updater,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_id_is_stable_per_name() {
        assert_eq!(network_id("ETH"), network_id("ETH"));
        assert_ne!(network_id("ETH"), network_id("DOT"));
    }

    #[test]
    fn parse_node_id_roundtrip() {
        let id = [0xABu8; 32];
        let parsed = parse_node_id(&format!("0x{}", hex::encode(id))).unwrap();
        assert_eq!(parsed, id);
        assert!(parse_node_id("abcd").is_err());
    }

    #[test]
    fn mul_div_uses_wide_intermediate() {
        let big = U256::MAX / 2;
        assert_eq!(mul_div(big, U256::from(4u8), U256::from(8u8)), Some(big / 2));
        assert_eq!(mul_div(U256::from(7u8), U256::from(3u8), U256::from(2u8)), Some(U256::from(10u8)));
        assert_eq!(mul_div(U256::one(), U256::one(), U256::zero()), None);
        assert_eq!(mul_div(U256::MAX, U256::from(2u8), U256::one()), None);
    }

    #[test]
    fn dec_u256_reads_decimal() {
        #[derive(serde::Deserialize)]
        struct W {
            #[serde(with = "crate::core::dec_u256")]
            v: U256,
        }
        let w: W = serde_json::from_str(r#"{"v":"1000000000000000000000"}"#).unwrap();
        assert_eq!(w.v, U256::exp10(21));
    }
}

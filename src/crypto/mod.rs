//! Hashing utilities for TRUE_TRUST epoch rewards
//!
//! - KMAC: KMAC256 primitives (SHAKE256-based, domain separated)

#![forbid(unsafe_code)]

pub mod kmac;

pub use kmac::kmac256_hash;

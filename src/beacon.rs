#![forbid(unsafe_code)]

//! Commit/reveal epoch beacon feeding the selection seeds.
//!
//! Participants commit `KMAC(epoch || who || r)` and later reveal `r`.
//! Finalizing an epoch mixes its reveals (in id order) into the running
//! beacon. The seed for a `(network, epoch)` selection is derived from the
//! beacon value at the moment the selection runs; bias resistance against
//! whoever orders the calls is not a goal of this module.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::{NetworkId, NodeId};
use crate::crypto::kmac256_hash;

#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct BeaconEpoch {
    pub commits: HashMap<NodeId, [u8; 32]>,
    pub reveals: BTreeMap<NodeId, [u8; 32]>,
    pub finalized: bool,
    /// beacon after mixing this epoch's reveals
    pub beacon: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochBeacon {
    epochs: HashMap<u64, BeaconEpoch>,
    current: [u8; 32],
}

impl EpochBeacon {
    pub fn new(genesis: [u8; 32]) -> Self {
        Self { epochs: HashMap::new(), current: genesis }
    }

    #[inline]
    pub fn commit_hash(epoch: u64, who: &NodeId, r: &[u8; 32]) -> [u8; 32] {
        kmac256_hash(b"RANDAO.commit.v1", &[&epoch.to_le_bytes(), who, r])
    }

    /// Returns false if the epoch is already finalized.
    pub fn commit(&mut self, epoch: u64, who: NodeId, c: [u8; 32]) -> bool {
        let e = self.epochs.entry(epoch).or_default();
        if e.finalized {
            return false;
        }
        e.commits.insert(who, c);
        true
    }

    pub fn reveal(&mut self, epoch: u64, who: NodeId, r: [u8; 32]) -> bool {
        let Some(e) = self.epochs.get_mut(&epoch) else { return false };
        if e.finalized {
            return false;
        }
        match e.commits.get(&who) {
            Some(c) if *c == Self::commit_hash(epoch, &who, &r) => {
                e.reveals.insert(who, r);
                true
            }
            _ => false,
        }
    }

    /// Mixes the epoch's reveals into the running beacon.
    /// Returns the new beacon and committers that never revealed.
    pub fn finalize_epoch(&mut self, epoch: u64) -> ([u8; 32], Vec<NodeId>) {
        let e = self.epochs.entry(epoch).or_default();
        if e.finalized {
            return (e.beacon, Vec::new());
        }

        let mut mix = self.current;
        for (who, r) in &e.reveals {
            mix = kmac256_hash(b"RANDAO.mix.v1", &[&mix, who, r]);
        }
        e.beacon = mix;
        e.finalized = true;

        let mut missing: Vec<NodeId> = e
            .commits
            .keys()
            .filter(|who| !e.reveals.contains_key(*who))
            .copied()
            .collect();
        missing.sort();
        // only the mixed value outlives finalization
        e.commits.clear();
        e.reveals.clear();

        self.current = mix;
        (mix, missing)
    }

    #[inline]
    pub fn current(&self) -> [u8; 32] {
        self.current
    }

    /// Selection seed for `(network, epoch)` from the current beacon.
    pub fn seed_for(&self, network: &NetworkId, epoch: u64) -> [u8; 32] {
        kmac256_hash(b"SEL.seed.v1", &[&self.current, network, &epoch.to_le_bytes()])
    }
}

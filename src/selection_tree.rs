#![forbid(unsafe_code)]

//! Weighted selection tree: a sum tree embedded in a dense array.
//!
//! Layout: slot 0 is a placeholder, the root lives at 1, children of `i` at
//! `2i` and `2i + 1`. Every node keeps its own weight plus the total weight of
//! its left and right subtrees, so locating the node that owns a point in
//! `[0, total)` is a single root-to-leaf walk.
//!
//! Deletion moves the last occupied slot into the hole and pops the tail,
//! which keeps the tree complete (depth stays `⌈log2(n+1)⌉`).
//!
//! Sampling without replacement (`select_top_k`) never writes to the stored
//! sums: already drawn weight is tracked in a per-call overlay and discarded
//! when the call returns.

use std::collections::HashMap;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::core::{Amount, ClusterId};
use crate::crypto::kmac256_hash;
use crate::errors::{Result, RewardError};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    id: ClusterId,
    weight: Amount,
    left_sum: Amount,
    right_sum: Amount,
}

/// Weight already drawn below/at a slot during one `select_top_k` call.
#[derive(Clone, Copy, Default)]
struct Drawn {
    own: Amount,
    left: Amount,
    right: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionTree {
    nodes: Vec<Node>,
    index: HashMap<ClusterId, usize>,
}

impl Default for SelectionTree {
    fn default() -> Self {
        Self {
            nodes: vec![Node::default()],
            index: HashMap::new(),
        }
    }
}

impl SelectionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of present identities (zero-weight ones included).
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn contains(&self, id: &ClusterId) -> bool {
        self.index.contains_key(id)
    }

    pub fn weight_of(&self, id: &ClusterId) -> Option<Amount> {
        self.index.get(id).map(|&i| self.nodes[i].weight)
    }

    /// Σ weight over all present identities.
    pub fn total_weight(&self) -> Amount {
        match self.nodes.get(1) {
            // the three parts never exceed the checked total, no overflow here
            Some(root) => root.weight + root.left_sum + root.right_sum,
            None => U256::zero(),
        }
    }

    /// Identities that can currently be drawn.
    pub fn non_zero_count(&self) -> usize {
        self.nodes[1..].iter().filter(|n| !n.weight.is_zero()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClusterId, &Amount)> {
        self.nodes[1..].iter().map(|n| (&n.id, &n.weight))
    }

    /* ===== mutation ===== */

    pub fn insert(&mut self, id: ClusterId, weight: Amount) -> Result<()> {
        if self.index.contains_key(&id) {
            return Err(RewardError::DuplicateIdentity);
        }
        if weight.is_zero() {
            return Err(RewardError::ZeroWeight);
        }
        self.total_weight()
            .checked_add(weight)
            .ok_or(RewardError::WeightOverflow)?;

        let slot = self.nodes.len();
        self.nodes.push(Node { id, weight, ..Node::default() });
        self.index.insert(id, slot);
        self.add_along_path(slot, weight);
        Ok(())
    }

    /// Sets a new weight for a present identity. Zero keeps it present but undrawable.
    pub fn update(&mut self, id: &ClusterId, new_weight: Amount) -> Result<()> {
        let slot = *self.index.get(id).ok_or(RewardError::UnknownIdentity)?;
        let old = self.nodes[slot].weight;

        if new_weight > old {
            let delta = new_weight - old;
            self.total_weight()
                .checked_add(delta)
                .ok_or(RewardError::WeightOverflow)?;
            self.nodes[slot].weight = new_weight;
            self.add_along_path(slot, delta);
        } else if new_weight < old {
            let delta = old - new_weight;
            self.nodes[slot].weight = new_weight;
            self.sub_along_path(slot, delta);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &ClusterId) -> Result<()> {
        let slot = *self.index.get(id).ok_or(RewardError::UnknownIdentity)?;

        let w = self.nodes[slot].weight;
        self.nodes[slot].weight = U256::zero();
        self.sub_along_path(slot, w);

        let last = self.nodes.len() - 1;
        if slot != last {
            // przenieś ostatni liść w dziurę
            let moved_id = self.nodes[last].id;
            let moved_w = self.nodes[last].weight;
            self.nodes[last].weight = U256::zero();
            self.sub_along_path(last, moved_w);

            self.nodes[slot].id = moved_id;
            self.nodes[slot].weight = moved_w;
            self.add_along_path(slot, moved_w);
            self.index.insert(moved_id, slot);
        }

        self.nodes.pop();
        self.index.remove(id);
        Ok(())
    }

    /// Insert when absent, update when present. Absent + zero is a no-op.
    pub fn upsert(&mut self, id: ClusterId, weight: Amount) -> Result<()> {
        if self.index.contains_key(&id) {
            self.update(&id, weight)
        } else if weight.is_zero() {
            Ok(())
        } else {
            self.insert(id, weight)
        }
    }

    /// Applies all upserts or none of them.
    pub fn upsert_many(&mut self, entries: &[(ClusterId, Amount)]) -> Result<()> {
        let mut undo: Vec<(ClusterId, Option<Amount>)> = Vec::with_capacity(entries.len());
        for (id, weight) in entries {
            let previous = self.weight_of(id);
            if let Err(e) = self.upsert(*id, *weight) {
                self.rollback(undo);
                return Err(e);
            }
            undo.push((*id, previous));
        }
        Ok(())
    }

    fn rollback(&mut self, undo: Vec<(ClusterId, Option<Amount>)>) {
        for (id, previous) in undo.into_iter().rev() {
            // reverting a successful step cannot fail: weights only go back down
            // to values that were valid before
            let _ = match previous {
                Some(w) => self.update(&id, w),
                None if self.contains(&id) => self.remove(&id),
                None => Ok(()),
            };
        }
    }

    /// Returns whether the identity was present.
    pub fn remove_if_present(&mut self, id: &ClusterId) -> Result<bool> {
        if !self.index.contains_key(id) {
            return Ok(false);
        }
        self.remove(id)?;
        Ok(true)
    }

    fn add_along_path(&mut self, slot: usize, w: Amount) {
        if w.is_zero() {
            return;
        }
        let mut i = slot;
        while i > 1 {
            let parent = i / 2;
            if i % 2 == 0 {
                self.nodes[parent].left_sum += w;
            } else {
                self.nodes[parent].right_sum += w;
            }
            i = parent;
        }
    }

    fn sub_along_path(&mut self, slot: usize, w: Amount) {
        if w.is_zero() {
            return;
        }
        let mut i = slot;
        while i > 1 {
            let parent = i / 2;
            if i % 2 == 0 {
                self.nodes[parent].left_sum -= w;
            } else {
                self.nodes[parent].right_sum -= w;
            }
            i = parent;
        }
    }

    /* ===== sampling ===== */

    /// Weighted sampling without replacement of up to `k` identities.
    ///
    /// Deterministic for a given `seed`. Draw `j` uses
    /// `KMAC("SEL.draw.v1", seed || j) mod remaining_weight`. The result has
    /// `min(k, non_zero_count())` distinct identities in draw order.
    pub fn select_top_k(&self, k: usize, seed: &[u8; 32]) -> Vec<ClusterId> {
        let mut drawn: HashMap<usize, Drawn> = HashMap::new();
        let mut remaining = self.total_weight();
        let mut out = Vec::with_capacity(k.min(self.len()));
        let mut draw: u64 = 0;

        while out.len() < k && !remaining.is_zero() {
            let point = draw_value(seed, draw) % remaining;
            draw += 1;

            let Some(slot) = self.locate(point, &drawn) else { break };
            let w = self.nodes[slot].weight;
            out.push(self.nodes[slot].id);

            drawn.entry(slot).or_default().own = w;
            let mut i = slot;
            while i > 1 {
                let parent = i / 2;
                let d = drawn.entry(parent).or_default();
                if i % 2 == 0 {
                    d.left += w;
                } else {
                    d.right += w;
                }
                i = parent;
            }
            remaining -= w;
        }
        out
    }

    /// Walks from the root to the slot whose (effective) weight range holds `point`.
    fn locate(&self, mut point: Amount, drawn: &HashMap<usize, Drawn>) -> Option<usize> {
        let mut i = 1usize;
        loop {
            let node = self.nodes.get(i)?;
            let d = drawn.get(&i).copied().unwrap_or_default();
            let left = node.left_sum - d.left;
            let own = node.weight - d.own;

            if point < left {
                i *= 2;
                continue;
            }
            point -= left;
            if point < own {
                return Some(i);
            }
            point -= own;
            i = 2 * i + 1;
        }
    }

    /// Recomputes every subtree sum from scratch and compares with the stored ones,
    /// then checks the id index against the slots. O(n); run on state import.
    pub fn verify_sums(&self) -> bool {
        fn subtree(t: &SelectionTree, i: usize) -> Option<Amount> {
            if i >= t.nodes.len() {
                return Some(U256::zero());
            }
            let l = subtree(t, 2 * i)?;
            let r = subtree(t, 2 * i + 1)?;
            let n = &t.nodes[i];
            if n.left_sum != l || n.right_sum != r {
                return None;
            }
            n.weight.checked_add(l)?.checked_add(r)
        }
        // slot 0 is the placeholder and must exist
        if self.nodes.is_empty() || subtree(self, 1).is_none() {
            return false;
        }
        self.index.len() == self.len()
            && self
                .index
                .iter()
                .all(|(id, &slot)| slot > 0 && self.nodes.get(slot).map(|n| &n.id) == Some(id))
    }

    #[cfg(test)]
    pub(crate) fn skew_left_sum(&mut self, slot: usize, by: Amount) {
        self.nodes[slot].left_sum = self.nodes[slot].left_sum.saturating_add(by);
    }
}

#[inline]
fn draw_value(seed: &[u8; 32], draw: u64) -> U256 {
    let h = kmac256_hash(b"SEL.draw.v1", &[seed, &draw.to_le_bytes()]);
    U256::from_big_endian(&h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn cid(n: u8) -> ClusterId {
        let mut id = [0u8; 32];
        id[0] = n;
        id
    }

    fn w(x: u64) -> Amount {
        U256::from(x)
    }

    fn seed(n: u64) -> [u8; 32] {
        kmac256_hash(b"TEST.seed", &[&n.to_le_bytes()])
    }

    fn brute_total(t: &SelectionTree) -> Amount {
        t.iter().fold(U256::zero(), |acc, (_, w)| acc + *w)
    }

    #[test]
    fn insert_rejects_duplicates_and_zero() {
        let mut t = SelectionTree::new();
        t.insert(cid(1), w(10)).unwrap();
        assert_eq!(t.insert(cid(1), w(5)), Err(RewardError::DuplicateIdentity));
        assert_eq!(t.insert(cid(2), U256::zero()), Err(RewardError::ZeroWeight));
        assert_eq!(t.len(), 1);
        assert_eq!(t.total_weight(), w(10));
    }

    #[test]
    fn unknown_identity() {
        let mut t = SelectionTree::new();
        assert_eq!(t.update(&cid(9), w(1)), Err(RewardError::UnknownIdentity));
        assert_eq!(t.remove(&cid(9)), Err(RewardError::UnknownIdentity));
        assert_eq!(t.remove_if_present(&cid(9)), Ok(false));
    }

    #[test]
    fn overflow_is_rejected_without_mutation() {
        let mut t = SelectionTree::new();
        t.insert(cid(1), U256::MAX - w(5)).unwrap();
        let before = t.clone();
        assert_eq!(t.insert(cid(2), w(6)), Err(RewardError::WeightOverflow));
        assert_eq!(t, before);

        t.insert(cid(2), w(5)).unwrap();
        assert_eq!(t.total_weight(), U256::MAX);
        assert_eq!(t.update(&cid(2), w(6)), Err(RewardError::WeightOverflow));
        assert_eq!(t.weight_of(&cid(2)), Some(w(5)));
        assert!(t.verify_sums());
    }

    #[test]
    fn update_to_zero_keeps_identity() {
        let mut t = SelectionTree::new();
        t.insert(cid(1), w(10)).unwrap();
        t.insert(cid(2), w(20)).unwrap();
        t.update(&cid(1), U256::zero()).unwrap();
        assert!(t.contains(&cid(1)));
        assert_eq!(t.non_zero_count(), 1);
        assert_eq!(t.total_weight(), w(20));
        for s in 0..50 {
            assert_eq!(t.select_top_k(2, &seed(s)), vec![cid(2)]);
        }
    }

    #[test]
    fn remove_keeps_tree_dense() {
        let mut t = SelectionTree::new();
        for i in 1..=7u8 {
            t.insert(cid(i), w(i as u64)).unwrap();
        }
        t.remove(&cid(2)).unwrap();
        assert_eq!(t.len(), 6);
        assert!(!t.contains(&cid(2)));
        assert_eq!(t.total_weight(), w(28 - 2));
        assert!(t.verify_sums());

        // removing the last slot itself
        t.remove(&cid(7)).unwrap();
        assert!(t.verify_sums());
        assert_eq!(t.total_weight(), w(28 - 2 - 7));

        for i in [1u8, 3, 4, 5, 6] {
            t.remove(&cid(i)).unwrap();
            assert!(t.verify_sums());
        }
        assert!(t.is_empty());
        assert_eq!(t.total_weight(), U256::zero());
    }

    #[test]
    fn weight_conservation_random_ops() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut t = SelectionTree::new();
        let mut model: HashMap<ClusterId, u64> = HashMap::new();

        for _ in 0..2_000 {
            let id = cid(rng.gen_range(0..40));
            let weight: u64 = rng.gen_range(0..1_000);
            match rng.gen_range(0..4) {
                0 => {
                    let r = t.insert(id, w(weight));
                    if model.contains_key(&id) {
                        assert_eq!(r, Err(RewardError::DuplicateIdentity));
                    } else if weight == 0 {
                        assert_eq!(r, Err(RewardError::ZeroWeight));
                    } else {
                        r.unwrap();
                        model.insert(id, weight);
                    }
                }
                1 => {
                    let r = t.update(&id, w(weight));
                    if model.contains_key(&id) {
                        r.unwrap();
                        model.insert(id, weight);
                    } else {
                        assert_eq!(r, Err(RewardError::UnknownIdentity));
                    }
                }
                2 => {
                    let r = t.remove(&id);
                    if model.remove(&id).is_some() {
                        r.unwrap();
                    } else {
                        assert_eq!(r, Err(RewardError::UnknownIdentity));
                    }
                }
                _ => {
                    t.upsert(id, w(weight)).unwrap();
                    if model.contains_key(&id) || weight > 0 {
                        model.insert(id, weight);
                    }
                }
            }
            let expected: u64 = model.values().sum();
            assert_eq!(t.total_weight(), w(expected));
            assert_eq!(brute_total(&t), w(expected));
            assert_eq!(t.len(), model.len());
        }
        assert!(t.verify_sums());
    }

    #[test]
    fn corrupt_trees_fail_verification() {
        let mut t = SelectionTree::new();
        for i in 1..=3u8 {
            t.insert(cid(i), w(10)).unwrap();
        }
        assert!(t.verify_sums());
        t.nodes[1].left_sum = U256::zero();
        assert!(!t.verify_sums());

        // sums that overflow while being recomputed
        let mut t = SelectionTree::new();
        t.insert(cid(1), w(1)).unwrap();
        t.insert(cid(2), w(1)).unwrap();
        t.nodes[2].weight = U256::MAX;
        t.nodes[1].left_sum = U256::MAX;
        assert!(!t.verify_sums());

        // no placeholder slot
        let bare: SelectionTree = bincode::deserialize(&[0u8; 16]).unwrap();
        assert_eq!(bare.len(), 0);
        assert!(!bare.verify_sums());

        // index pointing at the placeholder
        let mut t = SelectionTree::new();
        t.insert(cid(1), w(1)).unwrap();
        t.index.insert(cid(1), 0);
        assert!(!t.verify_sums());
    }

    #[test]
    fn upsert_many_is_all_or_nothing() {
        let mut t = SelectionTree::new();
        t.insert(cid(1), w(10)).unwrap();
        let before = t.clone();

        let batch = vec![(cid(1), w(20)), (cid(2), w(30)), (cid(3), U256::MAX)];
        assert_eq!(t.upsert_many(&batch), Err(RewardError::WeightOverflow));
        assert_eq!(t, before);

        t.upsert_many(&[(cid(1), w(20)), (cid(2), w(30))]).unwrap();
        assert_eq!(t.total_weight(), w(50));
    }

    #[test]
    fn select_from_empty_tree() {
        let t = SelectionTree::new();
        assert!(t.select_top_k(5, &seed(1)).is_empty());
    }

    #[test]
    fn select_zero_k() {
        let mut t = SelectionTree::new();
        t.insert(cid(1), w(1)).unwrap();
        assert!(t.select_top_k(0, &seed(1)).is_empty());
    }

    #[test]
    fn scenario_a_distinct_draws() {
        let mut t = SelectionTree::new();
        t.insert(cid(b'A'), w(10)).unwrap();
        t.insert(cid(b'B'), w(20)).unwrap();
        t.insert(cid(b'C'), w(30)).unwrap();

        for s in 0..500 {
            let two = t.select_top_k(2, &seed(s));
            assert_eq!(two.len(), 2);
            assert_ne!(two[0], two[1]);

            let three: HashSet<_> = t.select_top_k(3, &seed(s)).into_iter().collect();
            let all: HashSet<_> = [cid(b'A'), cid(b'B'), cid(b'C')].into_iter().collect();
            assert_eq!(three, all);
        }
    }

    #[test]
    fn selection_is_deterministic_and_read_only() {
        let mut t = SelectionTree::new();
        for i in 1..=20u8 {
            t.insert(cid(i), w(i as u64 * 3)).unwrap();
        }
        let before = t.clone();
        let a = t.select_top_k(5, &seed(42));
        let b = t.select_top_k(5, &seed(42));
        assert_eq!(a, b);
        assert_eq!(t, before);
    }

    #[test]
    fn sampling_validity_random_trees() {
        let mut rng = StdRng::seed_from_u64(99);
        for round in 0..100u64 {
            let mut t = SelectionTree::new();
            let n = rng.gen_range(0..30u8);
            for i in 0..n {
                t.insert(cid(i), w(rng.gen_range(1..100))).unwrap();
            }
            // zero a few
            for i in 0..n {
                if rng.gen_bool(0.2) {
                    t.update(&cid(i), U256::zero()).unwrap();
                }
            }
            let k = rng.gen_range(0..40usize);
            let picked = t.select_top_k(k, &seed(round));
            let uniq: HashSet<_> = picked.iter().collect();
            assert_eq!(uniq.len(), picked.len());
            assert_eq!(picked.len(), k.min(t.non_zero_count()));
            for id in &picked {
                assert!(!t.weight_of(id).unwrap().is_zero());
            }
        }
    }

    #[test]
    fn single_draw_frequency_tracks_weight() {
        let mut t = SelectionTree::new();
        let weights = [10u64, 20, 30, 40];
        for (i, x) in weights.iter().enumerate() {
            t.insert(cid(i as u8), w(*x)).unwrap();
        }
        let trials = 20_000u64;
        let mut hits = [0u64; 4];
        for s in 0..trials {
            let pick = t.select_top_k(1, &seed(s));
            hits[pick[0][0] as usize] += 1;
        }
        for (i, x) in weights.iter().enumerate() {
            let expected = *x as f64 / 100.0;
            let got = hits[i] as f64 / trials as f64;
            assert!((expected - got).abs() < 0.02, "id {i}: expected {expected}, got {got}");
        }
    }

    #[test]
    fn large_weights_do_not_overflow_in_sampling() {
        let mut t = SelectionTree::new();
        let big = U256::MAX / 4;
        t.insert(cid(1), big).unwrap();
        t.insert(cid(2), big).unwrap();
        t.insert(cid(3), big).unwrap();
        let picked = t.select_top_k(3, &seed(3));
        assert_eq!(picked.len(), 3);
    }
}

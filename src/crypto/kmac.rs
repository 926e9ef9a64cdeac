//! KMAC256 helpers built on top of SHAKE256.
//!
//! Everything that needs a stable, domain-separated digest goes through here:
//! network ids, beacon commitments/mixing, per-epoch selection seeds and the
//! per-draw values of the selection tree.

use sha3::{
    digest::{ExtendableOutput, Update, XofReader},
    Shake256,
};

const KMAC_DOMAIN: &[u8] = b"TT-KMAC256.v1";

fn write_len_prefixed(hasher: &mut Shake256, data: &[u8]) {
    let len = data.len() as u64;
    hasher.update(&len.to_le_bytes());
    hasher.update(data);
}

/// Fill `out` with KMAC256 XOF output for `(key, label, data)`.
pub fn kmac256_xof_fill(key: &[u8], label: &[u8], data: &[u8], out: &mut [u8]) {
    let mut hasher = Shake256::default();
    hasher.update(KMAC_DOMAIN);
    write_len_prefixed(&mut hasher, key);
    write_len_prefixed(&mut hasher, label);
    write_len_prefixed(&mut hasher, data);

    let mut reader = hasher.finalize_xof();
    reader.read(out);
}

/// Domain-separated 32-byte hash over concatenated inputs.
///
/// Inputs are length-prefixed one by one, so `["ab", "c"]` and `["a", "bc"]`
/// never collide.
#[inline]
pub fn kmac256_hash(domain: &[u8], inputs: &[&[u8]]) -> [u8; 32] {
    let mut combined = Vec::new();
    for input in inputs {
        combined.extend_from_slice(&(input.len() as u64).to_le_bytes());
        combined.extend_from_slice(input);
    }

    let mut output = [0u8; 32];
    kmac256_xof_fill(&combined, domain, b"", &mut output);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xof_prefix_is_stable() {
        let mut short = [0u8; 32];
        let mut long = [0u8; 64];
        kmac256_xof_fill(b"key", b"TT-TEST", b"data", &mut short);
        kmac256_xof_fill(b"key", b"TT-TEST", b"data", &mut long);
        assert_eq!(short[..], long[..32]);
    }

    #[test]
    fn hash_is_order_and_boundary_sensitive() {
        let h1 = kmac256_hash(b"TEST", &[b"hello", b"world"]);
        assert_ne!(h1, [0u8; 32]);
        assert_eq!(h1, kmac256_hash(b"TEST", &[b"hello", b"world"]));
        assert_ne!(h1, kmac256_hash(b"TEST", &[b"world", b"hello"]));
        assert_ne!(
            kmac256_hash(b"TEST", &[b"ab", b"c"]),
            kmac256_hash(b"TEST", &[b"a", b"bc"])
        );
    }

    #[test]
    fn hash_changes_with_domain() {
        assert_ne!(
            kmac256_hash(b"A", &[b"x"]),
            kmac256_hash(b"B", &[b"x"])
        );
    }
}

use bit_vec::BitVec;
use seahash::hash;

/// Probabilistic key-presence check in front of the ledger's offset map.
/// Never reports a stored key as absent; may report an absent key as present.
pub struct KeyFilter {
    bits: BitVec,
    num_hashes: u32,
}

impl KeyFilter {
    /// Sized for `expected_keys` at the given false positive rate (e.g. 0.01).
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        let n = expected_keys.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;

        // m = -(n * ln(p)) / ln(2)^2, k = (m / n) * ln(2)
        let m = (-(n * false_positive_rate.ln()) / (ln2 * ln2)).ceil().max(8.0);
        let k = ((m / n) * ln2).ceil().max(1.0);

        Self {
            bits: BitVec::from_elem(m as usize, false),
            num_hashes: k as u32,
        }
    }

    pub fn insert(&mut self, key: &str) {
        let m = self.bits.len() as u64;
        for idx in bit_positions(key, self.num_hashes, m) {
            self.bits.set(idx, true);
        }
    }

    pub fn may_contain(&self, key: &str) -> bool {
        let m = self.bits.len() as u64;
        bit_positions(key, self.num_hashes, m).all(|idx| self.bits.get(idx).unwrap_or(false))
    }
}

// Double hashing: position_i = h1 + i * h2 (mod m).
fn bit_positions(key: &str, num_hashes: u32, m: u64) -> impl Iterator<Item = usize> {
    let h1 = hash(key.as_bytes());
    let h2 = h1.rotate_left(32) ^ 0x9E37_79B9_7F4A_7C15;
    (0..num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_always_reported() {
        let mut f = KeyFilter::new(1_000, 0.01);
        for i in 0..500 {
            f.insert(&format!("record_{}", i));
        }
        assert!((0..500).all(|i| f.may_contain(&format!("record_{}", i))));
    }

    #[test]
    fn false_positive_rate_stays_near_target() {
        let mut f = KeyFilter::new(1_000, 0.01);
        for i in 0..1_000 {
            f.insert(&format!("present_{}", i));
        }
        let hits = (0..10_000).filter(|i| f.may_contain(&format!("absent_{}", i))).count();
        assert!(hits < 500, "too many false positives: {}", hits);
    }
}

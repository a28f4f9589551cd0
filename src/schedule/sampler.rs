use rand::Rng;
use std::collections::HashMap;

/// Pick up to `n` distinct indices from `0..len`, uniformly and without replacement.
///
/// When `len <= n` every index is returned in order. Otherwise a virtual array `0..len` is
/// shrunk from the tail: each draw takes the element occupying a random slot, then records
/// that the slot is now occupied by whatever sat at the tail. Only drawn slots are tracked,
/// so work and extra memory are both O(n).
pub fn sample_indices<R: Rng>(len: usize, n: usize, rng: &mut R) -> Vec<usize> {
    if len <= n {
        return (0..len).collect();
    }

    let mut out = Vec::with_capacity(n);
    let mut taken = HashMap::<usize, usize>::with_capacity(n);
    let mut remaining = len;
    for _ in 0..n {
        let x = rng.gen_range(0..remaining);
        out.push(taken.get(&x).copied().unwrap_or(x));
        remaining -= 1;
        let tail = taken.get(&remaining).copied().unwrap_or(remaining);
        taken.insert(x, tail);
    }
    out
}

/// Borrowing variant of [`sample_indices`] over a slice. The slice is never reordered.
pub fn sample<'a, T, R: Rng>(items: &'a [T], n: usize, rng: &mut R) -> Vec<&'a T> {
    sample_indices(items.len(), n, rng)
        .into_iter()
        .map(|i| &items[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    #[test]
    fn small_sets_are_returned_unchanged() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_indices(4, 10, &mut rng), vec![0, 1, 2, 3]);
        assert_eq!(sample_indices(10, 10, &mut rng), (0..10).collect::<Vec<_>>());
        assert!(sample_indices(0, 10, &mut rng).is_empty());
    }

    #[test]
    fn samples_are_distinct_members_of_size_min_l_n() {
        let mut rng = StdRng::seed_from_u64(7);
        for len in 0..40 {
            for n in 0..15 {
                let s = sample_indices(len, n, &mut rng);
                assert_eq!(s.len(), len.min(n), "len={len} n={n}");
                let uniq: HashSet<usize> = s.iter().copied().collect();
                assert_eq!(uniq.len(), s.len(), "duplicates for len={len} n={n}");
                assert!(s.iter().all(|&i| i < len));
            }
        }
    }

    #[test]
    fn slice_sampling_leaves_input_untouched() {
        let items: Vec<String> = (0..15).map(|i| format!("p{i}")).collect();
        let before = items.clone();
        let mut rng = StdRng::seed_from_u64(3);
        let picked = sample(&items, 10, &mut rng);
        assert_eq!(picked.len(), 10);
        assert!(picked.iter().all(|p| items.contains(p)));
        assert_eq!(items, before);
    }

    #[test]
    fn selection_frequency_converges_to_n_over_l() {
        let (len, n, rounds) = (15usize, 10usize, 20_000u32);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut hits = vec![0u32; len];
        for _ in 0..rounds {
            for i in sample_indices(len, n, &mut rng) {
                hits[i] += 1;
            }
        }

        let expected = n as f64 / len as f64;
        for (i, &h) in hits.iter().enumerate() {
            let freq = f64::from(h) / f64::from(rounds);
            assert!(
                (freq - expected).abs() < 0.02,
                "index {i}: freq {freq:.4} vs expected {expected:.4}"
            );
        }
    }
}

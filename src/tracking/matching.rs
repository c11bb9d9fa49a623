//! Temporal descriptor matching between the reference and current frames.

use crate::tracking::frame::{Descriptor, descriptor_distance};

/// Default ratio test threshold (best / second best).
pub const NN_RATIO: f64 = 0.9;

/// A descriptor correspondence.
///
/// `query_idx` indexes the current frame, `train_idx` the reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

/// Brute-force k-nearest-neighbour matching under Hamming distance.
///
/// For every query descriptor returns up to `k` train candidates sorted by
/// increasing distance; ties keep the lower train index first. One pass over
/// the train set per query, holding only the current best `k`.
pub fn knn_match(query: &[Descriptor], train: &[Descriptor], k: usize) -> Vec<Vec<FeatureMatch>> {
    query
        .iter()
        .enumerate()
        .map(|(query_idx, q)| {
            let mut best: Vec<FeatureMatch> = Vec::with_capacity(k);
            if k == 0 {
                return best;
            }
            for (train_idx, t) in train.iter().enumerate() {
                let distance = descriptor_distance(q, t);
                if best.len() == k && best[k - 1].distance <= distance {
                    continue;
                }
                // Strictly closer candidates go first, so equal distances
                // stay in train order.
                let pos = best.partition_point(|m| m.distance <= distance);
                if best.len() == k {
                    best.pop();
                }
                best.insert(
                    pos,
                    FeatureMatch {
                        query_idx,
                        train_idx,
                        distance,
                    },
                );
            }
            best
        })
        .collect()
}

/// Keep the best candidate of each query when it is clearly better than
/// the runner-up: `best <= ratio * second`. Queries with fewer than two
/// candidates are dropped.
pub fn ratio_test(knn_matches: &[Vec<FeatureMatch>], ratio: f64) -> Vec<FeatureMatch> {
    knn_matches
        .iter()
        .filter_map(|candidates| match candidates.as_slice() {
            [best, second, ..] if best.distance as f64 <= second.distance as f64 * ratio => {
                Some(*best)
            }
            _ => None,
        })
        .collect()
}

/// Two-nearest-neighbour matcher with Lowe's ratio test.
#[derive(Debug, Clone, Copy)]
pub struct TemporalMatcher {
    ratio: f64,
}

impl TemporalMatcher {
    pub fn new(ratio: f64) -> Self {
        Self { ratio }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Match `current` (query) against `reference` (train).
    pub fn match_features(&self, current: &[Descriptor], reference: &[Descriptor]) -> Vec<FeatureMatch> {
        let knn = knn_match(current, reference, 2);
        ratio_test(&knn, self.ratio)
    }
}

impl Default for TemporalMatcher {
    fn default() -> Self {
        Self::new(NN_RATIO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Descriptor with the first `bits` bits set.
    fn desc_with_bits(bits: usize) -> Descriptor {
        let mut bytes = [0u8; 32];
        for i in 0..bits {
            bytes[i / 8] |= 1 << (i % 8);
        }
        Descriptor(bytes)
    }

    #[test]
    fn test_knn_sorted_by_distance() {
        let query = vec![desc_with_bits(0)];
        let train = vec![desc_with_bits(20), desc_with_bits(5), desc_with_bits(10)];

        let knn = knn_match(&query, &train, 2);
        assert_eq!(knn[0].len(), 2);
        assert_eq!(knn[0][0].train_idx, 1);
        assert_eq!(knn[0][0].distance, 5);
        assert_eq!(knn[0][1].train_idx, 2);
    }

    #[test]
    fn test_knn_ties_keep_lower_train_index() {
        let query = vec![desc_with_bits(0)];
        let train = vec![
            desc_with_bits(7),
            desc_with_bits(3),
            desc_with_bits(7),
            desc_with_bits(3),
            desc_with_bits(1),
        ];

        let knn = knn_match(&query, &train, 2);
        let order: Vec<usize> = knn[0].iter().map(|m| m.train_idx).collect();
        assert_eq!(order, vec![4, 1]);

        let knn = knn_match(&query, &train, 4);
        let order: Vec<usize> = knn[0].iter().map(|m| m.train_idx).collect();
        assert_eq!(order, vec![4, 1, 3, 0]);
    }

    #[test]
    fn test_knn_short_train_set() {
        let query = vec![desc_with_bits(0), desc_with_bits(4)];
        let train = vec![desc_with_bits(2)];

        let knn = knn_match(&query, &train, 2);
        assert_eq!(knn.len(), 2);
        assert!(knn.iter().all(|c| c.len() == 1));
        assert!(knn_match(&query, &[], 2).iter().all(|c| c.is_empty()));
        assert!(knn_match(&query, &train, 0).iter().all(|c| c.is_empty()));
    }

    #[test]
    fn test_ratio_test_rejects_ambiguous() {
        let query = vec![desc_with_bits(0)];
        // 10 vs 11: 10 > 0.9 * 11 = 9.9
        let train = vec![desc_with_bits(10), desc_with_bits(11)];

        let matches = TemporalMatcher::default().match_features(&query, &train);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_ratio_test_boundary_is_inclusive() {
        let query = vec![desc_with_bits(0)];
        // 9 <= 0.9 * 10
        let train = vec![desc_with_bits(9), desc_with_bits(10)];

        let matches = TemporalMatcher::default().match_features(&query, &train);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].train_idx, 0);
        assert_eq!(matches[0].query_idx, 0);
    }

    #[test]
    fn test_single_candidate_discarded() {
        let query = vec![desc_with_bits(0)];
        let train = vec![desc_with_bits(0)];

        let matches = TemporalMatcher::default().match_features(&query, &train);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_every_survivor_passes_ratio() {
        let query: Vec<Descriptor> = (0..30).map(|i| desc_with_bits(i * 3)).collect();
        let train: Vec<Descriptor> = (0..40).map(|i| desc_with_bits(i * 2 + 1)).collect();

        let knn = knn_match(&query, &train, 2);
        let matches = ratio_test(&knn, NN_RATIO);
        for m in &matches {
            let candidates = &knn[m.query_idx];
            assert!(candidates.len() >= 2);
            assert!(m.distance as f64 <= NN_RATIO * candidates[1].distance as f64);
        }
    }
}

//! Bucket sizing calculus.
//!
//! Shared by every reorder, shift and split path. The invariants these
//! functions guarantee: every bucket of a distribution holds at least
//! one and at most `fill` entries, and the bucket count never exceeds
//! the tree order, so a redistributed leaf never needs re-splitting.

use crate::types::TreeShape;

/// A chosen distribution of entries over buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketDist {
    /// Number of buckets
    pub buckets: usize,
    /// Upper bound of entries per bucket in this distribution
    pub per_bucket: usize,
}

/// Distribution for `total` entries in a leaf currently holding
/// `existing` buckets.
///
/// Prefers reusing the existing bucket count exactly; otherwise picks
/// the smallest per-bucket fill that keeps the bucket count within the
/// order. Returns `None` when `total` cannot be placed within policy,
/// which means the leaf must split.
pub fn bucket_calc(total: usize, existing: usize, shape: TreeShape) -> Option<BucketDist> {
    if total == 0 {
        return Some(BucketDist {
            buckets: 1,
            per_bucket: 1,
        });
    }

    // Insert paths keep one bucket slot of the leaf in reserve, so a
    // reordered leaf never carries the maximum key count
    let max_buckets = shape.order - 1;

    if existing >= 1 && existing <= max_buckets && existing <= total && total <= existing * shape.fill
    {
        return Some(BucketDist {
            buckets: existing,
            per_bucket: total.div_ceil(existing),
        });
    }

    let per_bucket = total.div_ceil(max_buckets).max(1);
    if per_bucket > shape.fill {
        return None;
    }
    Some(BucketDist {
        buckets: total.div_ceil(per_bucket),
        per_bucket,
    })
}

/// Distribution for a leaf being repacked after a deletion: as few
/// buckets as fit at roughly half capacity, leaving headroom for later
/// inserts.
///
/// The per-bucket target is additionally capped so the leaf keeps at
/// least `min_keys + 1` buckets whenever its entry count allows,
/// because a leaf's key count is its bucket count minus one.
pub fn bucket_calc_delete(total: usize, shape: TreeShape) -> BucketDist {
    if total == 0 {
        return BucketDist {
            buckets: 1,
            per_bucket: 1,
        };
    }

    // Deletions may pack a leaf up to its structural limit of `order`
    // buckets; the reserve slot only matters on the insert side
    let half = ((shape.fill + 1) / 2).max(1);
    let keep_keys = (total / (shape.min_keys() + 1)).max(1);
    let mut per_bucket = half.min(keep_keys);
    if total.div_ceil(per_bucket) > shape.order {
        per_bucket = total.div_ceil(shape.order);
    }
    BucketDist {
        buckets: total.div_ceil(per_bucket),
        per_bucket,
    }
}

/// Halve a key count for a leaf split; each half is then distributed
/// independently through [`bucket_calc`].
pub fn split_halves(total: usize) -> (usize, usize) {
    let left = (total + 1) / 2;
    (left, total - left)
}

/// Chunk sorted entries evenly into `buckets` groups; earlier groups
/// take the remainder.
pub fn distribute<T: Clone>(entries: &[T], buckets: usize) -> Vec<Vec<T>> {
    if entries.is_empty() {
        return vec![Vec::new()];
    }
    let base = entries.len() / buckets;
    let extra = entries.len() % buckets;
    let mut chunks = Vec::with_capacity(buckets);
    let mut at = 0;
    for i in 0..buckets {
        let take = base + usize::from(i < extra);
        chunks.push(entries[at..at + take].to_vec());
        at += take;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(order: usize, fill: usize) -> TreeShape {
        TreeShape::new(order, fill)
    }

    #[test]
    fn test_reuse_existing_bucket_count() {
        // 9 entries across 4 buckets of fill 4: reuse is possible
        let dist = bucket_calc(9, 4, shape(7, 4)).unwrap();
        assert_eq!(dist.buckets, 4);
        assert_eq!(dist.per_bucket, 3);
    }

    #[test]
    fn test_grow_bucket_count_when_reuse_overflows() {
        // 9 entries no longer fit 2 buckets of fill 4
        let dist = bucket_calc(9, 2, shape(7, 4)).unwrap();
        assert!(dist.buckets > 2);
        assert!(dist.buckets <= 7);
        assert!(dist.per_bucket <= 4);
    }

    #[test]
    fn test_calc_bounds_hold() {
        for order in [3usize, 5, 7, 16] {
            for fill in [1usize, 2, 4, 10] {
                let s = shape(order, fill);
                for total in 1..=s.leaf_capacity() {
                    for existing in 0..=order {
                        let dist = bucket_calc(total, existing, s)
                            .unwrap_or_else(|| panic!("{} must fit {:?}", total, s));
                        assert!(dist.buckets <= order);
                        let chunks = distribute(&vec![0u8; total], dist.buckets);
                        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), total);
                        for chunk in &chunks {
                            assert!(!chunk.is_empty());
                            assert!(chunk.len() <= fill);
                        }
                    }
                }
                // One entry past capacity cannot be placed
                assert!(bucket_calc(s.leaf_capacity() + 1, order, s).is_none());
            }
        }
    }

    #[test]
    fn test_delete_repack_leaves_headroom() {
        let s = shape(7, 10);
        let dist = bucket_calc_delete(20, s);
        assert_eq!(dist.per_bucket, 5);
        assert_eq!(dist.buckets, 4);

        // Large totals still respect the order bound
        let dist = bucket_calc_delete(65, s);
        assert!(dist.buckets <= 7);
        assert!(dist.per_bucket <= 10);
    }

    #[test]
    fn test_delete_repack_preserves_min_keys() {
        // 7 entries must not collapse into so few buckets that the
        // leaf's key count drops below the node minimum (3 for order 7)
        let s = shape(7, 10);
        let dist = bucket_calc_delete(7, s);
        assert!(dist.buckets >= s.min_keys() + 1);
        assert!(dist.buckets <= s.order);
    }

    #[test]
    fn test_split_halves() {
        assert_eq!(split_halves(10), (5, 5));
        assert_eq!(split_halves(11), (6, 5));
        assert_eq!(split_halves(1), (1, 0));
    }

    #[test]
    fn test_distribute_empty() {
        let chunks = distribute::<u8>(&[], 1);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }
}

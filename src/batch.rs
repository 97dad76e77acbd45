//! Splitting target lists into per-session chunks.
use std::num::NonZeroUsize;

/// Partition `items` into contiguous runs of at most `chunk_size`, preserving order.
///
/// Only the last chunk may be shorter. An empty input yields no chunks.
pub fn batch<T: Clone>(items: &[T], chunk_size: NonZeroUsize) -> Vec<Vec<T>> {
    items
        .chunks(chunk_size.get())
        .map(<[T]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn splits_into_fives() {
        let items: Vec<u32> = (1..=23).collect();
        let chunks = batch(&items, size(5));
        assert_eq!(
            chunks,
            vec![
                vec![1, 2, 3, 4, 5],
                vec![6, 7, 8, 9, 10],
                vec![11, 12, 13, 14, 15],
                vec![16, 17, 18, 19, 20],
                vec![21, 22, 23],
            ]
        );
    }

    #[test]
    fn empty_input_has_no_chunks() {
        assert!(batch::<u32>(&[], size(7)).is_empty());
    }

    #[test]
    fn concatenation_restores_input() {
        let items: Vec<u32> = (0..101).collect();
        for n in 1..=120 {
            let chunks = batch(&items, size(n));
            assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= n));
            assert_eq!(chunks.concat(), items, "chunk size {n}");
        }
    }

    #[test]
    fn distinct_targets_never_share_a_chunk() {
        let users: Vec<i64> = (1000..1600).collect();
        let chunks = batch(&users, size(500));
        let mut seen = HashSet::new();
        for chunk in &chunks {
            for user in chunk {
                assert!(seen.insert(*user), "user {user} assigned twice");
            }
        }
        assert_eq!(seen.len(), users.len());
    }
}

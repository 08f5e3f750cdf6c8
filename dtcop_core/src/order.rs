//! Zigzag linearization of N-dimensional coefficient grids.
//!
//! Encoder and decoder must build the order from the same chunk shape and
//! flag: a different order silently scrambles coefficients.

use crate::index::element_count;

/// Fixed mapping from linear position to coordinate for one chunk shape.
///
/// Coordinates are sorted by coordinate sum, then sum of squares, then
/// lexicographically, so low frequencies come first. With `zigzag == false`
/// only the lexicographic comparison applies, which is plain row-major order.
///
/// Coordinates live in one flat buffer, `rank` entries per position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateOrder {
    shape: Vec<usize>,
    coordinates: Vec<usize>,
    offsets: Vec<usize>,
}

fn unravel(shape: &[usize], mut offset: usize, out: &mut [usize]) {
    for (slot, &dim) in out.iter_mut().zip(shape).rev() {
        *slot = offset % dim;
        offset /= dim;
    }
}

impl CoordinateOrder {
    pub fn new(shape: &[usize], zigzag: bool) -> Self {
        let rank = shape.len();
        let mut offsets: Vec<usize> = (0..element_count(shape)).collect();
        if zigzag {
            // row-major offset order is lexicographic coordinate order
            let mut coords = vec![0; rank];
            let mut keyed: Vec<(usize, usize, usize)> = offsets
                .iter()
                .map(|&off| {
                    unravel(shape, off, &mut coords);
                    let sum = coords.iter().sum::<usize>();
                    let sum_sq = coords.iter().map(|&x| x * x).sum::<usize>();
                    (sum, sum_sq, off)
                })
                .collect();
            keyed.sort_unstable();
            offsets = keyed.into_iter().map(|(_, _, off)| off).collect();
        }
        let mut coordinates = vec![0; offsets.len() * rank];
        if rank > 0 {
            for (slot, &off) in coordinates.chunks_exact_mut(rank).zip(&offsets) {
                unravel(shape, off, slot);
            }
        }
        Self {
            shape: shape.to_vec(),
            coordinates,
            offsets,
        }
    }

    /// Zigzag order for `shape`, the one every shard uses.
    pub fn zigzag(shape: &[usize]) -> Self {
        Self::new(shape, true)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Coordinate at linear position `i`.
    pub fn coordinates(&self, i: usize) -> &[usize] {
        let rank = self.shape.len();
        &self.coordinates[i * rank..(i + 1) * rank]
    }

    /// Row-major offsets in linear order; `flat_offsets()[i]` is where the
    /// `i`-th coefficient lives in a dense row-major buffer.
    pub fn flat_offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        (0..self.len()).map(move |i| self.coordinates(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{row_major_offset, MultiIndex};

    fn assert_permutation(order: &CoordinateOrder) {
        let n = element_count(order.shape());
        assert_eq!(order.len(), n);
        let mut seen = vec![false; n];
        for &off in order.flat_offsets() {
            assert!(!seen[off], "offset {off} appears twice");
            seen[off] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn order_is_a_bijection() {
        for shape in [
            vec![1],
            vec![5],
            vec![4, 4],
            vec![3, 7],
            vec![4, 4, 4],
            vec![2, 3, 5],
            vec![8, 8, 8],
            vec![2, 2, 2, 3],
        ] {
            assert_permutation(&CoordinateOrder::new(&shape, true));
            assert_permutation(&CoordinateOrder::new(&shape, false));
        }
    }

    #[test]
    fn dc_comes_first_and_highest_frequency_last() {
        let order = CoordinateOrder::zigzag(&[4, 4, 4]);
        assert_eq!(order.coordinates(0), &[0, 0, 0]);
        assert_eq!(order.coordinates(order.len() - 1), &[3, 3, 3]);
    }

    #[test]
    fn ties_break_on_squares_then_lexicographic() {
        let order = CoordinateOrder::zigzag(&[4, 4]);
        let first: Vec<&[usize]> = order.iter().take(6).collect();
        assert_eq!(
            first,
            vec![
                &[0, 0][..],
                &[0, 1][..],
                &[1, 0][..],
                // sum 2: [1,1] has the smaller sum of squares
                &[1, 1][..],
                &[0, 2][..],
                &[2, 0][..],
            ]
        );
    }

    #[test]
    fn without_zigzag_order_is_row_major() {
        let order = CoordinateOrder::new(&[3, 4], false);
        let offsets: Vec<usize> = (0..12).collect();
        assert_eq!(order.flat_offsets(), offsets.as_slice());
    }

    #[test]
    fn flat_store_matches_comparator_sort() {
        for shape in [vec![4, 4, 4], vec![2, 3, 5], vec![7, 3], vec![6]] {
            let mut expected: Vec<Vec<usize>> = MultiIndex::new(&shape).collect();
            expected.sort_by(|a, b| {
                let sum = |c: &[usize]| c.iter().sum::<usize>();
                let sum_sq = |c: &[usize]| c.iter().map(|&x| x * x).sum::<usize>();
                sum(a)
                    .cmp(&sum(b))
                    .then_with(|| sum_sq(a).cmp(&sum_sq(b)))
                    .then_with(|| a.cmp(b))
            });
            let order = CoordinateOrder::zigzag(&shape);
            for (i, coords) in expected.iter().enumerate() {
                assert_eq!(order.coordinates(i), coords.as_slice(), "{shape:?} position {i}");
                assert_eq!(order.flat_offsets()[i], row_major_offset(&shape, coords));
            }
            assert_eq!(order.iter().count(), expected.len());
        }
    }

    #[test]
    fn order_is_deterministic() {
        assert_eq!(
            CoordinateOrder::zigzag(&[6, 5, 4]),
            CoordinateOrder::zigzag(&[6, 5, 4])
        );
    }
}

//! Row-major N-dimensional index helpers.

/// Number of elements in a box of the given shape.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major flat offset of `coords` inside `shape`.
pub fn row_major_offset(shape: &[usize], coords: &[usize]) -> usize {
    debug_assert_eq!(shape.len(), coords.len());
    coords
        .iter()
        .zip(shape)
        .fold(0, |acc, (&c, &extent)| acc * extent + c)
}

/// Row-major strides for `shape` (last axis has stride 1).
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Odometer-style counter over every coordinate of a box, last axis fastest.
///
/// ```
/// use dtcop_core::index::MultiIndex;
/// let coords: Vec<Vec<usize>> = MultiIndex::new(&[2, 2]).collect();
/// assert_eq!(coords, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
/// ```
#[derive(Debug, Clone)]
pub struct MultiIndex {
    shape: Vec<usize>,
    current: Vec<usize>,
    done: bool,
}

impl MultiIndex {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            current: vec![0; shape.len()],
            done: shape.iter().any(|&e| e == 0),
        }
    }

    /// Advance to the next coordinate; returns `false` once the box is exhausted.
    pub fn step(&mut self) -> bool {
        for d in (0..self.shape.len()).rev() {
            self.current[d] += 1;
            if self.current[d] < self.shape[d] {
                return true;
            }
            self.current[d] = 0;
        }
        self.done = true;
        false
    }

    pub fn current(&self) -> &[usize] {
        &self.current
    }
}

impl Iterator for MultiIndex {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let out = self.current.clone();
        self.step();
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odometer_matches_row_major_offsets() {
        let shape = [3, 2, 4];
        for (i, coords) in MultiIndex::new(&shape).enumerate() {
            assert_eq!(row_major_offset(&shape, &coords), i);
        }
        assert_eq!(MultiIndex::new(&shape).count(), 24);
    }

    #[test]
    fn empty_box_yields_nothing() {
        assert_eq!(MultiIndex::new(&[3, 0, 2]).count(), 0);
    }

    #[test]
    fn strides_are_row_major() {
        assert_eq!(strides(&[4, 3, 2]), vec![6, 2, 1]);
        assert_eq!(strides(&[7]), vec![1]);
    }
}

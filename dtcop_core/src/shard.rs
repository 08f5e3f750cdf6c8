//! Partitioning a full grid into chunks.
//!
//! Chunks are addressed by their index in the chunk grid, or by the
//! row-major linear position of that index. A trailing chunk that runs past
//! the array edge is padded to the nominal chunk shape by repeating the last
//! in-bounds sample along each axis.

use crate::array::NdArray;
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::index::{element_count, row_major_offset, strides, MultiIndex};

/// Chunks per axis: `ceil(extent / chunk_extent)`.
pub fn chunk_grid(shape: &[usize], chunk_shape: &[usize]) -> Vec<usize> {
    shape
        .iter()
        .zip(chunk_shape)
        .map(|(&e, &c)| e.div_ceil(c))
        .collect()
}

/// In-bounds extent of the chunk at `index`.
pub fn valid_extent(shape: &[usize], chunk_shape: &[usize], index: &[usize]) -> Vec<usize> {
    index
        .iter()
        .zip(shape.iter().zip(chunk_shape))
        .map(|(&i, (&e, &c))| c.min(e.saturating_sub(i * c)))
        .collect()
}

fn check_index(grid: &[usize], index: &[usize]) -> Result<()> {
    if index.len() != grid.len() || index.iter().zip(grid).any(|(&i, &g)| i >= g) {
        return Err(Error::config(format!(
            "chunk index {index:?} outside grid {grid:?}"
        )));
    }
    Ok(())
}

/// A view of an array as a grid of equally shaped chunks.
#[derive(Debug)]
pub struct Shard<'a> {
    array: &'a NdArray,
    chunk_shape: Vec<usize>,
    grid: Vec<usize>,
}

impl<'a> Shard<'a> {
    pub fn new(array: &'a NdArray, chunk_shape: &[usize]) -> Result<Self> {
        if array.rank() != chunk_shape.len() {
            return Err(Error::config(format!(
                "array rank {} does not match chunk rank {}",
                array.rank(),
                chunk_shape.len()
            )));
        }
        if array.shape().contains(&0) || chunk_shape.contains(&0) {
            return Err(Error::config(format!(
                "zero extent in array shape {:?} or chunk shape {chunk_shape:?}",
                array.shape()
            )));
        }
        Ok(Self {
            array,
            chunk_shape: chunk_shape.to_vec(),
            grid: chunk_grid(array.shape(), chunk_shape),
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.array.shape()
    }

    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunk_shape
    }

    pub fn grid(&self) -> &[usize] {
        &self.grid
    }

    pub fn chunk_count(&self) -> usize {
        element_count(&self.grid)
    }

    pub fn linear_index(&self, index: &[usize]) -> Result<usize> {
        check_index(&self.grid, index)?;
        Ok(row_major_offset(&self.grid, index))
    }

    pub fn chunk_index(&self, linear: usize) -> Result<Vec<usize>> {
        if linear >= self.chunk_count() {
            return Err(Error::config(format!(
                "chunk {linear} out of range (total {})",
                self.chunk_count()
            )));
        }
        Ok(strides(&self.grid)
            .iter()
            .zip(&self.grid)
            .map(|(&s, &g)| (linear / s) % g)
            .collect())
    }

    pub fn chunk_origin(&self, index: &[usize]) -> Result<Vec<usize>> {
        check_index(&self.grid, index)?;
        Ok(index.iter().zip(&self.chunk_shape).map(|(&i, &c)| i * c).collect())
    }

    pub fn valid_extent(&self, index: &[usize]) -> Result<Vec<usize>> {
        check_index(&self.grid, index)?;
        Ok(valid_extent(self.array.shape(), &self.chunk_shape, index))
    }

    /// Copy out the chunk at `index`, clamp-to-edge padded to the chunk shape.
    pub fn extract(&self, index: &[usize]) -> Result<Chunk> {
        let origin = self.chunk_origin(index)?;
        let valid = valid_extent(self.array.shape(), &self.chunk_shape, index);
        let shape = self.array.shape();
        let mut data = Vec::with_capacity(element_count(&self.chunk_shape));
        let mut src = vec![0usize; shape.len()];
        for coords in MultiIndex::new(&self.chunk_shape) {
            for d in 0..coords.len() {
                src[d] = origin[d] + coords[d].min(valid[d] - 1);
            }
            data.push(self.array.get(&src) as f32);
        }
        Chunk::new(&self.chunk_shape, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DataType;

    fn ramp(shape: &[usize]) -> NdArray {
        let n = element_count(shape);
        NdArray::new(shape, DataType::F32, (0..n).map(|v| v as f64).collect()).unwrap()
    }

    #[test]
    fn grid_of_exact_multiple() {
        let array = NdArray::zeros(&[64, 64, 64], DataType::F32);
        let shard = Shard::new(&array, &[32, 32, 32]).unwrap();
        assert_eq!(shard.grid(), &[2, 2, 2]);
        assert_eq!(shard.chunk_count(), 8);
        assert_eq!(shard.chunk_index(5).unwrap(), vec![1, 0, 1]);
        assert_eq!(shard.linear_index(&[1, 0, 1]).unwrap(), 5);
        assert_eq!(shard.chunk_origin(&[1, 1, 0]).unwrap(), vec![32, 32, 0]);
    }

    #[test]
    fn linear_and_grid_indices_agree() {
        let array = NdArray::zeros(&[10, 7, 9], DataType::F32);
        let shard = Shard::new(&array, &[4, 4, 4]).unwrap();
        assert_eq!(shard.grid(), &[3, 2, 3]);
        for linear in 0..shard.chunk_count() {
            let idx = shard.chunk_index(linear).unwrap();
            assert_eq!(shard.linear_index(&idx).unwrap(), linear);
        }
        assert!(shard.chunk_index(18).is_err());
        assert!(shard.linear_index(&[3, 0, 0]).is_err());
    }

    #[test]
    fn trailing_chunk_is_edge_padded() {
        let array = ramp(&[5, 3, 6]);
        let shard = Shard::new(&array, &[4, 4, 4]).unwrap();
        assert_eq!(shard.grid(), &[2, 1, 2]);
        assert_eq!(shard.valid_extent(&[1, 0, 1]).unwrap(), vec![1, 3, 2]);

        let chunk = shard.extract(&[1, 0, 1]).unwrap();
        assert_eq!(chunk.shape(), &[4, 4, 4]);
        // in bounds
        assert_eq!(chunk.get(&[0, 2, 1]) as f64, array.get(&[4, 2, 5]));
        // padded positions repeat the last valid sample on each axis
        assert_eq!(chunk.get(&[3, 3, 3]) as f64, array.get(&[4, 2, 5]));
        assert_eq!(chunk.get(&[2, 0, 0]) as f64, array.get(&[4, 0, 4]));
    }

    #[test]
    fn interior_chunk_is_a_plain_copy() {
        let array = ramp(&[8, 8, 8]);
        let shard = Shard::new(&array, &[4, 4, 4]).unwrap();
        let chunk = shard.extract(&[1, 0, 1]).unwrap();
        for coords in MultiIndex::new(&[4, 4, 4]) {
            let src = [coords[0] + 4, coords[1], coords[2] + 4];
            assert_eq!(chunk.get(&coords) as f64, array.get(&src));
        }
    }

    #[test]
    fn rank_mismatch_and_zero_extent_are_rejected() {
        let array = NdArray::zeros(&[4, 4], DataType::F32);
        assert!(matches!(Shard::new(&array, &[2, 2, 2]), Err(Error::Config(_))));
        assert!(matches!(Shard::new(&array, &[2, 0]), Err(Error::Config(_))));
    }
}

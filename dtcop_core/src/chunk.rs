//! The transform unit: one dense block of samples and the separable DCT.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::{Error, Result};
use crate::index::{element_count, row_major_offset, strides, MultiIndex};
use crate::order::CoordinateOrder;

/// Orthonormal DCT-II basis for one edge length.
///
/// `coefs[n * size + k]` is basis function `k` sampled at `n`.
#[derive(Debug)]
struct Basis {
    size: usize,
    coefs: Vec<f32>,
}

impl Basis {
    fn new(size: usize) -> Self {
        let pn = PI / size as f64;
        let sqrt_size = (size as f64).sqrt();
        let mut coefs = vec![0f32; size * size];
        for k in 0..size {
            let norm = if k == 0 {
                1.0 / sqrt_size
            } else {
                std::f64::consts::SQRT_2 / sqrt_size
            };
            for n in 0..size {
                coefs[n * size + k] = ((pn * (n as f64 + 0.5) * k as f64).cos() * norm) as f32;
            }
        }
        Self { size, coefs }
    }

    fn forward(&self, input: &[f32], output: &mut [f32]) {
        let size = self.size;
        for (k, out) in output.iter_mut().enumerate() {
            let mut sum = 0f64;
            for (n, &x) in input.iter().enumerate() {
                sum += x as f64 * self.coefs[n * size + k] as f64;
            }
            *out = sum as f32;
        }
    }

    fn inverse(&self, input: &[f32], output: &mut [f32]) {
        let size = self.size;
        for (n, out) in output.iter_mut().enumerate() {
            let row = &self.coefs[n * size..(n + 1) * size];
            let mut sum = 0f64;
            for (&x, &c) in input.iter().zip(row) {
                sum += x as f64 * c as f64;
            }
            *out = sum as f32;
        }
    }
}

fn basis(size: usize) -> Arc<Basis> {
    static BASES: OnceLock<Mutex<HashMap<usize, Arc<Basis>>>> = OnceLock::new();
    let cache = BASES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard
        .entry(size)
        .or_insert_with(|| Arc::new(Basis::new(size)))
        .clone()
}

/// How [`Chunk::scale_by`] combines two chunks element-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOp {
    Multiply,
    Divide,
}

/// A dense row-major block of samples.
///
/// The same type carries raw samples, transform coefficients and quantized
/// integers (stored as rounded floats).
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Chunk {
    pub fn new(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let expected = element_count(shape);
        if data.len() != expected {
            return Err(Error::config(format!(
                "chunk shape {:?} needs {} samples, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; element_count(shape)],
        }
    }

    pub fn filled(shape: &[usize], value: f32) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![value; element_count(shape)],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn get(&self, coords: &[usize]) -> f32 {
        self.data[row_major_offset(&self.shape, coords)]
    }

    pub fn set(&mut self, coords: &[usize], value: f32) {
        let off = row_major_offset(&self.shape, coords);
        self.data[off] = value;
    }

    fn check_transform_rank(&self) -> Result<()> {
        match self.rank() {
            2 | 3 => Ok(()),
            r => Err(Error::config(format!(
                "transform supports rank 2 or 3 chunks, got rank {r}"
            ))),
        }
    }

    fn check_same_shape(&self, other: &Chunk) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::config(format!(
                "chunk shape mismatch: {:?} vs {:?}",
                self.shape, other.shape
            )));
        }
        Ok(())
    }

    /// Apply the 1-D transform to every line running along `axis`.
    fn transform_axis(&mut self, axis: usize, inverse: bool) {
        let size = self.shape[axis];
        if size <= 1 {
            return;
        }
        let basis = basis(size);
        let stride = strides(&self.shape)[axis];
        let mut line_shape = self.shape.clone();
        line_shape[axis] = 1;

        let mut line = vec![0f32; size];
        let mut out = vec![0f32; size];
        for coords in MultiIndex::new(&line_shape) {
            let start = row_major_offset(&self.shape, &coords);
            for (k, v) in line.iter_mut().enumerate() {
                *v = self.data[start + k * stride];
            }
            if inverse {
                basis.inverse(&line, &mut out);
            } else {
                basis.forward(&line, &mut out);
            }
            for (k, &v) in out.iter().enumerate() {
                self.data[start + k * stride] = v;
            }
        }
    }

    /// Forward separable DCT-II, innermost axis first.
    pub fn forward_dct(&mut self) -> Result<()> {
        self.check_transform_rank()?;
        for axis in (0..self.rank()).rev() {
            self.transform_axis(axis, false);
        }
        Ok(())
    }

    /// Inverse of [`Chunk::forward_dct`].
    pub fn inverse_dct(&mut self) -> Result<()> {
        self.check_transform_rank()?;
        for axis in (0..self.rank()).rev() {
            self.transform_axis(axis, true);
        }
        Ok(())
    }

    /// Round every element to the nearest integer. No range check.
    pub fn round(&mut self) {
        for v in &mut self.data {
            *v = v.round();
        }
    }

    /// `v = v * scale + offset` for every element.
    pub fn scale(&mut self, scale: f64, offset: f64) {
        for v in &mut self.data {
            *v = (*v as f64 * scale + offset) as f32;
        }
    }

    /// Element-wise multiply or divide by `other`, optionally rounding.
    pub fn scale_by(&mut self, other: &Chunk, op: ScaleOp, round: bool) -> Result<()> {
        self.check_same_shape(other)?;
        for (v, &d) in self.data.iter_mut().zip(&other.data) {
            let mut x = match op {
                ScaleOp::Multiply => *v as f64 * d as f64,
                ScaleOp::Divide => *v as f64 / d as f64,
            };
            if round {
                x = x.round();
            }
            *v = x as f32;
        }
        Ok(())
    }

    /// Divide by `other`, round, multiply back: the precision loss of
    /// quantizing with `other` without producing integer coefficients.
    pub fn round_trip_scale(&mut self, other: &Chunk) -> Result<()> {
        self.check_same_shape(other)?;
        for (v, &d) in self.data.iter_mut().zip(&other.data) {
            let d = d as f64;
            *v = ((*v as f64 / d).round() * d) as f32;
        }
        Ok(())
    }

    /// In-place `self - other`.
    pub fn diff(&mut self, other: &Chunk) -> Result<()> {
        self.check_same_shape(other)?;
        for (v, &o) in self.data.iter_mut().zip(&other.data) {
            *v -= o;
        }
        Ok(())
    }

    /// Largest absolute element-wise difference; the codec's error metric.
    pub fn max_abs_diff(&self, other: &Chunk) -> Result<f64> {
        self.check_same_shape(other)?;
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| (a as f64 - b as f64).abs())
            .fold(0.0, f64::max))
    }

    /// Values in the order's linear sequence.
    pub fn to_linear(&self, order: &CoordinateOrder) -> Result<Vec<f32>> {
        if order.shape() != self.shape.as_slice() {
            return Err(Error::config(format!(
                "order shape {:?} does not match chunk shape {:?}",
                order.shape(),
                self.shape
            )));
        }
        Ok(order.flat_offsets().iter().map(|&o| self.data[o]).collect())
    }

    /// Rebuild a chunk from values in the order's linear sequence.
    pub fn from_linear(values: &[f32], order: &CoordinateOrder) -> Result<Self> {
        if values.len() != order.len() {
            return Err(Error::config(format!(
                "{} values for an order of length {}",
                values.len(),
                order.len()
            )));
        }
        let mut chunk = Chunk::zeros(order.shape());
        for (&v, &o) in values.iter().zip(order.flat_offsets()) {
            chunk.data[o] = v;
        }
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg_chunk(shape: &[usize], seed: u64, amplitude: f32) -> Chunk {
        let mut rng = seed;
        let data = (0..element_count(shape))
            .map(|_| {
                rng = rng
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((rng >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * amplitude
            })
            .collect();
        Chunk::new(shape, data).unwrap()
    }

    #[test]
    fn dct_round_trip_is_lossless_within_float_noise() {
        for shape in [vec![8, 8], vec![4, 4, 4], vec![16, 16, 16], vec![4, 8, 6]] {
            let original = lcg_chunk(&shape, 7, 200.0);
            let mut c = original.clone();
            c.forward_dct().unwrap();
            c.inverse_dct().unwrap();
            let err = c.max_abs_diff(&original).unwrap();
            assert!(err < 1e-3, "shape {shape:?} round-trip error {err}");
        }
    }

    #[test]
    fn constant_chunk_has_only_dc_energy() {
        let mut c = Chunk::filled(&[8, 8, 8], 3.0);
        c.forward_dct().unwrap();
        // orthonormal scaling: DC = mean * sqrt(N^3)
        let expected_dc = 3.0 * (512f32).sqrt();
        assert!((c.data()[0] - expected_dc).abs() < 1e-3);
        assert!(c.data()[1..].iter().all(|v| v.abs() < 1e-4));
    }

    #[test]
    fn transform_preserves_energy() {
        let original = lcg_chunk(&[8, 8, 8], 99, 10.0);
        let mut c = original.clone();
        c.forward_dct().unwrap();
        let e0: f64 = original.data().iter().map(|&v| (v as f64).powi(2)).sum();
        let e1: f64 = c.data().iter().map(|&v| (v as f64).powi(2)).sum();
        assert!((e0 - e1).abs() / e0 < 1e-5);
    }

    #[test]
    fn unsupported_rank_fails_fast() {
        let mut c = Chunk::zeros(&[4]);
        assert!(matches!(c.forward_dct(), Err(Error::Config(_))));
        let mut c = Chunk::zeros(&[2, 2, 2, 2]);
        assert!(matches!(c.inverse_dct(), Err(Error::Config(_))));
    }

    #[test]
    fn elementwise_helpers() {
        let mut a = Chunk::new(&[2, 2], vec![1.25, -2.75, 7.0, 9.0]).unwrap();
        let d = Chunk::new(&[2, 2], vec![1.0, 1.0, 2.0, 4.0]).unwrap();

        let mut rt = a.clone();
        rt.round_trip_scale(&d).unwrap();
        assert_eq!(rt.data(), &[1.0, -3.0, 8.0, 8.0]);

        let mut q = a.clone();
        q.scale_by(&d, ScaleOp::Divide, true).unwrap();
        assert_eq!(q.data(), &[1.0, -3.0, 4.0, 2.0]);
        q.scale_by(&d, ScaleOp::Multiply, false).unwrap();
        assert_eq!(q.data(), rt.data());

        assert_eq!(a.max_abs_diff(&rt).unwrap(), 1.0);

        a.scale(2.0, 1.0);
        assert_eq!(a.data(), &[3.5, -4.5, 15.0, 19.0]);
        a.round();
        assert_eq!(a.data(), &[4.0, -5.0, 15.0, 19.0]);

        a.diff(&d).unwrap();
        assert_eq!(a.data(), &[3.0, -6.0, 13.0, 15.0]);

        let wrong = Chunk::zeros(&[4]);
        assert!(a.diff(&wrong).is_err());
    }

    #[test]
    fn linear_round_trip_through_order() {
        let c = lcg_chunk(&[3, 4, 5], 1, 1.0);
        let order = CoordinateOrder::zigzag(&[3, 4, 5]);
        let linear = c.to_linear(&order).unwrap();
        assert_eq!(linear[0], c.get(&[0, 0, 0]));
        let back = Chunk::from_linear(&linear, &order).unwrap();
        assert_eq!(back, c);
    }
}

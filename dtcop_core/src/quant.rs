//! Quantization tables and the coarse-to-fine search that picks one per chunk.
//!
//! A table divides each transform coefficient by a polynomial of its distance
//! from the origin, so low frequencies are kept finely and high frequencies
//! coarsely. The DC coefficient (the origin) is never quantized: it travels
//! raw in the chunk stream.

use log::trace;

use crate::chunk::{Chunk, ScaleOp};
use crate::error::{Error, Result};
use crate::index::MultiIndex;

/// A divisor grid derived from a polynomial of distance-from-origin.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantTable {
    index: usize,
    polynomial: Vec<f32>,
    divisors: Chunk,
}

impl QuantTable {
    /// Build the table for `shape`; `index` is its position in a catalog.
    pub fn new(shape: &[usize], polynomial: &[f32], index: usize) -> Result<Self> {
        if polynomial.is_empty() || polynomial.len() > u8::MAX as usize {
            return Err(Error::config(format!(
                "quantization polynomial must have 1..=255 coefficients, got {}",
                polynomial.len()
            )));
        }
        let mut divisors = Chunk::zeros(shape);
        for coords in MultiIndex::new(shape) {
            let dist = coords.iter().map(|&c| (c * c) as f64).sum::<f64>().sqrt();
            let mut x = 1.0;
            let mut sum = polynomial[0] as f64;
            for &p in &polynomial[1..] {
                x *= dist;
                sum += x * p as f64;
            }
            let value = sum as f32;
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::config(format!(
                    "quantization polynomial {polynomial:?} yields divisor {value} at {coords:?}"
                )));
            }
            divisors.set(&coords, value);
        }
        Ok(Self {
            index,
            polynomial: polynomial.to_vec(),
            divisors,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn polynomial(&self) -> &[f32] {
        &self.polynomial
    }

    pub fn shape(&self) -> &[usize] {
        self.divisors.shape()
    }

    pub fn divisors(&self) -> &Chunk {
        &self.divisors
    }

    /// Run `op` on every coefficient except the DC one.
    fn apply_ac(&self, coeffs: &mut Chunk, op: impl FnOnce(&mut Chunk) -> Result<()>) -> Result<()> {
        let dc = coeffs.data().first().copied();
        op(coeffs)?;
        if let Some(dc) = dc {
            coeffs.data_mut()[0] = dc;
        }
        Ok(())
    }

    /// Divide AC coefficients by the table and round them to integers.
    pub fn quantize(&self, coeffs: &mut Chunk) -> Result<()> {
        self.apply_ac(coeffs, |c| c.scale_by(&self.divisors, ScaleOp::Divide, true))
    }

    /// Multiply AC coefficients back through the table.
    pub fn dequantize(&self, coeffs: &mut Chunk) -> Result<()> {
        self.apply_ac(coeffs, |c| c.scale_by(&self.divisors, ScaleOp::Multiply, false))
    }

    /// Quantize then dequantize in one step, leaving real-valued coefficients.
    pub fn simulate(&self, coeffs: &mut Chunk) -> Result<()> {
        self.apply_ac(coeffs, |c| c.round_trip_scale(&self.divisors))
    }
}

/// Outcome of [`QuantCatalog::select`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub table_index: usize,
    /// Max-abs reconstruction error with the selected table.
    pub error: f64,
}

/// Ordered catalog of quantization tables, coarsest first.
#[derive(Debug, Clone)]
pub struct QuantCatalog {
    shape: Vec<usize>,
    tables: Vec<QuantTable>,
}

impl QuantCatalog {
    /// Build a catalog from polynomials listed coarse to fine.
    pub fn from_polynomials(shape: &[usize], polynomials: &[Vec<f32>]) -> Result<Self> {
        if polynomials.is_empty() {
            return Err(Error::config("quantization catalog is empty"));
        }
        let tables = polynomials
            .iter()
            .enumerate()
            .map(|(i, p)| QuantTable::new(shape, p, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            shape: shape.to_vec(),
            tables,
        })
    }

    /// The built-in 18-table catalog, scaled for 32-wide chunks.
    pub fn standard(shape: &[usize]) -> Result<Self> {
        let s = std::f32::consts::SQRT_2.powi(15);
        let polynomials = vec![
            vec![s * 3.0, 40.0, 50.0],
            vec![s * 3.0, 30.0, 40.0],
            vec![s * 2.0, 30.0, 30.0],
            vec![s * 2.0, 25.0, 20.0],
            vec![s * 2.0, 20.0, 10.0],
            vec![s * 1.5, 20.0],
            vec![s * 1.5, 15.0],
            vec![s * 1.5, 10.0],
            vec![s, 8.0],
            vec![s, 4.0],
            vec![s, 2.0],
            vec![s, 1.0],
            vec![s],
            vec![s / 1.5],
            vec![s / 2.0],
            vec![s / 3.0],
            vec![s / 4.0],
            vec![s / 5.0],
        ];
        Self::from_polynomials(shape, &polynomials)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QuantTable> {
        self.tables.get(index)
    }

    pub fn tables(&self) -> &[QuantTable] {
        &self.tables
    }

    /// Find the coarsest table whose reconstruction error is strictly below
    /// `max_error`.
    ///
    /// `transformed` must be the forward transform of `original`. Fails with
    /// [`Error::ErrorBoundUnreachable`] when even the finest table is too coarse.
    pub fn select(&self, original: &Chunk, transformed: &Chunk, max_error: f64) -> Result<Selection> {
        if original.shape() != self.shape.as_slice() {
            return Err(Error::config(format!(
                "chunk shape {:?} does not match catalog shape {:?}",
                original.shape(),
                self.shape
            )));
        }
        let mut best = f64::INFINITY;
        for table in &self.tables {
            let mut candidate = transformed.clone();
            table.simulate(&mut candidate)?;
            candidate.inverse_dct()?;
            let error = candidate.max_abs_diff(original)?;
            trace!("table {} -> error {:.6} (bound {})", table.index, error, max_error);
            if error < max_error {
                return Ok(Selection {
                    table_index: table.index,
                    error,
                });
            }
            best = best.min(error);
        }
        Err(Error::ErrorBoundUnreachable { max_error, best })
    }
}

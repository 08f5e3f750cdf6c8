//! Per-chunk encode and decode pipeline.
//!
//! Encoding is split in two so a whole shard can share one Huffman table:
//! [`EncodedChunk::encode`] transforms, quantizes and tokenizes a chunk while
//! feeding the shard histogram, and [`EncodedChunk::to_bytes`] packs the
//! tokens once the table exists.
//!
//! # Chunk stream layout (bit-packed, MSB first)
//! ```text
//! rank:8  shape[d]:8 × rank
//! poly_len:8  poly[i]:32 × poly_len      (f32 bit patterns)
//! dc:32                                   (f32 bit pattern, never quantized)
//! AC tokens until every position of the order is filled:
//!   value        -> Huffman code of the value
//!   zero run ≤22 -> Huffman code of 0, repeated
//!   zero run >22 -> Huffman code of ESCAPE_SYMBOL, then run:16
//! zero padding to a byte boundary
//! ```

use log::trace;

use crate::bits::{BitReader, BitWriter};
use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::huffman::{Histogram, Huffman};
use crate::order::CoordinateOrder;
use crate::quant::{QuantCatalog, QuantTable};

/// Smallest quantized AC value that can be coded.
pub const MIN_VALUE: i32 = -32767;
/// Largest quantized AC value that can be coded.
pub const MAX_VALUE: i32 = 32767;
/// Reserved symbol announcing a long zero run with an explicit 16-bit length.
pub const ESCAPE_SYMBOL: i32 = -32768;
/// Longest zero run coded inline as repeated zero symbols.
pub const MAX_ZERO_RUN: usize = 22;

const MAX_ESCAPED_RUN: usize = u16::MAX as usize;

/// One entry of a chunk's AC symbol sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Value(i32),
    /// `n` zeros written as `n` zero symbols (`n ≤ MAX_ZERO_RUN`).
    ZeroRun(u8),
    /// `n` zeros written as the escape symbol plus a literal length.
    Escape(u16),
}

/// A chunk after transform, quantization and tokenization, waiting for the
/// shard's shared Huffman table.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    shape: Vec<usize>,
    table_index: usize,
    polynomial: Vec<f32>,
    dc: f32,
    tokens: Vec<Token>,
    error: f64,
}

fn push_zero_run(mut run: usize, tokens: &mut Vec<Token>, histogram: &mut Histogram) {
    while run > 0 {
        let piece = run.min(MAX_ESCAPED_RUN);
        if piece > MAX_ZERO_RUN {
            tokens.push(Token::Escape(piece as u16));
            histogram.update(ESCAPE_SYMBOL);
        } else {
            tokens.push(Token::ZeroRun(piece as u8));
            histogram.update_by(0, piece as u64);
        }
        run -= piece;
    }
}

fn check_chunk_shape(shape: &[usize]) -> Result<()> {
    if shape.len() > u8::MAX as usize || shape.iter().any(|&e| e == 0 || e > u8::MAX as usize) {
        return Err(Error::config(format!(
            "chunk shape {shape:?} cannot be stored: every edge must be 1..=255"
        )));
    }
    Ok(())
}

impl EncodedChunk {
    /// Transform `chunk`, pick the coarsest table meeting `max_error`,
    /// quantize and tokenize the AC coefficients in `order`, recording every
    /// emitted symbol in `histogram`.
    pub fn encode(
        chunk: &Chunk,
        catalog: &QuantCatalog,
        max_error: f64,
        order: &CoordinateOrder,
        histogram: &mut Histogram,
    ) -> Result<Self> {
        check_chunk_shape(chunk.shape())?;
        if order.shape() != chunk.shape() {
            return Err(Error::config(format!(
                "order shape {:?} does not match chunk shape {:?}",
                order.shape(),
                chunk.shape()
            )));
        }

        let mut coeffs = chunk.clone();
        coeffs.forward_dct()?;
        let selection = catalog.select(chunk, &coeffs, max_error)?;
        let table = catalog
            .get(selection.table_index)
            .ok_or_else(|| Error::config("selected table missing from catalog"))?;
        table.quantize(&mut coeffs)?;

        let linear = coeffs.to_linear(order)?;
        let dc = linear[0];

        let mut tokens = Vec::new();
        let mut run = 0usize;
        for &v in &linear[1..] {
            if v == 0.0 {
                run += 1;
                continue;
            }
            if !(v >= MIN_VALUE as f32 && v <= MAX_VALUE as f32) {
                return Err(Error::Range {
                    value: v as i64,
                    min: MIN_VALUE,
                    max: MAX_VALUE,
                });
            }
            push_zero_run(run, &mut tokens, histogram);
            run = 0;
            let value = v as i32;
            tokens.push(Token::Value(value));
            histogram.update(value);
        }
        push_zero_run(run, &mut tokens, histogram);

        trace!(
            "chunk encoded with table {} (error {:.6}), {} tokens",
            selection.table_index,
            selection.error,
            tokens.len()
        );

        Ok(Self {
            shape: chunk.shape().to_vec(),
            table_index: selection.table_index,
            polynomial: table.polynomial().to_vec(),
            dc,
            tokens,
            error: selection.error,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Catalog index of the quantization table that was selected.
    pub fn table_index(&self) -> usize {
        self.table_index
    }

    pub fn polynomial(&self) -> &[f32] {
        &self.polynomial
    }

    /// The raw DC coefficient stored in the stream.
    pub fn dc(&self) -> f32 {
        self.dc
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Max-abs reconstruction error of this chunk.
    pub fn error(&self) -> f64 {
        self.error
    }

    /// Pack the chunk stream using the shard's shared table.
    pub fn to_bytes(&self, huffman: &Huffman) -> Result<Vec<u8>> {
        let mut w = BitWriter::with_capacity(16 + self.tokens.len());
        w.write_bits(self.shape.len() as u64, 8);
        for &extent in &self.shape {
            w.write_bits(extent as u64, 8);
        }
        w.write_bits(self.polynomial.len() as u64, 8);
        for &p in &self.polynomial {
            w.write_bits(p.to_bits() as u64, 32);
        }
        w.write_bits(self.dc.to_bits() as u64, 32);

        for &token in &self.tokens {
            match token {
                Token::Value(v) => huffman.write_symbol(&mut w, v)?,
                Token::ZeroRun(n) => huffman.write_repeated(&mut w, 0, n as usize)?,
                Token::Escape(n) => {
                    huffman.write_symbol(&mut w, ESCAPE_SYMBOL)?;
                    w.write_bits(n as u64, 16);
                }
            }
        }
        Ok(w.finish())
    }
}

/// The fixed-width prefix of a chunk stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInfo {
    pub shape: Vec<usize>,
    pub polynomial: Vec<f32>,
    pub dc: f32,
}

fn read_info(r: &mut BitReader<'_>) -> Result<ChunkInfo> {
    let rank = r.read_u8()? as usize;
    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        shape.push(r.read_u8()? as usize);
    }
    let poly_len = r.read_u8()? as usize;
    if poly_len == 0 {
        return Err(Error::format("chunk stream has an empty quantization polynomial"));
    }
    let mut polynomial = Vec::with_capacity(poly_len);
    for _ in 0..poly_len {
        polynomial.push(f32::from_bits(r.read_u32()?));
    }
    let dc = f32::from_bits(r.read_u32()?);
    Ok(ChunkInfo {
        shape,
        polynomial,
        dc,
    })
}

/// Parse only the shape, polynomial and DC coefficient of a chunk stream.
pub fn read_chunk_info(bytes: &[u8]) -> Result<ChunkInfo> {
    read_info(&mut BitReader::new(bytes))
}

/// Decode one chunk stream back to samples.
///
/// `order` must be the order the encoder used for this chunk shape.
pub fn decode_chunk(bytes: &[u8], huffman: &Huffman, order: &CoordinateOrder) -> Result<Chunk> {
    let mut r = BitReader::new(bytes);
    let info = read_info(&mut r)?;
    if info.shape != order.shape() {
        return Err(Error::format(format!(
            "chunk stream shape {:?} does not match the shard chunk shape {:?}",
            info.shape,
            order.shape()
        )));
    }
    let table = QuantTable::new(&info.shape, &info.polynomial, 0)
        .map_err(|e| Error::format(format!("chunk stream carries an unusable polynomial: {e}")))?;

    let size = order.len();
    let mut linear = vec![0f32; size];
    linear[0] = info.dc;
    if size > 1 && huffman.is_empty() {
        return Err(Error::format("chunk has AC coefficients but the entropy table is empty"));
    }

    let mut idx = 1;
    while idx < size {
        let exhausted = |_| Error::Exhausted {
            filled: idx,
            expected: size,
        };
        let symbol = huffman.read_symbol(&mut r).map_err(exhausted)?;
        if symbol == ESCAPE_SYMBOL {
            let run = r.read_u16().map_err(exhausted)? as usize;
            if idx + run > size {
                return Err(Error::format(format!(
                    "zero run of {run} at position {idx} overflows {size} coefficients"
                )));
            }
            idx += run;
        } else {
            linear[idx] = symbol as f32;
            idx += 1;
        }
    }

    let mut chunk = Chunk::from_linear(&linear, order)?;
    table.dequantize(&mut chunk)?;
    chunk.inverse_dct()?;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{element_count, MultiIndex};

    fn smooth_chunk(shape: &[usize], seed: u64) -> Chunk {
        let mut rng = seed;
        let mut c = Chunk::zeros(shape);
        for coords in MultiIndex::new(shape) {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let noise = ((rng >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 40.0;
            let (z, y, x) = (coords[0] as f32, coords[1] as f32, coords[2] as f32);
            // packed-integer scale, like a scale_factor encoded temperature
            let v = 20000.0 + 3000.0 * (x * 0.2).sin() + 1500.0 * (y * 0.15).cos() + 40.0 * z + noise;
            c.set(&coords, v);
        }
        c
    }

    fn encode_one(chunk: &Chunk, catalog: &QuantCatalog, max_error: f64) -> (Vec<u8>, Huffman, EncodedChunk) {
        let order = CoordinateOrder::zigzag(chunk.shape());
        let mut histogram = Histogram::new();
        let encoded = EncodedChunk::encode(chunk, catalog, max_error, &order, &mut histogram).unwrap();
        let huffman = histogram.build_huffman().unwrap();
        let bytes = encoded.to_bytes(&huffman).unwrap();
        (bytes, huffman, encoded)
    }

    #[test]
    fn round_trip_stays_within_bound() {
        let shape = [16, 16, 16];
        let catalog = QuantCatalog::standard(&shape).unwrap();
        let order = CoordinateOrder::zigzag(&shape);
        for (seed, max_error) in [(1, 80.0), (2, 150.0), (3, 300.0)] {
            let original = smooth_chunk(&shape, seed);
            let (bytes, huffman, encoded) = encode_one(&original, &catalog, max_error);
            let decoded = decode_chunk(&bytes, &huffman, &order).unwrap();
            let err = decoded.max_abs_diff(&original).unwrap();
            assert!(err < max_error, "seed {seed}: error {err} >= {max_error}");
            assert!((err - encoded.error()).abs() < 1e-9);
        }
    }

    #[test]
    fn dc_is_bit_exact() {
        let shape = [8, 8, 8];
        let catalog = QuantCatalog::standard(&shape).unwrap();
        let original = smooth_chunk(&shape, 9);
        let mut coeffs = original.clone();
        coeffs.forward_dct().unwrap();

        let (bytes, _, encoded) = encode_one(&original, &catalog, 150.0);
        assert_eq!(encoded.dc().to_bits(), coeffs.data()[0].to_bits());
        let info = read_chunk_info(&bytes).unwrap();
        assert_eq!(info.dc.to_bits(), coeffs.data()[0].to_bits());
        assert_eq!(info.shape, vec![8, 8, 8]);
        assert_eq!(info.polynomial, encoded.polynomial());
    }

    #[test]
    fn constant_chunk_is_a_single_escape_run() {
        let shape = [16, 16, 16];
        let catalog = QuantCatalog::standard(&shape).unwrap();
        let order = CoordinateOrder::zigzag(&shape);
        let original = Chunk::filled(&shape, 273.25);

        let mut histogram = Histogram::new();
        let encoded = EncodedChunk::encode(&original, &catalog, 0.1, &order, &mut histogram).unwrap();
        assert_eq!(histogram.symbol_count(), 1);
        assert_eq!(histogram.frequency(ESCAPE_SYMBOL), 1);
        assert_eq!(encoded.tokens(), &[Token::Escape((element_count(&shape) - 1) as u16)]);
        assert_eq!(encoded.table_index(), 0);

        let huffman = histogram.build_huffman().unwrap();
        let bytes = encoded.to_bytes(&huffman).unwrap();
        let decoded = decode_chunk(&bytes, &huffman, &order).unwrap();
        assert!(decoded.data().iter().all(|&v| v == 273.25));
    }

    #[test]
    fn short_zero_runs_are_inline() {
        let mut histogram = Histogram::new();
        let mut tokens = Vec::new();
        push_zero_run(MAX_ZERO_RUN, &mut tokens, &mut histogram);
        push_zero_run(MAX_ZERO_RUN + 1, &mut tokens, &mut histogram);
        push_zero_run(MAX_ESCAPED_RUN + 3, &mut tokens, &mut histogram);
        assert_eq!(
            tokens,
            vec![
                Token::ZeroRun(22),
                Token::Escape(23),
                Token::Escape(u16::MAX),
                Token::ZeroRun(3),
            ]
        );
        assert_eq!(histogram.frequency(0), 25);
        assert_eq!(histogram.frequency(ESCAPE_SYMBOL), 2);
    }

    #[test]
    fn out_of_range_coefficient_aborts() {
        let shape = [4, 4, 4];
        let mut original = Chunk::zeros(&shape);
        original.set(&[1, 2, 3], 1.0e6);
        let catalog = QuantCatalog::from_polynomials(&shape, &[vec![0.001]]).unwrap();
        let order = CoordinateOrder::zigzag(&shape);
        let mut histogram = Histogram::new();
        let err = EncodedChunk::encode(&original, &catalog, 1.0, &order, &mut histogram).unwrap_err();
        assert!(matches!(err, Error::Range { .. }), "{err:?}");
    }

    #[test]
    fn truncated_stream_is_exhausted() {
        let shape = [8, 8, 8];
        let catalog = QuantCatalog::standard(&shape).unwrap();
        let order = CoordinateOrder::zigzag(&shape);
        let original = smooth_chunk(&shape, 4);
        let (bytes, huffman, encoded) = encode_one(&original, &catalog, 80.0);
        let header_len = 1 + 3 + 1 + 4 * encoded.polynomial().len() + 4;
        assert!(bytes.len() > header_len + 2);

        match decode_chunk(&bytes[..header_len + 1], &huffman, &order) {
            Err(Error::Exhausted { filled, expected }) => {
                assert!(filled < expected);
                assert_eq!(expected, 512);
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert!(matches!(
            decode_chunk(&bytes[..3], &huffman, &order),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn mismatched_order_shape_is_rejected() {
        let shape = [8, 8, 8];
        let catalog = QuantCatalog::standard(&shape).unwrap();
        let (bytes, huffman, _) = encode_one(&smooth_chunk(&shape, 5), &catalog, 150.0);
        let other = CoordinateOrder::zigzag(&[4, 4, 4]);
        assert!(matches!(decode_chunk(&bytes, &huffman, &other), Err(Error::Format(_))));
    }
}

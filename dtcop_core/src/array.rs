//! Dense N-dimensional array record.
//!
//! Samples are held as `f64` regardless of the declared element type; the
//! [`DataType`] tag only matters when the array is serialized. Integers wider
//! than 53 bits lose precision on the way in.
//!
//! # Record layout (big-endian)
//! ```text
//! magic[4] = "NDA1"
//! dtype:u8  rank:u8  shape[rank]:u64
//! elements in row-major order, each in the dtype's width
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::index::{element_count, row_major_offset};

pub const ARRAY_MAGIC: &[u8; 4] = b"NDA1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    F32,
    F64,
}

impl DataType {
    pub const ALL: [DataType; 9] = [
        DataType::I8,
        DataType::U8,
        DataType::I16,
        DataType::U16,
        DataType::I32,
        DataType::U32,
        DataType::I64,
        DataType::F32,
        DataType::F64,
    ];

    /// Tag stored in the record.
    pub fn code(self) -> u8 {
        match self {
            DataType::I8 => 0,
            DataType::U8 => 1,
            DataType::I16 => 2,
            DataType::U16 => 3,
            DataType::I32 => 4,
            DataType::U32 => 5,
            DataType::I64 => 6,
            DataType::F32 => 7,
            DataType::F64 => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::I8 => "i8",
            DataType::U8 => "u8",
            DataType::I16 => "i16",
            DataType::U16 => "u16",
            DataType::I32 => "i32",
            DataType::U32 => "u32",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }

    /// Width of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 => 8,
        }
    }

    fn write_be(self, v: f64, out: &mut Vec<u8>) {
        match self {
            DataType::I8 => out.extend_from_slice(&(v as i8).to_be_bytes()),
            DataType::U8 => out.extend_from_slice(&(v as u8).to_be_bytes()),
            DataType::I16 => out.extend_from_slice(&(v as i16).to_be_bytes()),
            DataType::U16 => out.extend_from_slice(&(v as u16).to_be_bytes()),
            DataType::I32 => out.extend_from_slice(&(v as i32).to_be_bytes()),
            DataType::U32 => out.extend_from_slice(&(v as u32).to_be_bytes()),
            DataType::I64 => out.extend_from_slice(&(v as i64).to_be_bytes()),
            DataType::F32 => out.extend_from_slice(&(v as f32).to_be_bytes()),
            DataType::F64 => out.extend_from_slice(&v.to_be_bytes()),
        }
    }

    /// Decode one element; `bytes.len()` must equal `self.size()`.
    fn read(self, bytes: &[u8], big_endian: bool) -> f64 {
        macro_rules! decode {
            ($t:ty) => {{
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                if big_endian {
                    <$t>::from_be_bytes(buf) as f64
                } else {
                    <$t>::from_le_bytes(buf) as f64
                }
            }};
        }
        match self {
            DataType::I8 => decode!(i8),
            DataType::U8 => decode!(u8),
            DataType::I16 => decode!(i16),
            DataType::U16 => decode!(u16),
            DataType::I32 => decode!(i32),
            DataType::U32 => decode!(u32),
            DataType::I64 => decode!(i64),
            DataType::F32 => decode!(f32),
            DataType::F64 => decode!(f64),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::config(format!("unknown data type '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    dtype: DataType,
    data: Vec<f64>,
}

impl NdArray {
    pub fn new(shape: &[usize], dtype: DataType, data: Vec<f64>) -> Result<Self> {
        let expected = element_count(shape);
        if data.len() != expected {
            return Err(Error::config(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            dtype,
            data,
        })
    }

    pub fn zeros(shape: &[usize], dtype: DataType) -> Self {
        Self {
            shape: shape.to_vec(),
            dtype,
            data: vec![0.0; element_count(shape)],
        }
    }

    pub fn from_f32(shape: &[usize], data: &[f32]) -> Result<Self> {
        Self::new(shape, DataType::F32, data.iter().map(|&v| v as f64).collect())
    }

    /// Build from raw little-endian samples, the layout of a plain `.bin` dump.
    pub fn from_le_bytes(shape: &[usize], dtype: DataType, bytes: &[u8]) -> Result<Self> {
        let expected = element_count(shape) * dtype.size();
        if bytes.len() != expected {
            return Err(Error::config(format!(
                "shape {shape:?} of {dtype} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(dtype.size())
            .map(|b| dtype.read(b, false))
            .collect();
        Self::new(shape, dtype, data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn get(&self, coords: &[usize]) -> f64 {
        self.data[row_major_offset(&self.shape, coords)]
    }

    pub fn set(&mut self, coords: &[usize], value: f64) {
        let offset = row_major_offset(&self.shape, coords);
        self.data[offset] = value;
    }

    /// Serialize as an `NDA1` record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.rank() > u8::MAX as usize {
            return Err(Error::config(format!("rank {} does not fit the record", self.rank())));
        }
        let mut out = Vec::with_capacity(6 + 8 * self.rank() + self.len() * self.dtype.size());
        out.extend_from_slice(ARRAY_MAGIC);
        out.push(self.dtype.code());
        out.push(self.rank() as u8);
        for &extent in &self.shape {
            out.extend_from_slice(&(extent as u64).to_be_bytes());
        }
        for &v in &self.data {
            self.dtype.write_be(v, &mut out);
        }
        Ok(out)
    }

    /// Parse an `NDA1` record. Trailing bytes are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 || &bytes[..4] != ARRAY_MAGIC {
            return Err(Error::format("not an NDA1 array record"));
        }
        let dtype = DataType::from_code(bytes[4])
            .ok_or_else(|| Error::format(format!("unknown data type tag {}", bytes[4])))?;
        let rank = bytes[5] as usize;
        let body = &bytes[6..];
        if body.len() < rank * 8 {
            return Err(Error::format("array record truncated in shape"));
        }
        let mut shape = Vec::with_capacity(rank);
        for raw in body[..rank * 8].chunks_exact(8) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(raw);
            let extent = usize::try_from(u64::from_be_bytes(buf))
                .map_err(|_| Error::format("array extent does not fit in memory"))?;
            shape.push(extent);
        }
        let elements = &body[rank * 8..];
        let expected = shape
            .iter()
            .try_fold(dtype.size(), |acc, &e| acc.checked_mul(e))
            .ok_or_else(|| Error::format("array record shape overflows"))?;
        if elements.len() != expected {
            return Err(Error::format(format!(
                "array record holds {} element bytes, shape {shape:?} of {dtype} needs {expected}",
                elements.len()
            )));
        }
        let data = elements
            .chunks_exact(dtype.size())
            .map(|b| dtype.read(b, true))
            .collect();
        Self::new(&shape, dtype, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip_every_type() {
        for dtype in DataType::ALL {
            let data = vec![0.0, 1.0, 2.0, 100.0, 7.0, 42.0];
            let array = NdArray::new(&[2, 3], dtype, data).unwrap();
            let bytes = array.to_bytes().unwrap();
            assert_eq!(bytes.len(), 6 + 16 + 6 * dtype.size());
            assert_eq!(NdArray::from_bytes(&bytes).unwrap(), array, "{dtype}");
        }
    }

    #[test]
    fn record_is_big_endian() {
        let array = NdArray::new(&[1], DataType::U16, vec![0x0102 as f64]).unwrap();
        let bytes = array.to_bytes().unwrap();
        assert_eq!(&bytes[..6], &[b'N', b'D', b'A', b'1', 3, 1]);
        assert_eq!(&bytes[6..14], &1u64.to_be_bytes());
        assert_eq!(&bytes[14..], &[0x01, 0x02]);
    }

    #[test]
    fn malformed_records_are_rejected() {
        let array = NdArray::from_f32(&[2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let bytes = array.to_bytes().unwrap();
        assert!(matches!(NdArray::from_bytes(&bytes[..bytes.len() - 1]), Err(Error::Format(_))));
        assert!(matches!(NdArray::from_bytes(b"NDA2\x07\x00"), Err(Error::Format(_))));
        let mut bad_tag = bytes.clone();
        bad_tag[4] = 42;
        assert!(matches!(NdArray::from_bytes(&bad_tag), Err(Error::Format(_))));
    }

    #[test]
    fn raw_little_endian_input() {
        let raw: Vec<u8> = [1.5f32, -2.0, 8.25].iter().flat_map(|v| v.to_le_bytes()).collect();
        let array = NdArray::from_le_bytes(&[3], DataType::F32, &raw).unwrap();
        assert_eq!(array.data(), &[1.5, -2.0, 8.25]);
        assert!(NdArray::from_le_bytes(&[4], DataType::F32, &raw).is_err());
    }

    #[test]
    fn data_type_names_parse() {
        assert_eq!("f32".parse::<DataType>().unwrap(), DataType::F32);
        assert_eq!("I16".parse::<DataType>().unwrap(), DataType::I16);
        assert!("f16".parse::<DataType>().is_err());
    }

    #[test]
    fn element_access_is_row_major() {
        let mut array = NdArray::zeros(&[2, 3, 4], DataType::F64);
        array.set(&[1, 2, 3], 9.5);
        assert_eq!(array.data()[23], 9.5);
        assert_eq!(array.get(&[1, 2, 3]), 9.5);
    }
}

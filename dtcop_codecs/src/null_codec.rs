use dtcop_core::{Codec, NdArray};

/// No-op codec: stores the array record verbatim, with no compression.
///
/// Useful for:
/// - Verifying the record round-trip independently of any compressor.
/// - Measuring what the other codecs actually save.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCodec;

impl Codec for NullCodec {
    fn id(&self) -> &'static str {
        "null"
    }

    fn compress(&self, array: &NdArray) -> anyhow::Result<Vec<u8>> {
        Ok(array.to_bytes()?)
    }

    fn decompress(&self, bytes: &[u8]) -> anyhow::Result<NdArray> {
        Ok(NdArray::from_bytes(bytes)?)
    }
}

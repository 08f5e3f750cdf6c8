use crate::array::NdArray;

/// Whole-array compression strategy.
///
/// Each `Codec` implementation:
/// - Is identified by a stable string `id()`, the same string used as the
///   `id` tag of its configuration record.
/// - Turns a complete [`NdArray`] into bytes and back. Lossless codecs return
///   the identical array; lossy ones keep every sample within their bound.
/// - Holds only its parameters, so one instance can serve many threads.
pub trait Codec: Send + Sync {
    /// Stable codec identifier.
    fn id(&self) -> &'static str;

    fn compress(&self, array: &NdArray) -> anyhow::Result<Vec<u8>>;

    fn decompress(&self, bytes: &[u8]) -> anyhow::Result<NdArray>;
}

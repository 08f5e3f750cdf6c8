mod dtcop_codec;
mod lz4_codec;
mod null_codec;
mod quant_codec;
mod zlib_codec;
mod zstd_codec;

pub use dtcop_codec::DtcopCodec;
pub use lz4_codec::Lz4Codec;
pub use null_codec::NullCodec;
pub use quant_codec::QuantCodec;
pub use zlib_codec::ZlibCodec;
pub use zstd_codec::ZstdCodec;

use std::sync::Arc;

use anyhow::Context;
use dtcop_core::{Codec, DEFAULT_CHUNK_EDGE};
use serde::{Deserialize, Serialize};

/// Error bound used when a dtcop codec is requested by id alone.
pub const DEFAULT_MAX_ERROR: f64 = 1.0;

fn default_zlib_level() -> u32 {
    ZlibCodec::default().level
}

fn default_zstd_level() -> i32 {
    ZstdCodec::default().level
}

fn default_quant() -> f64 {
    QuantCodec::DEFAULT_QUANT
}

fn default_chunk_shape() -> [usize; 3] {
    [DEFAULT_CHUNK_EDGE; 3]
}

fn default_threads() -> usize {
    dtcop_codec::default_threads()
}

/// Codec selection record, tagged by the codec id:
///
/// ```
/// use dtcop_codecs::CodecConfig;
///
/// let config = CodecConfig::from_json(r#"{"id":"dtcop","max_error":0.5,"threads":4}"#).unwrap();
/// assert_eq!(config.id(), "dtcop");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum CodecConfig {
    Null,
    Zlib {
        #[serde(default = "default_zlib_level")]
        level: u32,
    },
    Lz4,
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
    Quant {
        #[serde(default = "default_quant")]
        quant: f64,
    },
    Dtcop {
        max_error: f64,
        #[serde(default = "default_chunk_shape")]
        chunk_shape: [usize; 3],
        #[serde(default = "default_threads")]
        threads: usize,
    },
}

impl CodecConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).with_context(|| format!("invalid codec configuration: {json}"))
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn id(&self) -> &'static str {
        match self {
            CodecConfig::Null => "null",
            CodecConfig::Zlib { .. } => "zlib",
            CodecConfig::Lz4 => "lz4",
            CodecConfig::Zstd { .. } => "zstd",
            CodecConfig::Quant { .. } => "quant",
            CodecConfig::Dtcop { .. } => "dtcop",
        }
    }

    /// Defaults for `id`.
    pub fn default_for(id: &str) -> anyhow::Result<Self> {
        match id {
            "null" => Ok(CodecConfig::Null),
            "zlib" => Ok(CodecConfig::Zlib {
                level: default_zlib_level(),
            }),
            "lz4" => Ok(CodecConfig::Lz4),
            "zstd" => Ok(CodecConfig::Zstd {
                level: default_zstd_level(),
            }),
            "quant" => Ok(CodecConfig::Quant {
                quant: default_quant(),
            }),
            "dtcop" => Ok(CodecConfig::Dtcop {
                max_error: DEFAULT_MAX_ERROR,
                chunk_shape: default_chunk_shape(),
                threads: default_threads(),
            }),
            _ => anyhow::bail!("unknown codec id '{}'; supported: null, zlib, lz4, zstd, quant, dtcop", id),
        }
    }

    pub fn build(&self) -> anyhow::Result<Box<dyn Codec>> {
        let codec: Box<dyn Codec> = match *self {
            CodecConfig::Null => Box::new(NullCodec),
            CodecConfig::Zlib { level } => Box::new(ZlibCodec::new(level)?),
            CodecConfig::Lz4 => Box::new(Lz4Codec),
            CodecConfig::Zstd { level } => Box::new(ZstdCodec::new(level)),
            CodecConfig::Quant { quant } => Box::new(QuantCodec::new(quant)?),
            CodecConfig::Dtcop {
                max_error,
                chunk_shape,
                threads,
            } => Box::new(DtcopCodec::new(chunk_shape, max_error, threads)?),
        };
        Ok(codec)
    }
}

/// Resolve a codec from its id with default parameters.
///
/// Called by the CLI to decode a payload whose codec is known only by name.
pub fn codec_by_id(id: &str) -> anyhow::Result<Arc<dyn Codec>> {
    Ok(Arc::from(CodecConfig::default_for(id)?.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dtcop_config_with_defaults() {
        let config = CodecConfig::from_json(r#"{"id":"dtcop","max_error":0.5,"threads":4}"#).unwrap();
        assert_eq!(
            config,
            CodecConfig::Dtcop {
                max_error: 0.5,
                chunk_shape: [32, 32, 32],
                threads: 4
            }
        );
        let codec = config.build().unwrap();
        assert_eq!(codec.id(), "dtcop");
    }

    #[test]
    fn parses_byte_codec_configs() {
        assert_eq!(CodecConfig::from_json(r#"{"id":"null"}"#).unwrap(), CodecConfig::Null);
        assert_eq!(
            CodecConfig::from_json(r#"{"id":"zlib"}"#).unwrap(),
            CodecConfig::Zlib { level: 1 }
        );
        assert_eq!(
            CodecConfig::from_json(r#"{"id":"zstd","level":9}"#).unwrap(),
            CodecConfig::Zstd { level: 9 }
        );
        assert_eq!(
            CodecConfig::from_json(r#"{"id":"quant"}"#).unwrap(),
            CodecConfig::Quant { quant: 10.0 }
        );
    }

    #[test]
    fn rejects_bad_configs() {
        assert!(CodecConfig::from_json(r#"{"id":"blosc"}"#).is_err());
        assert!(CodecConfig::from_json(r#"{"id":"dtcop"}"#).is_err());
        assert!(CodecConfig::from_json(r#"{"id":"zlib","level":12}"#).unwrap().build().is_err());
        assert!(CodecConfig::from_json(r#"{"id":"dtcop","max_error":-1.0}"#).unwrap().build().is_err());
        assert!(CodecConfig::from_json(r#"{"id":"quant","quant":0}"#).unwrap().build().is_err());
        assert!(codec_by_id("gzip").is_err());
    }

    #[test]
    fn json_round_trip() {
        let config = CodecConfig::Dtcop {
            max_error: 2.0,
            chunk_shape: [16, 16, 16],
            threads: 2,
        };
        let json = config.to_json().unwrap();
        assert!(json.starts_with(r#"{"id":"dtcop""#), "{json}");
        assert_eq!(CodecConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn codec_ids_match_config_tags() {
        for id in ["null", "zlib", "lz4", "zstd", "quant", "dtcop"] {
            assert_eq!(codec_by_id(id).unwrap().id(), id);
            assert_eq!(CodecConfig::default_for(id).unwrap().id(), id);
        }
    }
}

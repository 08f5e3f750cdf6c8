//! The single error type shared by every stage of the codec.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("quantized coefficient {value} out of range [{min},{max}]")]
    Range { value: i64, min: i32, max: i32 },

    #[error("no quantization table keeps the error below {max_error} (finest table reached {best})")]
    ErrorBoundUnreachable { max_error: f64, best: f64 },

    #[error("malformed shard: {0}")]
    Format(String),

    #[error("bit stream exhausted after {filled} of {expected} coefficients")]
    Exhausted { filled: usize, expected: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

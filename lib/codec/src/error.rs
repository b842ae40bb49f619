use std::fmt;

/// Failure modes for the length-prefixed big-endian wire codec (spec §4.2, §7).
///
/// `Underflow` and `BadTag` are produced by the reader; `UnknownType` is
/// reserved for callers that layer a type registry on top of this codec
/// (see `atlasnet-interlink`'s packet registry).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CodecError {
    /// The buffer was exhausted before the requested value could be read.
    Underflow,
    /// A discriminant/category byte fell outside the range a tagged union defines.
    BadTag,
    /// A type identifier had no corresponding registry entry.
    UnknownType,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Underflow => write!(f, "buffer underflow"),
            CodecError::BadTag => write!(f, "tag out of range"),
            CodecError::UnknownType => write!(f, "unknown wire type"),
        }
    }
}

impl std::error::Error for CodecError {}

pub type CodecResult<T> = Result<T, CodecError>;

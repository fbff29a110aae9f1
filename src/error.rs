//! Error types for format compilation and pack/unpack operations.
//!
//! Failures fall on two axes:
//!
//! - **Format errors**: the format string itself is invalid — unknown
//!   characters, mismatched brackets, misplaced `$`, references that are out
//!   of range or unsafe, or a size computation on an indeterminate format.
//!   These are raised while compiling a [`Struct`](crate::Struct) or by
//!   [`calcsize`](crate::calcsize).
//! - **Operation errors**: the format is fine but the data or arguments are
//!   not — truncated input, an unterminated null-terminated string, argument
//!   count or type mismatches, values out of range for their scalar width,
//!   or a reference that resolves to something unusable at run time.
//!
//! Every variant carries the format string, the position of the offending
//! token and a short excerpt of the sub-format at that position. Decode-time
//! errors add the byte offset in the input; encode-time errors add the index
//! of the offending argument.
//!
//! ## Examples
//!
//! ```rust
//! use binstruct::{unpack, Error};
//!
//! // `4{2B}`: an unbounded iterator cannot carry a repeat count.
//! let result = unpack("4{2B}", b"\x00\x01", &[]);
//! assert!(matches!(result, Err(Error::Format { .. })));
//! ```

use thiserror::Error;

/// All errors produced by format compilation, unpacking and packing.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Invalid format string, detected by the tokenizer, the reference
    /// analyzer or the size oracle.
    #[error("format error: {msg}\n  in format \"{format}\", position {position}: `{excerpt}`")]
    Format {
        msg: String,
        format: String,
        position: usize,
        excerpt: String,
    },

    /// Decode-time data error: the input does not satisfy the structure.
    #[error("data error: {msg}\n  in format \"{format}\", position {position}: `{excerpt}`, byte offset {offset}")]
    Data {
        msg: String,
        format: String,
        position: usize,
        excerpt: String,
        offset: u64,
    },

    /// Encode-time argument error: count, shape or type mismatch.
    #[error("argument error: {msg}\n  in format \"{format}\", position {position}: `{excerpt}`, argument {index}")]
    Argument {
        msg: String,
        format: String,
        position: usize,
        excerpt: String,
        index: usize,
    },

    /// Encode-time overflow: a value does not fit its scalar type.
    #[error("overflow: {msg}\n  in format \"{format}\", position {position}: `{excerpt}`, argument {index}")]
    Overflow {
        msg: String,
        format: String,
        position: usize,
        excerpt: String,
        index: usize,
    },

    /// Run-time reference resolution failure: the referenced element does
    /// not exist or does not hold a usable count.
    #[error("resolution error: {msg}\n  in format \"{format}\", position {position}: `{excerpt}`")]
    Resolution {
        msg: String,
        format: String,
        position: usize,
        excerpt: String,
    },

    /// Propagated reader or writer failure.
    #[error("IO error: {0}")]
    Io(String),
}

/// A short slice of the format string starting at the offending position,
/// for human-readable error messages.
fn excerpt_at(format: &str, position: usize) -> String {
    let mut start = position.min(format.len());
    while start > 0 && !format.is_char_boundary(start) {
        start -= 1;
    }
    format[start..].chars().take(16).collect()
}

impl Error {
    /// Creates a format error at the given position in the format string.
    pub(crate) fn format(msg: impl Into<String>, format: &str, position: usize) -> Self {
        Error::Format {
            msg: msg.into(),
            format: format.to_string(),
            position,
            excerpt: excerpt_at(format, position),
        }
    }

    /// Creates a decode-time data error at the given byte offset.
    pub(crate) fn data(msg: impl Into<String>, format: &str, position: usize, offset: u64) -> Self {
        Error::Data {
            msg: msg.into(),
            format: format.to_string(),
            position,
            excerpt: excerpt_at(format, position),
            offset,
        }
    }

    /// Creates an encode-time argument error naming the argument index.
    pub(crate) fn argument(
        msg: impl Into<String>,
        format: &str,
        position: usize,
        index: usize,
    ) -> Self {
        Error::Argument {
            msg: msg.into(),
            format: format.to_string(),
            position,
            excerpt: excerpt_at(format, position),
            index,
        }
    }

    /// Creates an encode-time overflow error naming the argument index.
    pub(crate) fn overflow(
        msg: impl Into<String>,
        format: &str,
        position: usize,
        index: usize,
    ) -> Self {
        Error::Overflow {
            msg: msg.into(),
            format: format.to_string(),
            position,
            excerpt: excerpt_at(format, position),
            index,
        }
    }

    /// Creates a run-time reference resolution error.
    pub(crate) fn resolution(msg: impl Into<String>, format: &str, position: usize) -> Self {
        Error::Resolution {
            msg: msg.into(),
            format: format.to_string(),
            position,
            excerpt: excerpt_at(format, position),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_error_shows_excerpt() {
        let err = Error::format("unrecognised format character '`'", "4s2I /0[2I 4` 5H]", 11);
        let text = err.to_string();
        assert!(text.contains("position 11"));
        assert!(text.contains("4` 5H"));
    }

    #[test]
    fn excerpt_is_char_boundary_safe() {
        let err = Error::format("bad", "2B 'à propos' I", 5);
        assert!(!err.to_string().is_empty());
    }
}

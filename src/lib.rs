//! # binstruct
//!
//! Binary packing and unpacking driven by a compact format language.
//!
//! ## What is binstruct?
//!
//! `binstruct` reads and writes structured binary data the way the
//! classic `struct` packers do, but the format language goes further:
//! variable-length elements (null-terminated strings, rest-of-stream),
//! **references** that let an already decoded value drive the shape of a
//! later element, caller-supplied **external references**, **groups** and
//! **iterators** for nested repetition, and position-aware **alignment**.
//!
//! ## Key Features
//!
//! - **One format string** describes both directions: the same structure
//!   unpacks bytes into values and packs values into bytes
//! - **References**: `I /0s` reads a 32-bit length and then that many
//!   bytes; `#0I` takes its count from caller-supplied `refdata`
//! - **Sub-structures**: groups `(…)`, bounded iterators `[…]` and
//!   data-bounded iterators `{…}` nest values into sub-sequences
//! - **Compiled structures**: [`Struct`] parses and validates a format
//!   once; compiled structures concatenate and repeat with automatic
//!   reference renumbering
//! - **Static analysis**: invalid and unsafe references, misplaced
//!   elements and unknown characters are compile-time [`Error::Format`]s,
//!   not decode-time surprises
//!
//! ## Quick Start
//!
//! ```rust
//! use binstruct::{pack, unpack, values, Value};
//!
//! // Four bytes then two 3-byte strings
//! let data = b"\x01\x02\x03\x04foobar";
//! let decoded = unpack("4B 3s 3s", data, &[])?;
//! assert_eq!(decoded[0], Value::Uint(1));
//! assert_eq!(decoded[4], Value::Bytes(b"foo".to_vec()));
//!
//! // And back
//! let packed = pack("4B 3s 3s", &values![1u8, 2u8, 3u8, 4u8, b"foo", b"bar"], &[])?;
//! assert_eq!(packed, data);
//! # Ok::<(), binstruct::Error>(())
//! ```
//!
//! ### References
//!
//! A count can come from an earlier element of the same scope (`/0` is the
//! first decoded value, `/p1` the previous one) or from the `refdata`
//! parameter (`#0`):
//!
//! ```rust
//! use binstruct::{unpack, Value};
//!
//! // Three lengths, then a string of each length
//! let decoded = unpack("3B /0s /1s /2s", b"\x04\x03\x04spamhameggs", &[])?;
//! assert_eq!(decoded[3], Value::Bytes(b"spam".to_vec()));
//! assert_eq!(decoded[5], Value::Bytes(b"eggs".to_vec()));
//!
//! // External reference: the caller knows the count
//! let decoded = unpack("<4s #0I", b"ABCD\x10\x00\x00\x00\x20\x00\x00\x00", &[2])?;
//! assert_eq!(decoded, vec![
//!     Value::Bytes(b"ABCD".to_vec()),
//!     Value::Uint(16),
//!     Value::Uint(32),
//! ]);
//! # Ok::<(), binstruct::Error>(())
//! ```
//!
//! ### Iterators
//!
//! ```rust
//! use binstruct::{unpack, Value};
//!
//! // A count, then that many [length, string] records
//! let decoded = unpack("B /0[B /0s]", b"\x03\x03foo\x03bar\x06foobar", &[])?;
//! let Value::List(records) = &decoded[1] else { unreachable!() };
//! assert_eq!(records.len(), 3);
//! assert_eq!(
//!     records[2],
//!     Value::List(vec![Value::Uint(6), Value::Bytes(b"foobar".to_vec())])
//! );
//! # Ok::<(), binstruct::Error>(())
//! ```
//!
//! ### Compiled structures
//!
//! ```rust
//! use binstruct::Struct;
//!
//! let header = Struct::new("<4s 2I")?;
//! for _ in 0..3 {
//!     // No re-parsing on repeated use
//!     let _ = header.unpack(b"GLOB\x01\x00\x00\x00\x02\x00\x00\x00", &[])?;
//! }
//! # Ok::<(), binstruct::Error>(())
//! ```
//!
//! ## Format Reference
//!
//! The full format language is documented in the [`format`] module:
//! scalar characters, counts and references, sub-structures, alignment
//! and byte-order marks.
//!
//! ## Safety Guarantees
//!
//! - No `unsafe` code blocks
//! - No panics in the public API; malformed formats, truncated data and
//!   mismatched arguments all surface as [`Error`] values
//! - Compiled structures are immutable and freely shareable across threads

pub mod error;
pub mod format;
pub mod options;
pub mod structure;
pub mod token;
pub mod value;

mod analyze;
mod macros;
mod pack;
mod scalar;
mod unpack;

pub use error::{Error, Result};
pub use options::StructOptions;
pub use scalar::ByteOrder;
pub use structure::Struct;
pub use unpack::IterUnpack;
pub use value::Value;

use std::io::{Seek, Write};

/// Unpacks `data` according to `format`. Trailing bytes that no element
/// consumes are ignored.
///
/// For repeated use of the same format, compile a [`Struct`] once instead.
///
/// # Examples
///
/// ```rust
/// use binstruct::{unpack, Value};
///
/// let values = unpack("<2H", b"\x01\x00\x02\x00", &[])?;
/// assert_eq!(values, vec![Value::Uint(1), Value::Uint(2)]);
/// # Ok::<(), binstruct::Error>(())
/// ```
///
/// # Errors
///
/// Returns [`Error::Format`] for an invalid format, [`Error::Data`] when
/// the data does not satisfy it, [`Error::Resolution`] when a reference
/// cannot be resolved.
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn unpack(format: &str, data: &[u8], refdata: &[usize]) -> Result<Vec<Value>> {
    Struct::new(format)?.unpack(data, refdata)
}

/// Unpacks `data` starting at `offset`, returning the values along with
/// the position immediately after the consumed data.
///
/// # Examples
///
/// ```rust
/// use binstruct::{unpack_from, Value};
///
/// let (values, end) = unpack_from("2B", b"\xff\x01\x02rest", 1, &[])?;
/// assert_eq!(values, vec![Value::Uint(1), Value::Uint(2)]);
/// assert_eq!(end, 3);
/// # Ok::<(), binstruct::Error>(())
/// ```
///
/// # Errors
///
/// See [`unpack`].
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn unpack_from(
    format: &str,
    data: &[u8],
    offset: usize,
    refdata: &[usize],
) -> Result<(Vec<Value>, usize)> {
    Struct::new(format)?.unpack_from(data, offset, refdata)
}

/// Creates an iterator unpacking `format` repeatedly over `data`.
///
/// The format must have a determinate size (see [`calcsize`]) and the data
/// length must be an exact multiple of it.
///
/// # Examples
///
/// ```rust
/// use binstruct::{iter_unpack, Value};
///
/// let mut records = iter_unpack("<H", b"\x01\x00\x02\x00\x03\x00", &[])?;
/// assert_eq!(records.len(), 3);
/// assert_eq!(records.next().unwrap()?, vec![Value::Uint(1)]);
/// # Ok::<(), binstruct::Error>(())
/// ```
///
/// # Errors
///
/// Returns [`Error::Format`] when the size is indeterminate and
/// [`Error::Data`] when the data length is not an exact multiple of it.
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn iter_unpack<'d>(format: &str, data: &'d [u8], refdata: &[usize]) -> Result<IterUnpack<'d>> {
    Struct::new(format)?.iter_unpack(data, refdata)
}

/// Packs `values` according to `format` into a fresh byte buffer.
///
/// # Examples
///
/// ```rust
/// use binstruct::{pack, values};
///
/// let packed = pack(">H 2s", &values![513u16, b"ok"], &[])?;
/// assert_eq!(packed, b"\x02\x01ok");
/// # Ok::<(), binstruct::Error>(())
/// ```
///
/// # Errors
///
/// Returns [`Error::Format`] for an invalid format, [`Error::Argument`] on
/// count, shape or type mismatches, [`Error::Overflow`] when a value does
/// not fit its scalar type.
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn pack(format: &str, values: &[Value], refdata: &[usize]) -> Result<Vec<u8>> {
    Struct::new(format)?.pack(values, refdata)
}

/// Packs `values` into an existing buffer starting at `offset`.
///
/// The buffer is never grown: packed data that would run past its end is
/// an [`Error::Data`].
///
/// # Examples
///
/// ```rust
/// use binstruct::{pack_into, values};
///
/// let mut buffer = [0u8; 6];
/// pack_into("2B", &mut buffer, 2, &values![0xabu8, 0xcdu8], &[])?;
/// assert_eq!(buffer, [0, 0, 0xab, 0xcd, 0, 0]);
/// # Ok::<(), binstruct::Error>(())
/// ```
///
/// # Errors
///
/// See [`pack`], plus [`Error::Data`] when the result does not fit.
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn pack_into(
    format: &str,
    buffer: &mut [u8],
    offset: usize,
    values: &[Value],
    refdata: &[usize],
) -> Result<()> {
    Struct::new(format)?.pack_into(buffer, offset, values, refdata)
}

/// Packs `values` into a seekable writer, at `position` when given or the
/// current position otherwise. The writer is left just after the written
/// data.
///
/// # Examples
///
/// ```rust
/// use binstruct::{pack_file, values};
/// use std::io::Cursor;
///
/// let mut file = Cursor::new(Vec::new());
/// pack_file(">H", &mut file, &values![513u16], None, &[])?;
/// assert_eq!(file.into_inner(), vec![2, 1]);
/// # Ok::<(), binstruct::Error>(())
/// ```
///
/// # Errors
///
/// See [`pack`]; writer failures surface as [`Error::Io`].
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn pack_file<W: Write + Seek>(
    format: &str,
    file: &mut W,
    values: &[Value],
    position: Option<u64>,
    refdata: &[usize],
) -> Result<()> {
    Struct::new(format)?.pack_file(file, values, position, refdata)
}

/// The size in bytes of the data described by `format`.
///
/// Fails when the size is indeterminate: null-terminated strings,
/// unbounded iterators, `$` or internal references. External references
/// resolve when `refdata` is supplied.
///
/// # Examples
///
/// ```rust
/// use binstruct::calcsize;
///
/// assert_eq!(calcsize("<4s 2I", None)?, 12);
/// assert_eq!(calcsize("4s #0I", Some(&[3]))?, 16);
/// assert!(calcsize("4s n", None).is_err());
/// # Ok::<(), binstruct::Error>(())
/// ```
///
/// # Errors
///
/// Returns [`Error::Format`] when the format is invalid or indeterminate.
#[must_use = "this returns the result of the operation, errors must be handled"]
pub fn calcsize(format: &str, refdata: Option<&[usize]>) -> Result<usize> {
    Struct::new(format)?.calcsize(refdata)
}

//! Compiled structures.
//!
//! A [`Struct`] compiles a format string once and for all: the token tree
//! is parsed, analyzed and then reused for every pack/unpack call, which is
//! significantly cheaper than re-parsing for reused structures. A compiled
//! structure is immutable and freely shareable across threads.
//!
//! Structures compose: [`Struct::concat`] appends another structure and
//! [`Struct::repeat`] repeats one, both renumbering absolute and external
//! references so that every reference keeps pointing at the element it was
//! written against.
//!
//! ## Examples
//!
//! ```rust
//! use binstruct::{Struct, Value};
//!
//! let record = Struct::new("<I 2s")?;
//! let values = record.unpack(b"\x2a\x00\x00\x00ok", &[])?;
//! assert_eq!(values, vec![Value::Uint(42), Value::Bytes(b"ok".to_vec())]);
//!
//! let pair = record.repeat(2)?;
//! assert_eq!(pair.calcsize(None)?, 12);
//! # Ok::<(), binstruct::Error>(())
//! ```

use std::fmt;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use crate::analyze::analyze;
use crate::error::{Error, Result};
use crate::options::StructOptions;
use crate::pack::Packer;
use crate::scalar::ByteOrder;
use crate::token::{tokenize, Count, Token, TokenKind};
use crate::unpack::{IterUnpack, Unpacker};
use crate::value::Value;

/// A compiled binary structure.
#[derive(Debug, Clone)]
pub struct Struct {
    pub(crate) format: String,
    pub(crate) tokens: Vec<Token>,
    pub(crate) byte_order: ByteOrder,
    pub(crate) forced: bool,
    unsafe_references: bool,
}

impl Struct {
    /// Compiles a format string with default options (safe references,
    /// system byte order when the format carries no marker).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] when the format string is invalid.
    pub fn new(format: &str) -> Result<Self> {
        Self::with_options(format, StructOptions::default())
    }

    /// Compiles a format string with explicit options.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use binstruct::{Struct, StructOptions};
    ///
    /// // Rejected by default: /p1 reaches through an element whose count
    /// // only the data knows.
    /// assert!(Struct::new("B /0B /p1c").is_err());
    ///
    /// let options = StructOptions::new().with_unsafe_references(true);
    /// assert!(Struct::with_options("B /0B /p1c", options).is_ok());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] when the format string is invalid.
    pub fn with_options(format: &str, options: StructOptions) -> Result<Self> {
        let (tokens, marker) = tokenize(format)?;
        analyze(&tokens, !options.unsafe_references, format)?;
        let (byte_order, forced) = match (marker, options.byte_order) {
            (Some(order), _) => (order, true),
            (None, Some(order)) => (order, true),
            (None, None) => (ByteOrder::native(), false),
        };
        Ok(Struct {
            format: format.to_string(),
            tokens,
            byte_order,
            forced,
            unsafe_references: options.unsafe_references,
        })
    }

    /// The format string this structure was compiled from, or the canonical
    /// rendering for structures built by [`concat`](Self::concat) or
    /// [`repeat`](Self::repeat).
    #[must_use]
    pub fn format(&self) -> &str {
        &self.format
    }

    /// The byte order applied to multi-byte scalars.
    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Overrides the byte order, regardless of any marker in the format.
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
        self.forced = true;
    }

    /// Unpacks values from the start of `data`. Trailing bytes that no
    /// element consumes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] when `data` does not satisfy the structure
    /// and [`Error::Resolution`] when a reference cannot be resolved.
    pub fn unpack(&self, data: &[u8], refdata: &[usize]) -> Result<Vec<Value>> {
        let mut cursor = Cursor::new(data);
        let (values, _) = Unpacker::new(self, &mut cursor, refdata).run()?;
        Ok(values)
    }

    /// Unpacks values starting at `offset`, returning them along with the
    /// position immediately after the consumed data.
    ///
    /// # Errors
    ///
    /// See [`unpack`](Self::unpack).
    pub fn unpack_from(
        &self,
        data: &[u8],
        offset: usize,
        refdata: &[usize],
    ) -> Result<(Vec<Value>, usize)> {
        let mut cursor = Cursor::new(data);
        cursor.set_position(offset as u64);
        let (values, end) = Unpacker::new(self, &mut cursor, refdata).run()?;
        Ok((values, end as usize))
    }

    /// Unpacks values from a seekable reader, starting at its current
    /// position and leaving it just after the consumed data.
    ///
    /// # Errors
    ///
    /// See [`unpack`](Self::unpack); reader failures surface as
    /// [`Error::Io`].
    pub fn unpack_reader<R: Read + Seek>(
        &self,
        reader: &mut R,
        refdata: &[usize],
    ) -> Result<Vec<Value>> {
        let (values, _) = Unpacker::new(self, reader, refdata).run()?;
        Ok(values)
    }

    /// Unpacks and hands the flat top-level value vector to a caller
    /// supplied constructor, typically one building a named record type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use binstruct::Struct;
    ///
    /// struct Header {
    ///     version: u64,
    ///     flags: u64,
    /// }
    ///
    /// let header = Struct::new("<2I")?.unpack_named(
    ///     b"\x01\x00\x00\x00\xff\x00\x00\x00",
    ///     &[],
    ///     |values| Header {
    ///         version: values[0].as_u64().unwrap(),
    ///         flags: values[1].as_u64().unwrap(),
    ///     },
    /// )?;
    /// assert_eq!(header.version, 1);
    /// assert_eq!(header.flags, 255);
    /// # Ok::<(), binstruct::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// See [`unpack`](Self::unpack).
    pub fn unpack_named<T, F>(&self, data: &[u8], refdata: &[usize], constructor: F) -> Result<T>
    where
        F: FnOnce(Vec<Value>) -> T,
    {
        Ok(constructor(self.unpack(data, refdata)?))
    }

    /// Creates an iterator unpacking this structure repeatedly over `data`.
    ///
    /// The structure must have a determinate size and the data length must
    /// be an exact multiple of it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] when the size is indeterminate and
    /// [`Error::Data`] when the data length is not an exact multiple.
    pub fn iter_unpack<'d>(&self, data: &'d [u8], refdata: &[usize]) -> Result<IterUnpack<'d>> {
        IterUnpack::new(self.clone(), data, refdata.to_vec())
    }

    /// Packs `values` into a fresh byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] on count, shape or type mismatches,
    /// [`Error::Overflow`] when a value does not fit its scalar type and
    /// [`Error::Resolution`] when a reference cannot be resolved.
    pub fn pack(&self, values: &[Value], refdata: &[usize]) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        Packer::new(self, &mut cursor, refdata).run(values)?;
        Ok(cursor.into_inner())
    }

    /// Packs `values` into `buffer` starting at `offset`. The buffer is
    /// never grown; data that would not fit is a data error.
    ///
    /// # Errors
    ///
    /// See [`pack`](Self::pack), plus [`Error::Data`] when the packed data
    /// does not fit.
    pub fn pack_into(
        &self,
        buffer: &mut [u8],
        offset: usize,
        values: &[Value],
        refdata: &[usize],
    ) -> Result<()> {
        let packed = self.pack(values, refdata)?;
        let end = offset
            .checked_add(packed.len())
            .filter(|&end| end <= buffer.len())
            .ok_or_else(|| {
                Error::data(
                    format!(
                        "packed data ({} bytes at offset {}) does not fit in the {}-byte buffer",
                        packed.len(),
                        offset,
                        buffer.len()
                    ),
                    &self.format,
                    0,
                    offset as u64,
                )
            })?;
        buffer[offset..end].copy_from_slice(&packed);
        Ok(())
    }

    /// Packs `values` into a seekable writer, at `position` when given or
    /// the current position otherwise, leaving the writer just after the
    /// written data.
    ///
    /// # Errors
    ///
    /// See [`pack`](Self::pack); writer failures surface as [`Error::Io`].
    pub fn pack_file<W: Write + Seek>(
        &self,
        file: &mut W,
        values: &[Value],
        position: Option<u64>,
        refdata: &[usize],
    ) -> Result<()> {
        if let Some(position) = position {
            file.seek(SeekFrom::Start(position))?;
        }
        Packer::new(self, file, refdata).run(values)
    }

    /// The total size in bytes of the data this structure describes.
    ///
    /// Fails when the size is indeterminate: null-terminated strings,
    /// unbounded iterators, `$`, or internal references. External
    /// references are fine when `refdata` is supplied.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use binstruct::Struct;
    ///
    /// assert_eq!(Struct::new("4sI |2B 7s2x 16a")?.calcsize(None)?, 24);
    /// assert!(Struct::new("4sI 10[2n]")?.calcsize(None).is_err());
    /// # Ok::<(), binstruct::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] when the size is indeterminate.
    pub fn calcsize(&self, refdata: Option<&[usize]>) -> Result<usize> {
        self.calc_tokens(&self.tokens, refdata)
    }

    fn calc_tokens(&self, tokens: &[Token], refdata: Option<&[usize]>) -> Result<usize> {
        let too_large =
            |position| move || Error::format("structure size is too large", &self.format, position);
        let mut size = 0usize;
        let mut alignbase = 0usize;
        for token in tokens {
            let count = match token.count {
                Count::Literal(n) => n,
                Count::External(i) => match refdata {
                    Some(refdata) => *refdata.get(i).ok_or_else(|| {
                        Error::resolution(
                            format!("invalid external reference index: {}", i),
                            &self.format,
                            token.position,
                        )
                    })?,
                    None => {
                        return Err(Error::format(
                            "impossible to compute the size of a structure with references",
                            &self.format,
                            token.position,
                        ))
                    }
                },
                Count::Absolute(_) | Count::Relative(_) => {
                    return Err(Error::format(
                        "impossible to compute the size of a structure with references",
                        &self.format,
                        token.position,
                    ))
                }
            };
            match &token.kind {
                TokenKind::Group(children) | TokenKind::Iter(children) => {
                    let inner = self.calc_tokens(children, refdata)?;
                    size = count
                        .checked_mul(inner)
                        .and_then(|n| size.checked_add(n))
                        .ok_or_else(too_large(token.position))?;
                }
                TokenKind::Greedy(_) => {
                    return Err(Error::format(
                        "impossible to compute the size of a structure with {} iterators",
                        &self.format,
                        token.position,
                    ))
                }
                TokenKind::CString | TokenKind::Rest => {
                    return Err(Error::format(
                        format!(
                            "impossible to compute the size of a structure with '{}' elements",
                            token.kind.symbol()
                        ),
                        &self.format,
                        token.position,
                    ))
                }
                TokenKind::AlignBase => alignbase = size,
                TokenKind::Align => {
                    if count == 0 {
                        return Err(Error::resolution(
                            "alignment must be at least 1",
                            &self.format,
                            token.position,
                        ));
                    }
                    let remainder = (size - alignbase) % count;
                    if remainder != 0 {
                        size += count - remainder;
                    }
                }
                kind => {
                    let element = kind
                        .int_spec()
                        .map(|(_, width)| width)
                        .or_else(|| kind.float_spec().map(|spec| spec.width))
                        .unwrap_or(1);
                    size = count
                        .checked_mul(element)
                        .and_then(|n| size.checked_add(n))
                        .ok_or_else(too_large(token.position))?;
                }
            }
        }
        Ok(size)
    }

    /// Appends `other`, renumbering its absolute references by this
    /// structure's top-level element count and its external references by
    /// this structure's external reference count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] when this structure ends with `{…}` or `$`
    /// (nothing can follow them), or when it has an indeterminate element
    /// count while `other` uses absolute references.
    pub fn concat(&self, other: &Struct) -> Result<Struct> {
        let left_externals = max_external(&self.tokens).map_or(0, |m| m + 1);
        let right_has_absolute = other
            .tokens
            .iter()
            .any(|token| matches!(token.count, Count::Absolute(_)));

        let mut left_values: Option<usize> = Some(0);
        let mut tokens = Vec::with_capacity(self.tokens.len() + other.tokens.len());
        for token in &self.tokens {
            if matches!(token.kind, TokenKind::Greedy(_) | TokenKind::Rest) {
                return Err(Error::format(
                    format!(
                        "'{}' forces the end of the structure, structures cannot be combined if it would end up in the middle",
                        token.kind.symbol()
                    ),
                    &self.format,
                    token.position,
                ));
            }
            left_values = match (left_values, token.value_count()) {
                (Some(total), Some(values)) => Some(total + values),
                _ => None,
            };
            tokens.push(token.clone());
        }
        if right_has_absolute && left_values.is_none() {
            return Err(Error::format(
                "the left operand has an indeterminate amount of elements, impossible to renumber right side absolute references",
                &self.format,
                0,
            ));
        }
        for token in &other.tokens {
            let mut token = token.clone();
            match token.count {
                Count::Absolute(n) => token.count = Count::Absolute(n + left_values.unwrap_or(0)),
                Count::External(n) => token.count = Count::External(n + left_externals),
                _ => {}
            }
            shift_externals(&mut token.kind, left_externals);
            tokens.push(token);
        }
        Ok(self.rebuild(tokens))
    }

    /// Concatenates `n` copies of this structure, renumbering each copy's
    /// absolute and external references to point into its own copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] when the structure contains `{…}` or `$`,
    /// or an indeterminate element count, and `n > 1`.
    pub fn repeat(&self, n: usize) -> Result<Struct> {
        if n == 0 {
            return Ok(Struct {
                format: String::new(),
                tokens: Vec::new(),
                byte_order: ByteOrder::native(),
                forced: false,
                unsafe_references: false,
            });
        }
        if n == 1 {
            return Ok(self.clone());
        }

        let mut block_values: Option<usize> = Some(0);
        for token in &self.tokens {
            if matches!(token.kind, TokenKind::Greedy(_) | TokenKind::Rest) {
                return Err(Error::format(
                    format!(
                        "'{}' forces the end of the structure, structures cannot be combined if it would end up in the middle",
                        token.kind.symbol()
                    ),
                    &self.format,
                    token.position,
                ));
            }
            block_values = match (block_values, token.value_count()) {
                (Some(total), Some(values)) => Some(total + values),
                _ => None,
            };
        }
        let block_values = block_values.ok_or_else(|| {
            Error::format(
                "the repeated structure contains an indeterminate amount of elements, impossible to renumber absolute references",
                &self.format,
                0,
            )
        })?;
        let block_externals = max_external(&self.tokens).map_or(0, |m| m + 1);

        let mut tokens = Vec::with_capacity(self.tokens.len() * n);
        for copy in 0..n {
            let value_shift = copy * block_values;
            let external_shift = copy * block_externals;
            for token in &self.tokens {
                let mut token = token.clone();
                match token.count {
                    Count::Absolute(v) => token.count = Count::Absolute(v + value_shift),
                    Count::External(v) => token.count = Count::External(v + external_shift),
                    _ => {}
                }
                shift_externals(&mut token.kind, external_shift);
                tokens.push(token);
            }
        }
        Ok(self.rebuild(tokens))
    }

    /// A new structure around renumbered tokens, carrying this structure's
    /// byte order and rendering its canonical format string.
    fn rebuild(&self, tokens: Vec<Token>) -> Struct {
        let mut result = Struct {
            format: String::new(),
            tokens,
            byte_order: self.byte_order,
            forced: self.forced,
            unsafe_references: self.unsafe_references,
        };
        result.format = result.render();
        result
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if self.forced {
            out.push(self.byte_order.marker());
        }
        out.push_str(&render_tokens(&self.tokens));
        out
    }
}

impl fmt::Display for Struct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format)
    }
}

fn render_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(render_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_token(token: &Token) -> String {
    let count = match token.count {
        Count::Literal(1) => String::new(),
        Count::Literal(n) => n.to_string(),
        Count::Absolute(n) => format!("/{}", n),
        Count::Relative(n) => format!("/p{}", n),
        Count::External(n) => format!("#{}", n),
    };
    match &token.kind {
        TokenKind::Group(children) => format!("{}({})", count, render_tokens(children)),
        TokenKind::Iter(children) => format!("{}[{}]", count, render_tokens(children)),
        TokenKind::Greedy(children) => format!("{{{}}}", render_tokens(children)),
        kind => format!("{}{}", count, kind.symbol()),
    }
}

/// Resolves a repeat specifier against the values already seen in the
/// current scope (decoded values when unpacking, consumed arguments when
/// packing) and the caller-supplied `refdata`.
pub(crate) fn resolve_count(
    token: &Token,
    values: &[Value],
    refdata: &[usize],
    format: &str,
) -> Result<usize> {
    let fail = |msg: String| Error::resolution(msg, format, token.position);
    let integer = |value: &Value, kind: &str, i: usize| {
        value.as_count().ok_or_else(|| {
            fail(format!(
                "count from {} reference index {} must be a non-negative integer, not {}",
                kind,
                i,
                value.kind_name()
            ))
        })
    };
    match token.count {
        Count::Literal(n) => Ok(n),
        Count::Absolute(i) => {
            let value = values
                .get(i)
                .ok_or_else(|| fail(format!("invalid absolute reference index: {}", i)))?;
            integer(value, "absolute", i)
        }
        Count::Relative(i) => {
            let position = values
                .len()
                .checked_sub(i)
                .ok_or_else(|| fail(format!("invalid relative reference index: {}", i)))?;
            integer(&values[position], "relative", i)
        }
        Count::External(i) => refdata
            .get(i)
            .copied()
            .ok_or_else(|| fail(format!("invalid external reference index: {}", i))),
    }
}

/// The largest external reference index anywhere in the tree.
fn max_external(tokens: &[Token]) -> Option<usize> {
    let mut max: Option<usize> = None;
    for token in tokens {
        if let Count::External(n) = token.count {
            max = Some(max.map_or(n, |m| m.max(n)));
        }
        if let Some(children) = token.kind.children() {
            if let Some(sub) = max_external(children) {
                max = Some(max.map_or(sub, |m| m.max(sub)));
            }
        }
    }
    max
}

/// Shifts every external reference index in the sub-tree.
fn shift_externals(kind: &mut TokenKind, shift: usize) {
    if shift == 0 {
        return;
    }
    if let Some(children) = kind.children_mut() {
        for child in children {
            if let Count::External(n) = child.count {
                child.count = Count::External(n + shift);
            }
            shift_externals(&mut child.kind, shift);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calcsize_with_alignment_base() {
        let structure = Struct::new("4sI |2B 7s2x 16a").unwrap();
        assert_eq!(structure.calcsize(None).unwrap(), 24);
    }

    #[test]
    fn calcsize_scalar_widths() {
        assert_eq!(Struct::new("bBhHuUiIqQ").unwrap().calcsize(None).unwrap(), 36);
        assert_eq!(Struct::new("efdF").unwrap().calcsize(None).unwrap(), 30);
        assert_eq!(Struct::new("?c 3x 4X").unwrap().calcsize(None).unwrap(), 9);
        assert_eq!(Struct::new("2(3(I))").unwrap().calcsize(None).unwrap(), 24);
    }

    #[test]
    fn calcsize_rejects_indeterminate() {
        assert!(Struct::new("4sI /1(2I)").unwrap().calcsize(None).is_err());
        assert!(Struct::new("4sI 10[2n]").unwrap().calcsize(None).is_err());
        assert!(Struct::new("I $").unwrap().calcsize(None).is_err());
        assert!(Struct::new("{I}").unwrap().calcsize(None).is_err());
    }

    #[test]
    fn calcsize_resolves_external_references() {
        let structure = Struct::new("4s #0I #1(2B)").unwrap();
        assert!(structure.calcsize(None).is_err());
        assert_eq!(structure.calcsize(Some(&[3, 2])).unwrap(), 20);
        assert!(matches!(
            structure.calcsize(Some(&[3])),
            Err(Error::Resolution { .. })
        ));
    }

    #[test]
    fn concat_renumbers_references() {
        let part1 = Struct::new("<4s").unwrap();
        let part2 = Struct::new("I /0(#0B #0b)").unwrap();
        let part3 = Struct::new("I /0s #0a").unwrap();
        let combined = part1.concat(&part2).unwrap().concat(&part3).unwrap();
        assert_eq!(combined.to_string(), "<4s I /1(#0B #0b) I /3s #1a");
    }

    #[test]
    fn repeat_renumbers_references() {
        let block = Struct::new("I /0(#0B #0b)").unwrap();
        let repeated = block.repeat(3).unwrap();
        assert_eq!(
            repeated.to_string(),
            "I /0(#0B #0b) I /2(#1B #1b) I /4(#2B #2b)"
        );
    }

    #[test]
    fn repeat_zero_and_one() {
        let structure = Struct::new("<2I").unwrap();
        assert_eq!(structure.repeat(0).unwrap().to_string(), "");
        assert_eq!(structure.repeat(1).unwrap().format(), "<2I");
    }

    #[test]
    fn concat_rejects_terminal_left() {
        let left = Struct::new("4s $").unwrap();
        let right = Struct::new("2B").unwrap();
        assert!(left.concat(&right).is_err());

        let left = Struct::new("{B}").unwrap();
        assert!(left.concat(&right).is_err());
    }

    #[test]
    fn concat_rejects_indeterminate_left_with_absolute_right() {
        let left = Struct::new("B /0B").unwrap();
        assert!(left.concat(&Struct::new("B /0s").unwrap()).is_err());
        // Fine when the right side has no absolute references
        assert!(left.concat(&Struct::new("2B").unwrap()).is_ok());
    }

    #[test]
    fn byte_order_defaults_and_overrides() {
        let mut structure = Struct::new("2B").unwrap();
        assert!(!structure.forced);
        structure.set_byte_order(ByteOrder::Big);
        assert_eq!(structure.byte_order(), ByteOrder::Big);
        assert!(structure.forced);

        let structure = Struct::with_options(
            "2B",
            StructOptions::new().with_byte_order(ByteOrder::Big),
        )
        .unwrap();
        assert_eq!(structure.byte_order(), ByteOrder::Big);

        // A marker in the format always wins
        let structure = Struct::with_options(
            "<I",
            StructOptions::new().with_byte_order(ByteOrder::Big),
        )
        .unwrap();
        assert_eq!(structure.byte_order(), ByteOrder::Little);
    }
}

//! The unpacker engine.
//!
//! Drives a byte cursor across a compiled token tree, producing the nested
//! value tree. Every scope (the top level, and each iteration of a group or
//! iterator body) keeps its own value vector, against which absolute and
//! relative references resolve, and its own alignment base anchored where
//! the scope began.

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::error::{Error, Result};
use crate::scalar::{decode_float, decode_int, decode_uint};
use crate::structure::{resolve_count, Struct};
use crate::token::{Token, TokenKind};
use crate::value::Value;

pub(crate) struct Unpacker<'a, R: Read + Seek> {
    structure: &'a Struct,
    reader: &'a mut R,
    refdata: &'a [usize],
    end: Option<u64>,
}

impl<'a, R: Read + Seek> Unpacker<'a, R> {
    pub(crate) fn new(structure: &'a Struct, reader: &'a mut R, refdata: &'a [usize]) -> Self {
        Unpacker {
            structure,
            reader,
            refdata,
            end: None,
        }
    }

    /// Decodes the whole structure, returning the top-level value vector
    /// and the final cursor position.
    pub(crate) fn run(mut self) -> Result<(Vec<Value>, u64)> {
        let tokens: &'a [Token] = &self.structure.tokens;
        let values = self.unpack_scope(tokens)?;
        let end = self.position()?;
        Ok((values, end))
    }

    fn unpack_scope(&mut self, tokens: &[Token]) -> Result<Vec<Value>> {
        let mut alignbase = self.position()?;
        let mut values: Vec<Value> = Vec::new();

        for token in tokens {
            let count = resolve_count(token, &values, self.refdata, &self.structure.format)?;
            match &token.kind {
                TokenKind::Group(children) => {
                    let mut merged = Vec::new();
                    for _ in 0..count {
                        merged.extend(self.unpack_scope(children)?);
                    }
                    values.push(Value::List(merged));
                }
                TokenKind::Iter(children) => {
                    let mut list = Vec::with_capacity(count);
                    for _ in 0..count {
                        list.push(Value::List(self.unpack_scope(children)?));
                    }
                    values.push(Value::List(list));
                }
                TokenKind::Greedy(children) => {
                    let end = self.stream_end()?;
                    let mut list = Vec::new();
                    let mut position = self.position()?;
                    while position < end {
                        list.push(Value::List(self.unpack_scope(children)?));
                        let after = self.position()?;
                        if after == position {
                            return Err(Error::data(
                                "unbounded iterator body consumes no data",
                                &self.structure.format,
                                token.position,
                                after,
                            ));
                        }
                        position = after;
                    }
                    values.push(Value::List(list));
                }
                TokenKind::AlignBase => alignbase = self.position()?,
                TokenKind::Align => {
                    if count == 0 {
                        return Err(Error::resolution(
                            "alignment must be at least 1",
                            &self.structure.format,
                            token.position,
                        ));
                    }
                    let position = self.position()?;
                    let remainder = (position - alignbase) % count as u64;
                    if remainder != 0 {
                        self.skip(count as u64 - remainder)?;
                    }
                }
                TokenKind::Rest => {
                    let mut rest = Vec::new();
                    self.reader.read_to_end(&mut rest)?;
                    values.push(Value::Bytes(rest));
                }
                TokenKind::Pad => self.skip(count as u64)?,
                TokenKind::Bool => {
                    let raw = self.read_exact(count, token)?;
                    values.extend(raw.iter().map(|&byte| Value::Bool(byte != 0)));
                }
                TokenKind::Char => {
                    let raw = self.read_exact(count, token)?;
                    values.extend(raw.iter().map(|&byte| Value::Char(byte)));
                }
                TokenKind::Bytes => {
                    values.push(Value::Bytes(self.read_exact(count, token)?));
                }
                TokenKind::Hex => {
                    let raw = self.read_exact(count, token)?;
                    let hex: String = raw.iter().map(|byte| format!("{:02x}", byte)).collect();
                    values.push(Value::Str(hex));
                }
                TokenKind::CString => {
                    for _ in 0..count {
                        values.push(Value::Bytes(self.read_until_nul(token)?));
                    }
                }
                kind => {
                    if let Some((signed, width)) = kind.int_spec() {
                        let raw = self.read_exact(width * count, token)?;
                        for chunk in raw.chunks_exact(width) {
                            values.push(if signed {
                                Value::Int(decode_int(chunk, self.structure.byte_order))
                            } else {
                                Value::Uint(decode_uint(chunk, self.structure.byte_order))
                            });
                        }
                    } else {
                        let spec = kind.float_spec().expect("scalar token kinds are exhaustive");
                        let raw = self.read_exact(spec.width * count, token)?;
                        for chunk in raw.chunks_exact(spec.width) {
                            values.push(Value::Float(decode_float(
                                chunk,
                                spec,
                                self.structure.byte_order,
                            )));
                        }
                    }
                }
            }
        }
        Ok(values)
    }

    fn position(&mut self) -> Result<u64> {
        Ok(self.reader.stream_position()?)
    }

    /// End of the underlying stream, probed once per run.
    fn stream_end(&mut self) -> Result<u64> {
        if let Some(end) = self.end {
            return Ok(end);
        }
        let position = self.reader.stream_position()?;
        let end = self.reader.seek(SeekFrom::End(0))?;
        self.reader.seek(SeekFrom::Start(position))?;
        self.end = Some(end);
        Ok(end)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }

    fn read_exact(&mut self, length: usize, token: &Token) -> Result<Vec<u8>> {
        let offset = self.position()?;
        let mut buffer = vec![0u8; length];
        self.reader.read_exact(&mut buffer).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                Error::data(
                    format!(
                        "no data remaining to read element '{}'",
                        token.kind.symbol()
                    ),
                    &self.structure.format,
                    token.position,
                    offset,
                )
            } else {
                Error::Io(err.to_string())
            }
        })?;
        Ok(buffer)
    }

    fn read_until_nul(&mut self, token: &Token) -> Result<Vec<u8>> {
        let mut string = Vec::new();
        loop {
            let byte = self.read_exact(1, token)?;
            if byte[0] == 0 {
                return Ok(string);
            }
            string.push(byte[0]);
        }
    }
}

/// Iterator returned by [`iter_unpack`](crate::iter_unpack): unpacks the
/// same structure repeatedly over consecutive chunks of the data.
pub struct IterUnpack<'d> {
    structure: Struct,
    data: &'d [u8],
    refdata: Vec<usize>,
    size: usize,
    offset: usize,
}

impl<'d> IterUnpack<'d> {
    pub(crate) fn new(structure: Struct, data: &'d [u8], refdata: Vec<usize>) -> Result<Self> {
        let size = structure.calcsize(Some(refdata.as_slice()))?;
        if size == 0 {
            return Err(Error::data(
                "cannot iterate over a zero-size structure",
                &structure.format,
                0,
                0,
            ));
        }
        if data.len() % size != 0 {
            return Err(Error::data(
                format!(
                    "data length {} is not a multiple of the structure size {}",
                    data.len(),
                    size
                ),
                &structure.format,
                0,
                data.len() as u64,
            ));
        }
        Ok(IterUnpack {
            structure,
            data,
            refdata,
            size,
            offset: 0,
        })
    }
}

impl Iterator for IterUnpack<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let result = self
            .structure
            .unpack_from(self.data, self.offset, &self.refdata)
            .map(|(values, _)| values);
        self.offset += self.size;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.data.len() - self.offset) / self.size;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for IterUnpack<'_> {}

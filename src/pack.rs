//! The packer engine.
//!
//! Consumes a flat argument sequence while walking the token tree, writing
//! bytes to a seekable sink. Reference semantics mirror the unpacker: the
//! arguments already consumed in the current scope stand in for the value
//! vector, so a reference resolves to the same element on both sides.
//!
//! Sub-structures consume exactly one argument each: a group takes one flat
//! sequence covering all its repetitions, an iterator takes a sequence of
//! per-iteration sub-sequences. Argument shapes are checked exactly; both
//! leftover and missing elements are argument errors.

use std::io::{Seek, Write};

use crate::error::{Error, Result};
use crate::scalar::{encode_float, int_bounds, put_int, put_uint};
use crate::structure::{resolve_count, Struct};
use crate::token::{Token, TokenKind};
use crate::value::Value;

pub(crate) struct Packer<'a, W: Write + Seek> {
    structure: &'a Struct,
    out: &'a mut W,
    refdata: &'a [usize],
}

impl<'a, W: Write + Seek> Packer<'a, W> {
    pub(crate) fn new(structure: &'a Struct, out: &'a mut W, refdata: &'a [usize]) -> Self {
        Packer {
            structure,
            out,
            refdata,
        }
    }

    /// Packs the whole argument sequence; every argument must be consumed.
    pub(crate) fn run(mut self, values: &[Value]) -> Result<()> {
        let tokens: &'a [Token] = &self.structure.tokens;
        let used = self.pack_scope(tokens, values)?;
        if used != values.len() {
            return Err(Error::argument(
                format!("{} unused trailing arguments", values.len() - used),
                &self.structure.format,
                self.structure.format.len(),
                used,
            ));
        }
        Ok(())
    }

    /// Packs one scope, returning how many arguments it consumed.
    fn pack_scope(&mut self, tokens: &[Token], args: &[Value]) -> Result<usize> {
        let mut alignbase = self.position()?;
        let mut index = 0usize;

        for token in tokens {
            let count = resolve_count(token, &args[..index], self.refdata, &self.structure.format)?;
            match &token.kind {
                TokenKind::Group(children) => {
                    let list = self.list_arg(args, index, token)?;
                    let mut used = 0;
                    for _ in 0..count {
                        used += self.pack_scope(children, &list[used..])?;
                    }
                    if used != list.len() {
                        return Err(self.argument_error(
                            format!("group argument has {} leftover elements", list.len() - used),
                            token,
                            index,
                        ));
                    }
                    index += 1;
                }
                TokenKind::Iter(children) => {
                    let list = self.list_arg(args, index, token)?;
                    if list.len() != count {
                        return Err(self.argument_error(
                            format!(
                                "iterator argument must hold {} sub-sequences, got {}",
                                count,
                                list.len()
                            ),
                            token,
                            index,
                        ));
                    }
                    for sub in list {
                        self.pack_sub(children, sub, token, index)?;
                    }
                    index += 1;
                }
                TokenKind::Greedy(children) => {
                    let list = self.list_arg(args, index, token)?;
                    for sub in list {
                        self.pack_sub(children, sub, token, index)?;
                    }
                    index += 1;
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
                    let distance = self.position()? - alignbase;
                    let remainder = distance % count as u64;
                    if remainder != 0 {
                        self.write_zeros((count as u64 - remainder) as usize)?;
                    }
                }
                TokenKind::Pad => self.write_zeros(count)?,
                TokenKind::Rest => {
                    let bytes = self.bytes_arg(args, index, token)?;
                    self.write(&bytes)?;
                    index += 1;
                }
                TokenKind::Bool => {
                    let mut buffer = Vec::with_capacity(count);
                    for _ in 0..count {
                        let arg = self.arg(args, index, token)?;
                        let Value::Bool(flag) = arg else {
                            return Err(self.argument_error(
                                format!(
                                    "wrong type for element '?': expected bool, got {}",
                                    arg.kind_name()
                                ),
                                token,
                                index,
                            ));
                        };
                        buffer.push(u8::from(*flag));
                        index += 1;
                    }
                    self.write(&buffer)?;
                }
                TokenKind::Char => {
                    let mut buffer = Vec::with_capacity(count);
                    for _ in 0..count {
                        let arg = self.arg(args, index, token)?;
                        let byte = match arg {
                            Value::Char(c) => *c,
                            Value::Bytes(b) if b.len() == 1 => b[0],
                            _ => {
                                return Err(self.argument_error(
                                    format!(
                                        "wrong type for element 'c': expected a single byte, got {}",
                                        arg.kind_name()
                                    ),
                                    token,
                                    index,
                                ))
                            }
                        };
                        buffer.push(byte);
                        index += 1;
                    }
                    self.write(&buffer)?;
                }
                TokenKind::Bytes => {
                    let bytes = self.bytes_arg(args, index, token)?;
                    if bytes.len() > count {
                        return Err(self.argument_error(
                            format!(
                                "byte string of length {} does not fit in a {}-byte 's' element",
                                bytes.len(),
                                count
                            ),
                            token,
                            index,
                        ));
                    }
                    self.write(&bytes)?;
                    self.write_zeros(count - bytes.len())?;
                    index += 1;
                }
                TokenKind::Hex => {
                    let arg = self.arg(args, index, token)?;
                    let Value::Str(hex) = arg else {
                        return Err(self.argument_error(
                            format!(
                                "wrong type for element 'X': expected a hex string, got {}",
                                arg.kind_name()
                            ),
                            token,
                            index,
                        ));
                    };
                    if hex.len() != 2 * count {
                        return Err(self.argument_error(
                            format!(
                                "hex string of length {} does not match a {}-byte 'X' element",
                                hex.len(),
                                count
                            ),
                            token,
                            index,
                        ));
                    }
                    let mut bytes = Vec::with_capacity(count);
                    for pair in hex.as_bytes().chunks_exact(2) {
                        let digits = std::str::from_utf8(pair)
                            .ok()
                            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                            .ok_or_else(|| {
                                self.argument_error(
                                    format!("invalid hexadecimal string {:?}", hex),
                                    token,
                                    index,
                                )
                            })?;
                        bytes.push(digits);
                    }
                    self.write(&bytes)?;
                    index += 1;
                }
                TokenKind::CString => {
                    for _ in 0..count {
                        let bytes = self.bytes_arg(args, index, token)?;
                        if bytes.contains(&0) {
                            return Err(self.argument_error(
                                "null-terminated string argument contains a null byte",
                                token,
                                index,
                            ));
                        }
                        self.write(&bytes)?;
                        self.write_zeros(1)?;
                        index += 1;
                    }
                }
                kind => {
                    if let Some((signed, width)) = kind.int_spec() {
                        let mut buffer = Vec::with_capacity(width * count);
                        for _ in 0..count {
                            self.pack_int(args, index, token, signed, width, &mut buffer)?;
                            index += 1;
                        }
                        self.write(&buffer)?;
                    } else {
                        let spec = kind.float_spec().expect("scalar token kinds are exhaustive");
                        let mut buffer = Vec::with_capacity(spec.width * count);
                        for _ in 0..count {
                            let arg = self.arg(args, index, token)?;
                            let value = arg.as_f64().ok_or_else(|| {
                                self.argument_error(
                                    format!(
                                        "wrong type for element '{}': expected a number, got {}",
                                        token.kind.symbol(),
                                        arg.kind_name()
                                    ),
                                    token,
                                    index,
                                )
                            })?;
                            encode_float(value, spec, self.structure.byte_order, &mut buffer)
                                .map_err(|_| {
                                    self.overflow_error(
                                        format!(
                                            "floating-point value {} is too big for a {}-bit float",
                                            value,
                                            spec.width * 8
                                        ),
                                        token,
                                        index,
                                    )
                                })?;
                            index += 1;
                        }
                        self.write(&buffer)?;
                    }
                }
            }
        }
        Ok(index)
    }

    fn pack_int(
        &mut self,
        args: &[Value],
        index: usize,
        token: &Token,
        signed: bool,
        width: usize,
        buffer: &mut Vec<u8>,
    ) -> Result<()> {
        let arg = self.arg(args, index, token)?;
        let value: i128 = match arg {
            Value::Int(i) => i128::from(*i),
            Value::Uint(u) => i128::from(*u),
            Value::Bool(b) => i128::from(*b),
            _ => {
                return Err(self.argument_error(
                    format!(
                        "wrong type for element '{}': expected an integer, got {}",
                        token.kind.symbol(),
                        arg.kind_name()
                    ),
                    token,
                    index,
                ))
            }
        };
        let (min, max) = int_bounds(signed, width);
        if value < min || value > max {
            return Err(self.overflow_error(
                format!(
                    "value {} does not fit in a {}-bit {} integer",
                    value,
                    width * 8,
                    if signed { "signed" } else { "unsigned" }
                ),
                token,
                index,
            ));
        }
        if signed {
            put_int(buffer, value as i64, width, self.structure.byte_order);
        } else {
            put_uint(buffer, value as u64, width, self.structure.byte_order);
        }
        Ok(())
    }

    fn pack_sub(
        &mut self,
        children: &[Token],
        sub: &Value,
        token: &Token,
        index: usize,
    ) -> Result<()> {
        let Value::List(items) = sub else {
            return Err(self.argument_error(
                format!(
                    "iterator argument must contain sub-sequences, got {}",
                    sub.kind_name()
                ),
                token,
                index,
            ));
        };
        let used = self.pack_scope(children, items)?;
        if used != items.len() {
            return Err(self.argument_error(
                format!(
                    "iterator sub-sequence has {} leftover elements",
                    items.len() - used
                ),
                token,
                index,
            ));
        }
        Ok(())
    }

    fn arg<'v>(&self, args: &'v [Value], index: usize, token: &Token) -> Result<&'v Value> {
        args.get(index).ok_or_else(|| {
            self.argument_error(
                format!(
                    "no data remaining to pack into element '{}'",
                    token.kind.symbol()
                ),
                token,
                index,
            )
        })
    }

    fn list_arg<'v>(&self, args: &'v [Value], index: usize, token: &Token) -> Result<&'v [Value]> {
        let arg = self.arg(args, index, token)?;
        arg.as_list().ok_or_else(|| {
            self.argument_error(
                format!(
                    "wrong type for element '{}': expected a sequence, got {}",
                    token.kind.symbol(),
                    arg.kind_name()
                ),
                token,
                index,
            )
        })
    }

    fn bytes_arg(&self, args: &[Value], index: usize, token: &Token) -> Result<Vec<u8>> {
        let arg = self.arg(args, index, token)?;
        match arg {
            Value::Bytes(bytes) => Ok(bytes.clone()),
            Value::Str(text) => Ok(text.clone().into_bytes()),
            _ => Err(self.argument_error(
                format!(
                    "wrong type for element '{}': expected bytes, got {}",
                    token.kind.symbol(),
                    arg.kind_name()
                ),
                token,
                index,
            )),
        }
    }

    fn argument_error(&self, msg: impl Into<String>, token: &Token, index: usize) -> Error {
        Error::argument(msg, &self.structure.format, token.position, index)
    }

    fn overflow_error(&self, msg: impl Into<String>, token: &Token, index: usize) -> Error {
        Error::overflow(msg, &self.structure.format, token.position, index)
    }

    fn position(&mut self) -> Result<u64> {
        Ok(self.out.stream_position()?)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    fn write_zeros(&mut self, n: usize) -> Result<()> {
        self.write(&vec![0u8; n])
    }
}

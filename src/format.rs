//! Format Language Reference
//!
//! This module documents the format language as implemented by this
//! library. A format string describes a binary structure element by
//! element; whitespace is insignificant and single- or double-quoted runs
//! are comments.
//!
//! # Byte-order marks
//!
//! The first character of a format may select the byte order of every
//! multi-byte scalar in the structure:
//!
//! | Mark | Order |
//! |------|-------|
//! | `<` | little-endian (least significant byte first) |
//! | `>` | big-endian (most significant byte first) |
//! | `!` | network byte order (big-endian) |
//! | `=` | system byte order |
//! | `@` | system byte order (unlike `struct`, no native alignment) |
//!
//! Without a mark, the structure uses the system order, or the default
//! order configured through
//! [`StructOptions::with_byte_order`](crate::StructOptions::with_byte_order).
//!
//! # Format characters
//!
//! | Character | Meaning | Decoded as |
//! |-----------|---------|------------|
//! | `?` | 8-bit boolean (any nonzero is true, true packs as `0x01`) | `Bool` |
//! | `b` / `B` | signed / unsigned 8-bit integer | `Int` / `Uint` |
//! | `h` / `H` | signed / unsigned 16-bit integer | `Int` / `Uint` |
//! | `u` / `U` | signed / unsigned 24-bit integer | `Int` / `Uint` |
//! | `i`, `l` / `I`, `L` | signed / unsigned 32-bit integer | `Int` / `Uint` |
//! | `q` / `Q` | signed / unsigned 64-bit integer | `Int` / `Uint` |
//! | `e` | half-precision IEEE754 float (16 bits) | `Float` |
//! | `f` | single-precision IEEE754 float (32 bits) | `Float` |
//! | `d` | double-precision IEEE754 float (64 bits) | `Float` |
//! | `F` | quadruple-precision IEEE754 float (128 bits) | `Float` |
//! | `c` | single byte | `Char` |
//! | `s` | byte string, the count is the length (`16s` = 16 bytes) | `Bytes` |
//! | `n` | null-terminated string, terminator excluded; the count is a number of strings | `Bytes` |
//! | `X` | hex string, like `s` but decoding to hexadecimal text | `Str` |
//! | `x` | padding byte, packs as `0x00`, produces no value | — |
//! | `a` | alignment: pad with null bytes to the next multiple of the count | — |
//! | `\|` | alignment base: `a` aligns relative to the scope start or the last `\|` | — |
//! | `$` | all remaining bytes, top level only | `Bytes` |
//!
//! # Counts
//!
//! A count prefixes an element and gives an amount of successive elements
//! of that type, or sometimes a length:
//!
//! - (nothing) — equivalent to `1`
//! - `4` — a literal count (`4I` = `IIII`, `16s` = a 16-byte string)
//! - `/1` — absolute reference: the value of element 1 of the current
//!   scope is the count; indices start at 0 and count one index per
//!   decoded value
//! - `/p1` — relative reference: the value of the element one position
//!   back; `/p1` is the immediately preceding value
//! - `#0` — external reference: element 0 of the `refdata` parameter
//!
//! References must point backwards at an integer element. By default the
//! analyzer also rejects references that reach into or across a stretch of
//! elements whose shape only the data determines (reference-counted
//! scalars, `n` strings, sub-structures with data-dependent contents);
//! compile with
//! [`unsafe_references`](crate::StructOptions::with_unsafe_references) to
//! defer those to run time.
//!
//! # Sub-structures
//!
//! Sub-structures nest their values into sub-sequences, organise related
//! elements, and carry iteration directly in the format. References and
//! alignments are always local to their sub-structure.
//!
//! - `5(2B i)` — **group**: extracted into one sub-sequence. A count
//!   repeats the contents *within the same sub-sequence*: `3(I)` yields
//!   `[1, 2, 3]`, so `I /0(n)` reads a counted list of strings into one
//!   flat sub-sequence.
//! - `5[2B i]` — **iterator**: like a group, but every repetition yields
//!   its own nested sub-sequence: `3[2I]` yields
//!   `[[1, 2], [3, 4], [5, 6]]`.
//! - `{2B i}` — **unbounded iterator**: like `[…]` but repeats until the
//!   data runs out, which must happen exactly at a repetition boundary. It
//!   takes no count and ends its scope.
//!
//! # Differences from the classic fixed-structure packer
//!
//! For callers coming from `struct`-style format strings:
//!
//! - `N`, `P` and `p` are not recognised; `n` is repurposed as the
//!   null-terminated string element
//! - `@` does not imply native alignment
//! - unpacking does not fail on input longer than the structure; trailing
//!   bytes are ignored unless `{…}` or `$` consumes them

// This module contains only documentation; no implementation code

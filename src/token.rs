//! Format-language tokenizer and the token tree it produces.
//!
//! A format string is parsed once into a [`Token`] tree which the analyzer
//! validates and the engines interpret. Parsing handles the byte-order
//! prefix, whitespace, quoted comments, repeat counts (literal or
//! reference), nested sub-structures and the placement rules for `{…}`,
//! `|` and `$`.

use crate::error::{Error, Result};
use crate::scalar::{ByteOrder, FloatSpec, DOUBLE, HALF, QUAD, SINGLE};

/// A repeat specifier attached to a token.
///
/// `Literal` is a plain decimal count; the reference kinds resolve at
/// pack/unpack time against the current scope's value vector (`Absolute`,
/// `Relative`) or the caller-supplied `refdata` (`External`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Literal(usize),
    /// `/N`: the value of the N-th element of the current scope.
    Absolute(usize),
    /// `/pN`: the value of the element N positions back.
    Relative(usize),
    /// `#N`: the N-th element of `refdata`.
    External(usize),
}

impl Count {
    pub(crate) fn literal(self) -> Option<usize> {
        match self {
            Count::Literal(n) => Some(n),
            _ => None,
        }
    }
}

/// How many values a token contributes to its scope's value vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arity {
    /// One value per resolved count (integers, floats, `?`, `c`, `n`).
    PerCount,
    /// Exactly one value regardless of count (`s`, `X`, `$`, sub-structures).
    One,
    /// No value at all (`x`, `a`, `|`).
    Zero,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `?`
    Bool,
    /// `b`
    Int8,
    /// `B`
    Uint8,
    /// `h`
    Int16,
    /// `H`
    Uint16,
    /// `u`
    Int24,
    /// `U`
    Uint24,
    /// `i`, `l`
    Int32,
    /// `I`, `L`
    Uint32,
    /// `q`
    Int64,
    /// `Q`
    Uint64,
    /// `e`
    Half,
    /// `f`
    Single,
    /// `d`
    Double,
    /// `F`
    Quad,
    /// `c`
    Char,
    /// `s`: byte string, count is the length
    Bytes,
    /// `n`: null-terminated string, count is a number of strings
    CString,
    /// `X`: hex string, count is the raw length
    Hex,
    /// `x`: padding byte
    Pad,
    /// `a`: align to a multiple of count from the scope's alignment base
    Align,
    /// `|`: reset the scope's alignment base
    AlignBase,
    /// `$`: all remaining bytes
    Rest,
    /// `(…)`: group, repetitions flatten into one sub-sequence
    Group(Vec<Token>),
    /// `[…]`: bounded iterator, one sub-sequence per repetition
    Iter(Vec<Token>),
    /// `{…}`: unbounded iterator, repeats until end of data
    Greedy(Vec<Token>),
}

impl TokenKind {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '?' => TokenKind::Bool,
            'b' => TokenKind::Int8,
            'B' => TokenKind::Uint8,
            'h' => TokenKind::Int16,
            'H' => TokenKind::Uint16,
            'u' => TokenKind::Int24,
            'U' => TokenKind::Uint24,
            'i' | 'l' => TokenKind::Int32,
            'I' | 'L' => TokenKind::Uint32,
            'q' => TokenKind::Int64,
            'Q' => TokenKind::Uint64,
            'e' => TokenKind::Half,
            'f' => TokenKind::Single,
            'd' => TokenKind::Double,
            'F' => TokenKind::Quad,
            'c' => TokenKind::Char,
            's' => TokenKind::Bytes,
            'n' => TokenKind::CString,
            'X' => TokenKind::Hex,
            'x' => TokenKind::Pad,
            'a' => TokenKind::Align,
            '|' => TokenKind::AlignBase,
            '$' => TokenKind::Rest,
            _ => return None,
        })
    }

    /// The canonical format character, for display and error messages.
    pub(crate) fn symbol(&self) -> char {
        match self {
            TokenKind::Bool => '?',
            TokenKind::Int8 => 'b',
            TokenKind::Uint8 => 'B',
            TokenKind::Int16 => 'h',
            TokenKind::Uint16 => 'H',
            TokenKind::Int24 => 'u',
            TokenKind::Uint24 => 'U',
            TokenKind::Int32 => 'i',
            TokenKind::Uint32 => 'I',
            TokenKind::Int64 => 'q',
            TokenKind::Uint64 => 'Q',
            TokenKind::Half => 'e',
            TokenKind::Single => 'f',
            TokenKind::Double => 'd',
            TokenKind::Quad => 'F',
            TokenKind::Char => 'c',
            TokenKind::Bytes => 's',
            TokenKind::CString => 'n',
            TokenKind::Hex => 'X',
            TokenKind::Pad => 'x',
            TokenKind::Align => 'a',
            TokenKind::AlignBase => '|',
            TokenKind::Rest => '$',
            TokenKind::Group(_) => '(',
            TokenKind::Iter(_) => '[',
            TokenKind::Greedy(_) => '{',
        }
    }

    /// `(signed, width in bytes)` for integer kinds.
    pub(crate) fn int_spec(&self) -> Option<(bool, usize)> {
        Some(match self {
            TokenKind::Int8 => (true, 1),
            TokenKind::Uint8 => (false, 1),
            TokenKind::Int16 => (true, 2),
            TokenKind::Uint16 => (false, 2),
            TokenKind::Int24 => (true, 3),
            TokenKind::Uint24 => (false, 3),
            TokenKind::Int32 => (true, 4),
            TokenKind::Uint32 => (false, 4),
            TokenKind::Int64 => (true, 8),
            TokenKind::Uint64 => (false, 8),
            _ => return None,
        })
    }

    pub(crate) fn float_spec(&self) -> Option<FloatSpec> {
        Some(match self {
            TokenKind::Half => HALF,
            TokenKind::Single => SINGLE,
            TokenKind::Double => DOUBLE,
            TokenKind::Quad => QUAD,
            _ => return None,
        })
    }

    /// Whether a reference may target this token's values as a count.
    pub(crate) fn is_referencable(&self) -> bool {
        matches!(self, TokenKind::Bool) || self.int_spec().is_some()
    }

    pub(crate) fn arity(&self) -> Arity {
        match self {
            TokenKind::Bool
            | TokenKind::Char
            | TokenKind::CString
            | TokenKind::Half
            | TokenKind::Single
            | TokenKind::Double
            | TokenKind::Quad => Arity::PerCount,
            _ if self.int_spec().is_some() => Arity::PerCount,
            TokenKind::Bytes
            | TokenKind::Hex
            | TokenKind::Rest
            | TokenKind::Group(_)
            | TokenKind::Iter(_)
            | TokenKind::Greedy(_) => Arity::One,
            TokenKind::Pad | TokenKind::Align | TokenKind::AlignBase => Arity::Zero,
            _ => unreachable!(),
        }
    }

    pub(crate) fn children(&self) -> Option<&[Token]> {
        match self {
            TokenKind::Group(c) | TokenKind::Iter(c) | TokenKind::Greedy(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<Token>> {
        match self {
            TokenKind::Group(c) | TokenKind::Iter(c) | TokenKind::Greedy(c) => Some(c),
            _ => None,
        }
    }

    /// Repeat-style kinds merge with an identical neighbour (`IIII` → `4I`).
    fn coalesces(&self) -> bool {
        matches!(self, TokenKind::Pad) || self.arity() == Arity::PerCount
    }
}

/// One element of a compiled structure: a kind, a repeat specifier and the
/// byte position of the element in the source format string.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub count: Count,
    pub position: usize,
}

impl Token {
    /// Number of values this token appends to its scope's value vector,
    /// when that is statically known.
    pub(crate) fn value_count(&self) -> Option<usize> {
        match self.kind.arity() {
            Arity::PerCount => self.count.literal(),
            Arity::One => Some(1),
            Arity::Zero => Some(0),
        }
    }
}

/// Parses a format string into its token list and optional byte-order mark.
pub(crate) fn tokenize(format: &str) -> Result<(Vec<Token>, Option<ByteOrder>)> {
    let mut tokenizer = Tokenizer {
        format,
        chars: format.char_indices().collect(),
        pos: 0,
    };
    tokenizer.skip_whitespace();
    let order = match tokenizer.peek().and_then(ByteOrder::from_marker) {
        Some(order) => {
            tokenizer.bump();
            Some(order)
        }
        None => None,
    };
    let tokens = tokenizer.parse_scope(None)?;
    Ok((tokens, order))
}

struct Tokenizer<'f> {
    format: &'f str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Tokenizer<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn byte_pos(&self) -> usize {
        self.chars
            .get(self.pos)
            .map_or(self.format.len(), |&(b, _)| b)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Skips a quoted comment; either quote character closes either.
    fn skip_comment(&mut self) -> Result<()> {
        let open = self.byte_pos();
        self.bump();
        loop {
            match self.peek() {
                Some('\'') | Some('"') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => self.bump(),
                None => {
                    return Err(Error::format("comment is never closed", self.format, open));
                }
            }
        }
    }

    /// Parses an optional run of decimal digits.
    fn parse_digits(&mut self) -> Result<Option<usize>> {
        let start = self.byte_pos();
        let mut value: Option<usize> = None;
        while let Some(c) = self.peek() {
            let Some(digit) = c.to_digit(10) else { break };
            let accumulated = value
                .unwrap_or(0)
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit as usize))
                .ok_or_else(|| Error::format("repeat count is too large", self.format, start))?;
            value = Some(accumulated);
            self.bump();
        }
        Ok(value)
    }

    /// Parses the tokens of one scope. `scope` is the opening bracket's
    /// byte position and character, or `None` for the top level.
    fn parse_scope(&mut self, scope: Option<(usize, char)>) -> Result<Vec<Token>> {
        let closer = scope.map(|(_, opener)| match opener {
            '(' => ')',
            '[' => ']',
            _ => '}',
        });
        let mut tokens: Vec<Token> = Vec::new();
        let mut terminator: Option<(usize, char)> = None;

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('\'') | Some('"') => {
                    self.skip_comment()?;
                    continue;
                }
                Some(c) if Some(c) == closer => {
                    self.bump();
                    return Ok(tokens);
                }
                None => {
                    if let Some((open, opener)) = scope {
                        return Err(Error::format(
                            format!("group starting with '{}' is never closed", opener),
                            self.format,
                            open,
                        ));
                    }
                    return Ok(tokens);
                }
                _ => {}
            }

            // A new element begins here
            if let Some((at, symbol)) = terminator {
                return Err(Error::format(
                    format!(
                        "'{}' terminates the structure, there should be nothing else afterwards",
                        symbol
                    ),
                    self.format,
                    at,
                ));
            }
            let start = self.byte_pos();
            let count = self.parse_count(start)?;
            let token = self.parse_element(start, count, closer, scope.is_none())?;

            if matches!(token.kind, TokenKind::Greedy(_) | TokenKind::Rest) {
                terminator = Some((start, token.kind.symbol()));
            }

            // IIII -> 4I
            if token.kind.coalesces() {
                if let (Some(n), Some(previous)) = (token.count.literal(), tokens.last_mut()) {
                    if previous.kind == token.kind {
                        if let Some(m) = previous.count.literal() {
                            previous.count = Count::Literal(m.checked_add(n).ok_or_else(
                                || Error::format("repeat count is too large", self.format, start),
                            )?);
                            continue;
                        }
                    }
                }
            }
            tokens.push(token);
        }
    }

    fn parse_count(&mut self, start: usize) -> Result<Count> {
        match self.peek() {
            Some('/') => {
                self.bump();
                let relative = self.peek() == Some('p');
                if relative {
                    self.bump();
                }
                match self.parse_digits()? {
                    Some(n) if relative => Ok(Count::Relative(n)),
                    Some(n) => Ok(Count::Absolute(n)),
                    None => Err(Error::format("no reference index", self.format, start)),
                }
            }
            Some('#') => {
                self.bump();
                match self.parse_digits()? {
                    Some(n) => Ok(Count::External(n)),
                    None => Err(Error::format("no reference index", self.format, start)),
                }
            }
            _ => Ok(match self.parse_digits()? {
                Some(n) => Count::Literal(n),
                None => Count::Literal(1),
            }),
        }
    }

    fn parse_element(
        &mut self,
        start: usize,
        count: Count,
        closer: Option<char>,
        top_level: bool,
    ) -> Result<Token> {
        let c = match self.peek() {
            None => {
                return Err(Error::format(
                    "repeat count is not followed by an element",
                    self.format,
                    start,
                ))
            }
            Some(c) if Some(c) == closer => {
                return Err(Error::format(
                    "repeat count is not followed by an element",
                    self.format,
                    start,
                ))
            }
            Some(c) => c,
        };

        let kind = match c {
            '(' | '[' | '{' => {
                let open = self.byte_pos();
                self.bump();
                let children = self.parse_scope(Some((open, c)))?;
                match c {
                    '(' => TokenKind::Group(children),
                    '[' => TokenKind::Iter(children),
                    _ => TokenKind::Greedy(children),
                }
            }
            _ => {
                let kind = TokenKind::from_char(c).ok_or_else(|| {
                    Error::format(
                        format!("unrecognised format character '{}'", c),
                        self.format,
                        self.byte_pos(),
                    )
                })?;
                self.bump();
                kind
            }
        };

        if matches!(
            kind,
            TokenKind::Greedy(_) | TokenKind::AlignBase | TokenKind::Rest
        ) && count != Count::Literal(1)
        {
            return Err(Error::format(
                format!("'{}' elements should not be multiple", kind.symbol()),
                self.format,
                start,
            ));
        }
        if matches!(kind, TokenKind::Rest) && !top_level {
            return Err(Error::format(
                "'$' is only allowed at the top level of the structure",
                self.format,
                start,
            ));
        }
        if matches!(kind, TokenKind::Align) && count == Count::Literal(0) {
            return Err(Error::format(
                "alignment must be at least 1",
                self.format,
                start,
            ));
        }

        Ok(Token {
            kind,
            count,
            position: start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(format: &str) -> Vec<Token> {
        tokenize(format).unwrap().0
    }

    #[test]
    fn parses_flat_structure() {
        let (tokens, order) = tokenize("<2B 4n 16a 4s 4x 10c hHIQq6? | i2suU 8a $").unwrap();
        assert_eq!(order, Some(ByteOrder::Little));
        assert_eq!(tokens.first().unwrap().kind, TokenKind::Uint8);
        assert_eq!(tokens.first().unwrap().count, Count::Literal(2));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Rest);
    }

    #[test]
    fn parses_references_as_counts() {
        let tokens = kinds("2H /0n #0I 2B /p2s");
        assert_eq!(tokens[1].count, Count::Absolute(0));
        assert_eq!(tokens[2].count, Count::External(0));
        assert_eq!(tokens[4].count, Count::Relative(2));
    }

    #[test]
    fn parses_nested_groups() {
        let tokens = kinds("I 160[I 12s (4I) 4[I(2Bh)]]");
        let TokenKind::Iter(children) = &tokens[1].kind else {
            panic!("expected iterator");
        };
        assert_eq!(tokens[1].count, Count::Literal(160));
        assert!(matches!(children[2].kind, TokenKind::Group(_)));
        assert!(matches!(children[3].kind, TokenKind::Iter(_)));
    }

    #[test]
    fn skips_quoted_comments() {
        let tokens = kinds("4s 'magic' I 'number of strings' /1(n) 'strings'");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[2].count, Count::Absolute(1));
    }

    #[test]
    fn coalesces_repeated_scalars() {
        let tokens = kinds("IIII");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].count, Count::Literal(4));

        // A reference-counted token never merges
        let tokens = kinds("B /0B B");
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn byte_order_marks() {
        assert_eq!(tokenize("!I").unwrap().1, Some(ByteOrder::Big));
        assert_eq!(tokenize(">I").unwrap().1, Some(ByteOrder::Big));
        assert_eq!(tokenize("=I").unwrap().1, Some(ByteOrder::native()));
        assert_eq!(tokenize("2B").unwrap().1, None);
    }

    #[test]
    fn rejects_unknown_character() {
        let err = tokenize("4s2I 4` 5H").unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        assert!(err.to_string().contains('`'));
    }

    #[test]
    fn rejects_missing_reference_index() {
        assert!(tokenize("@4sI /(12s)").is_err());
        assert!(tokenize("#s").is_err());
    }

    #[test]
    fn rejects_repeat_on_terminal_elements() {
        assert!(tokenize("4I 4{2B}").is_err());
        assert!(tokenize("2U /0|").is_err());
        assert!(tokenize("2$").is_err());
    }

    #[test]
    fn rejects_elements_after_terminator() {
        assert!(tokenize("{2B} I").is_err());
        assert!(tokenize("$ I").is_err());
        assert!(tokenize("(2B {I}) B").is_ok());
    }

    #[test]
    fn rejects_unclosed_group() {
        assert!(tokenize("2h (2B").is_err());
        assert!(tokenize("4[HIn").is_err());
        assert!(tokenize("I 'comment").is_err());
    }

    #[test]
    fn rejects_rest_inside_substructure() {
        assert!(tokenize("2($)").is_err());
        assert!(tokenize("[B$]").is_err());
    }

    #[test]
    fn rejects_trailing_count() {
        assert!(tokenize("2B 4").is_err());
        assert!(tokenize("(4)").is_err());
    }
}

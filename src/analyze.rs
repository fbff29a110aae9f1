//! Reference analysis over a token tree.
//!
//! Two passes per scope. The first assigns every token its contribution to
//! the scope's value vector and classifies its shape; the second validates
//! every reference used as a repeat count against what precedes it.
//!
//! Element indices count runtime values: a `3B` occupies three indices, a
//! sub-structure one, and `x`/`a`/`|` none. A reference is *unambiguously*
//! invalid when it provably points at or after its own token; it is
//! *unsafe* when an element of indeterminate shape or count sits where the
//! resolver would have to look through. Unsafe references are rejected by
//! default and allowed with `unsafe_references`.

use crate::error::{Error, Result};
use crate::token::{Count, Token, TokenKind};

/// Shape determinacy. `External` is determinate once `refdata` is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Shape {
    Fixed,
    External,
    DataDependent,
}

fn token_shape(token: &Token, child_shape: Option<Shape>) -> Shape {
    let count_shape = match token.count {
        Count::Literal(_) => Shape::Fixed,
        Count::External(_) => Shape::External,
        Count::Absolute(_) | Count::Relative(_) => Shape::DataDependent,
    };
    let kind_shape = match &token.kind {
        TokenKind::CString | TokenKind::Rest | TokenKind::Greedy(_) => Shape::DataDependent,
        _ => child_shape.unwrap_or(Shape::Fixed),
    };
    count_shape.max(kind_shape)
}

struct TokenInfo {
    values: Option<usize>,
    hard_cut: bool,
    safe_cut: bool,
}

/// Validates every reference in the tree, returning the scope's shape.
pub(crate) fn analyze(tokens: &[Token], safe: bool, format: &str) -> Result<Shape> {
    // Pass 1: recurse into sub-structures, classify every token
    let mut infos = Vec::with_capacity(tokens.len());
    let mut scope_shape = Shape::Fixed;
    for token in tokens {
        let child_shape = match token.kind.children() {
            Some(children) => Some(analyze(children, safe, format)?),
            None => None,
        };
        let shape = token_shape(token, child_shape);
        let values = token.value_count();
        let hard_cut = values.is_none();
        infos.push(TokenInfo {
            values,
            hard_cut,
            safe_cut: hard_cut || shape == Shape::DataDependent,
        });
        scope_shape = scope_shape.max(shape);
    }

    // Pass 2: validate reference indices
    let mut total: usize = 0; // values so far, frozen at the first hard cut
    let mut hard = false;
    let mut frozen_safe: Option<usize> = None; // values before the first safe cut
    let mut last_safe: usize = 0; // values since the most recent safe cut
    for (index, token) in tokens.iter().enumerate() {
        match token.count {
            Count::Absolute(n) => {
                if !hard && n >= total {
                    return Err(Error::format(
                        "invalid reference index: absolute reference references itself or elements located after itself",
                        format,
                        token.position,
                    ));
                }
                if safe {
                    if n >= frozen_safe.unwrap_or(total) {
                        return Err(Error::format(
                            "unsafe reference index: absolute reference references in or after an indeterminate part of the structure; use unsafe_references to allow it",
                            format,
                            token.position,
                        ));
                    }
                    check_target(tokens.iter().zip(&infos).take(index), n, format, token.position)?;
                }
            }
            Count::Relative(n) => {
                if n == 0 {
                    return Err(Error::format(
                        "invalid reference index: relative reference references itself (the immediately previous element is /p1)",
                        format,
                        token.position,
                    ));
                }
                if !hard && n > total {
                    return Err(Error::format(
                        "invalid reference index: relative reference references beyond the beginning of the structure",
                        format,
                        token.position,
                    ));
                }
                if safe {
                    if n > last_safe {
                        return Err(Error::format(
                            "unsafe reference index: relative reference references in or beyond an indeterminate part of the structure; use unsafe_references to allow it",
                            format,
                            token.position,
                        ));
                    }
                    check_target(
                        tokens.iter().zip(&infos).take(index).rev(),
                        n - 1,
                        format,
                        token.position,
                    )?;
                }
            }
            _ => {}
        }

        let info = &infos[index];
        if info.hard_cut {
            hard = true;
        } else if !hard {
            total += info.values.unwrap_or(0);
        }
        if info.safe_cut {
            if frozen_safe.is_none() {
                frozen_safe = Some(total);
            }
            last_safe = 0;
        } else {
            last_safe += info.values.unwrap_or(0);
        }
    }
    Ok(scope_shape)
}

/// Finds the token owning the value at distance `n` along `walk` (forward
/// from the scope start for absolute references, backward from the referrer
/// for relative ones) and requires it to hold an integer count.
fn check_target<'t>(
    walk: impl Iterator<Item = (&'t Token, &'t TokenInfo)>,
    n: usize,
    format: &str,
    position: usize,
) -> Result<()> {
    let mut remaining = n;
    for (token, info) in walk {
        let Some(values) = info.values else {
            break;
        };
        if remaining < values {
            if token.kind.is_referencable() {
                return Ok(());
            }
            return Err(Error::format(
                format!(
                    "reference to a non-numeric element: '{}' values cannot be used as a count",
                    token.kind.symbol()
                ),
                format,
                position,
            ));
        }
        remaining -= values;
    }
    // The bound checks above make a missing target unreachable
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tokenize;

    fn analyze_format(format: &str, safe: bool) -> Result<Shape> {
        let (tokens, _) = tokenize(format)?;
        analyze(&tokens, safe, format)
    }

    #[test]
    fn accepts_reference_chains() {
        assert!(analyze_format("3B /0s /1s /2s", true).is_ok());
        assert!(analyze_format("B /0[B /0s]", true).is_ok());
        assert!(analyze_format("2H /0n #0I 2B /p2s", true).is_ok());
        assert!(analyze_format(">4sI /1(I /p1s /0[I2B4a])", true).is_ok());
    }

    #[test]
    fn scope_shapes() {
        assert_eq!(analyze_format("4B 3s 3s", true).unwrap(), Shape::Fixed);
        assert_eq!(analyze_format("4s #0I", true).unwrap(), Shape::External);
        assert_eq!(analyze_format("4s {Bn}", true).unwrap(), Shape::DataDependent);
        assert_eq!(analyze_format("2(3(I))", true).unwrap(), Shape::Fixed);
        assert_eq!(analyze_format("2(3(n))", true).unwrap(), Shape::DataDependent);
    }

    #[test]
    fn rejects_self_and_forward_references() {
        // Always invalid, no matter the safety mode
        for safe in [true, false] {
            assert!(analyze_format("/0B", safe).is_err());
            assert!(analyze_format("B /1B", safe).is_err());
            assert!(analyze_format("B /p0B", safe).is_err());
            assert!(analyze_format("B /p2B", safe).is_err());
        }
    }

    #[test]
    fn relative_reference_through_indeterminate_run() {
        // /p1 lands on the reference-counted element itself
        assert!(analyze_format("B /0B /p1c", true).is_err());
        assert!(analyze_format("B /0B /p1c", false).is_ok());
        // /p2 would have to look through it
        assert!(analyze_format("B /0B /p2c", true).is_err());
        assert!(analyze_format("B /0B /p2c", false).is_ok());
    }

    #[test]
    fn absolute_reference_into_determinate_prefix_is_safe() {
        // The target sits before the indeterminate element
        assert!(analyze_format("B /0B /0c", true).is_ok());
        // The target sits at or after it
        assert!(analyze_format("B /0B /1c", true).is_err());
        assert!(analyze_format("B /0B /1c", false).is_ok());
    }

    #[test]
    fn null_terminated_strings_cut_safety() {
        assert!(analyze_format("B n /p1s", true).is_err());
        assert!(analyze_format("B n /0s", true).is_ok());
    }

    #[test]
    fn repeated_scalars_occupy_one_index_per_value() {
        // /2 targets the third of the four bytes
        assert!(analyze_format("4B /2s", true).is_ok());
        assert!(analyze_format("4B /3s", true).is_ok());
        assert!(analyze_format("4B /4s", true).is_err());
    }

    #[test]
    fn padding_occupies_no_index() {
        // With x counted, /1 would appear valid; it must not be
        assert!(analyze_format("B x /1s", true).is_err());
        assert!(analyze_format("B x /0s", true).is_ok());
    }

    #[test]
    fn rejects_non_numeric_targets() {
        assert!(analyze_format("4s /0I", true).is_err());
        assert!(analyze_format("2(B) /0I", true).is_err());
        assert!(analyze_format("2f /p1I", true).is_err());
        // Bool values resolve as 0 or 1
        assert!(analyze_format("? /0I", true).is_ok());
        // Deferred to run time in unsafe mode
        assert!(analyze_format("4s /0I", false).is_ok());
    }

    #[test]
    fn external_counts_are_opaque_but_allowed() {
        assert!(analyze_format("#0I", true).is_ok());
        // A reference cannot reach past an externally-counted scalar run
        assert!(analyze_format("B #0I /p1B", true).is_err());
        assert!(analyze_format("B #0I /0B", true).is_ok());
    }
}

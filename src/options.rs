//! Compilation options for structures.
//!
//! This module provides [`StructOptions`], the configuration accepted by
//! [`Struct::with_options`](crate::Struct::with_options):
//!
//! - a **default byte order**, applied only when the format string carries
//!   no byte-order marker of its own
//! - the **`unsafe_references`** switch, relaxing the analyzer's safety
//!   checks on references that reach into or across elements of
//!   indeterminate shape
//!
//! ## Examples
//!
//! ```rust
//! use binstruct::{ByteOrder, Struct, StructOptions};
//!
//! // All formats without a marker read as big-endian
//! let options = StructOptions::new().with_byte_order(ByteOrder::Big);
//! let structure = Struct::with_options("2H", options)?;
//! assert_eq!(structure.unpack(b"\x01\x00\x02\x00", &[])?[0].as_u64(), Some(256));
//! # Ok::<(), binstruct::Error>(())
//! ```

use crate::scalar::ByteOrder;

/// Options controlling how a format string compiles.
///
/// # Examples
///
/// ```rust
/// use binstruct::{ByteOrder, StructOptions};
///
/// // Defaults: safe references, system order for unmarked formats
/// let options = StructOptions::new();
///
/// // Custom configuration
/// let options = StructOptions::new()
///     .with_byte_order(ByteOrder::Little)
///     .with_unsafe_references(true);
/// ```
#[derive(Clone, Debug, Default)]
pub struct StructOptions {
    pub unsafe_references: bool,
    pub byte_order: Option<ByteOrder>,
}

impl StructOptions {
    /// Creates the default options: safe references, and the system byte
    /// order for formats without a marker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows references that the analyzer cannot prove resolvable, such as
    /// a relative reference reaching through a reference-counted element.
    /// Resolution failures then surface at pack/unpack time instead.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use binstruct::{Struct, StructOptions};
    ///
    /// let options = StructOptions::new().with_unsafe_references(true);
    /// let structure = Struct::with_options("B /0B /p1c", options)?;
    /// let values = structure.unpack(b"\x02\xff\x03ABC", &[])?;
    /// assert_eq!(values.len(), 6);
    /// # Ok::<(), binstruct::Error>(())
    /// ```
    #[must_use]
    pub fn with_unsafe_references(mut self, unsafe_references: bool) -> Self {
        self.unsafe_references = unsafe_references;
        self
    }

    /// Sets the byte order used when the format string has no marker.
    /// A `<`, `>`, `!`, `=` or `@` prefix in the format always wins.
    #[must_use]
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }
}

//! Error taxonomy for the engine.
//!
//! Errors are values: every fallible operation returns [`Result`]. The
//! engine never panics on caller mistakes; [`Error::Internal`] marks a
//! broken invariant and is the only variant that indicates a bug in the
//! engine itself rather than in the call.
//!
//! The kernel registry's "decline, try the generic path" signal is an
//! `Option` internal to the engine and never surfaces here.

use crate::types::TypeCode;
use std::fmt;

/// Errors reported by engine operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// An allocation failed. Scoped temporaries are released and the
    /// output matrix is left unchanged or cleared, never half-written.
    OutOfMemory,
    /// A parameter value is malformed (bad switch fraction, duplicate
    /// assign indices, invalid sparsity bitmask, ...).
    InvalidValue {
        /// What was malformed.
        what: String,
    },
    /// An object violates its structural invariants (unsorted import
    /// offsets, out-of-range hyper list, ...).
    InvalidObject {
        /// Which invariant failed.
        what: String,
    },
    /// A row or column index is outside the matrix shape.
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// The exclusive bound it had to stay under.
        bound: usize,
    },
    /// Matrix shapes do not line up for the requested operation.
    DimensionMismatch {
        /// Rows and columns the operation required.
        expected: (usize, usize),
        /// Rows and columns it was given.
        got: (usize, usize),
    },
    /// Element types are incompatible with the operator or with each
    /// other (user types never cast implicitly).
    DomainMismatch {
        /// Type the operator wanted.
        expected: TypeCode,
        /// Type it was given.
        got: TypeCode,
    },
    /// The engine was used before [`crate::config::init`] or after
    /// [`crate::config::finalize`].
    Uninitialized,
    /// A required component was missing (empty buffer handed to an
    /// import, absent value array).
    MissingComponent {
        /// Which component was absent.
        what: &'static str,
    },
    /// The output of `build` must start empty.
    OutputNotEmpty,
    /// An internal invariant broke. Not recoverable; file a bug.
    Internal {
        /// Which invariant broke.
        what: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::InvalidValue { what } => write!(f, "invalid value: {}", what),
            Error::InvalidObject { what } => write!(f, "invalid object: {}", what),
            Error::IndexOutOfBounds { index, bound } => {
                write!(f, "index {} out of bounds (must be < {})", index, bound)
            }
            Error::DimensionMismatch { expected, got } => {
                write!(
                    f,
                    "dimension mismatch: expected {}x{}, got {}x{}",
                    expected.0, expected.1, got.0, got.1
                )
            }
            Error::DomainMismatch { expected, got } => {
                write!(f, "domain mismatch: expected {:?}, got {:?}", expected, got)
            }
            Error::Uninitialized => write!(f, "engine not initialized: call init() first"),
            Error::MissingComponent { what } => write!(f, "missing component: {}", what),
            Error::OutputNotEmpty => write!(f, "output matrix is not empty"),
            Error::Internal { what } => write!(f, "internal invariant violated: {}", what),
        }
    }
}

impl std::error::Error for Error {}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let e = Error::DimensionMismatch {
            expected: (4, 4),
            got: (4, 5),
        };
        assert_eq!(e.to_string(), "dimension mismatch: expected 4x4, got 4x5");

        let e = Error::IndexOutOfBounds { index: 9, bound: 4 };
        assert!(e.to_string().contains("index 9"));
        assert!(e.to_string().contains("< 4"));
    }

    #[test]
    fn test_error_is_std_error() {
        fn takes_err(_: &dyn std::error::Error) {}
        takes_err(&Error::OutOfMemory);
    }
}

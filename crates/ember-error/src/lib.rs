//! Error kinds for the EmberDB storage core.
//!
//! Errors are kinds, not types: every fallible operation in the workspace
//! returns [`EmberError`], and callers match on the variant to decide
//! whether the failure is a recoverable precondition violation (type
//! mismatch, nullability, embedded misuse) or fatal to the surrounding
//! transaction ([`EmberError::NotRecoverable`]).

use thiserror::Error;

/// Primary error type for EmberDB storage operations.
#[derive(Error, Debug)]
pub enum EmberError {
    /// An accessor refers to a row that has been deleted or never existed.
    #[error("object is no longer valid")]
    InvalidObject,

    /// Cluster or dictionary lookup miss.
    #[error("key not found")]
    KeyNotFound,

    /// Insert of a duplicate object key, primary key, or dictionary key
    /// when overwrite was not requested.
    #[error("key already exists")]
    KeyAlreadyExists,

    /// Column/value type mismatch.
    #[error("illegal type for column: expected {expected}, got {actual}")]
    IllegalType {
        /// Declared column type name.
        expected: &'static str,
        /// Name of the type actually supplied.
        actual: &'static str,
    },

    /// Null assignment to a non-nullable column.
    #[error("column is not nullable")]
    ColumnNotNullable,

    /// Operation and operand state cannot be combined, e.g. `add_int` on a
    /// column whose current value is null.
    #[error("illegal combination: {detail}")]
    IllegalCombination {
        /// What was combined with what.
        detail: &'static str,
    },

    /// Embedded/non-embedded table misuse, e.g. a direct link assignment
    /// targeting an embedded table.
    #[error("wrong kind of table: {detail}")]
    WrongKindOfTable {
        /// Which rule was violated.
        detail: &'static str,
    },

    /// A link target does not exist in its table.
    #[error("link target does not exist in target table")]
    TargetOutOfRange,

    /// String value exceeds the implementation limit.
    #[error("string too big: {size} bytes exceeds limit of {limit}")]
    StringTooBig {
        /// Size of the rejected value.
        size: usize,
        /// The implementation limit.
        limit: usize,
    },

    /// Binary value exceeds the implementation limit.
    #[error("binary too big: {size} bytes exceeds limit of {limit}")]
    BinaryTooBig {
        /// Size of the rejected value.
        size: usize,
        /// The implementation limit.
        limit: usize,
    },

    /// The backing store cannot grow any further. Recoverable: the caller
    /// may abort the transaction and retry with a larger budget.
    #[error("out of space in backing store")]
    OutOfSpace,

    /// File I/O failure. Fatal to the surrounding transaction.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Allocator or structural invariant failure discovered mid-mutation.
    /// The transaction must be aborted, not retried.
    #[error("not recoverable: {detail}")]
    NotRecoverable {
        /// Description of the broken invariant.
        detail: String,
    },
}

impl EmberError {
    /// True if the caller may handle the error and continue using the
    /// transaction; false if the transaction must be aborted.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EmberError::Io(_) | EmberError::NotRecoverable { .. })
    }

    /// Shorthand for a [`EmberError::NotRecoverable`] with a formatted detail.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        EmberError::NotRecoverable {
            detail: detail.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T, E = EmberError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(EmberError::KeyNotFound.is_recoverable());
        assert!(EmberError::ColumnNotNullable.is_recoverable());
        assert!(EmberError::OutOfSpace.is_recoverable());
        assert!(!EmberError::corrupt("bad ref").is_recoverable());
        let io: EmberError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(!io.is_recoverable());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = EmberError::StringTooBig {
            size: 32,
            limit: 16,
        };
        assert_eq!(
            err.to_string(),
            "string too big: 32 bytes exceeds limit of 16"
        );
    }
}

//! Error types for cobyqa-rs.
//!
//! All fallible operations in the workspace share a single
//! `thiserror`-derived enum.  The `ensure!` and `fail!` convenience macros
//! defined here keep argument validation terse at the call sites.

use thiserror::Error;

/// The top-level error type used throughout cobyqa-rs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// General runtime error.
    #[error("{0}")]
    Runtime(String),

    /// Invalid argument supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid solver option value.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// Dimension mismatch between related arrays or matrices.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The expected dimension.
        expected: usize,
        /// The dimension that was actually supplied.
        actual: usize,
    },
}

/// Shorthand `Result` type used throughout cobyqa-rs.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Returns `Err(Error::InvalidArgument(...))` if `$cond` is false.
///
/// # Example
/// ```
/// use cq_core::ensure;
/// fn positive(x: f64) -> cq_core::Result<f64> {
///     ensure!(x > 0.0, "x must be positive, got {x}");
///     Ok(x)
/// }
/// assert!(positive(1.0).is_ok());
/// assert!(positive(-1.0).is_err());
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($msg:tt)*) => {
        if !$cond {
            return Err($crate::errors::Error::InvalidArgument(
                format!($($msg)*)
            ));
        }
    };
}

/// Returns `Err(Error::Runtime(...))` immediately.
///
/// # Example
/// ```
/// use cq_core::fail;
/// fn always_err() -> cq_core::Result<()> {
///     fail!("something went wrong");
/// }
/// assert!(always_err().is_err());
/// ```
#[macro_export]
macro_rules! fail {
    ($($msg:tt)*) => {
        return Err($crate::errors::Error::Runtime(format!($($msg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_len(len: usize) -> Result<()> {
        ensure!(len > 0, "length must be positive, got {len}");
        Ok(())
    }

    #[test]
    fn ensure_macro() {
        assert!(check_len(3).is_ok());
        let err = check_len(0).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidArgument("length must be positive, got 0".into())
        );
    }

    #[test]
    fn error_display() {
        let err = Error::DimensionMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 3, got 2");
    }
}

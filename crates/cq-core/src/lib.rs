//! # cq-core
//!
//! Core types and error definitions for cobyqa-rs.
//!
//! This crate provides the foundational building blocks shared across the
//! other crates in the workspace – scalar type aliases, the error
//! hierarchy, and the `ensure!`/`fail!` convenience macros.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod errors;

pub use errors::{Error, Result};

/// Floating-point type used throughout the library.
pub type Real = f64;

/// Alias used for array sizes / indices.
pub type Size = usize;

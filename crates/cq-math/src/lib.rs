//! # cq-math
//!
//! Dense linear algebra for cobyqa-rs: the `Array` and `Matrix` newtypes
//! (over nalgebra) and the factorization utilities used by the
//! interpolation machinery — SVD, a direct solver for symmetric indefinite
//! systems with an ill-conditioning guard, and SVD-based least squares.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod array;
pub mod matrix;
pub mod matrix_utilities;

pub use array::Array;
pub use matrix::Matrix;

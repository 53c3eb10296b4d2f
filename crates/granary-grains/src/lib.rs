//! Granary Grains
//!
//! Ready-made grain types hosted on the Granary runtime.
//!
//! # Overview
//!
//! - [`SquareGrain`]: `SquareMe(x) = x * x`
//! - [`CubeGrain`]: `CubeMe(x) = x * x * x`
//!
//! Both take and return a JSON `i64`. An argument whose result would not fit
//! in an `i64` is rejected with `InvalidArgument` before it is enqueued.

pub mod arithmetic;

pub use arithmetic::{
    cube_table, register_arithmetic_grains, square_table, CubeGrain, SquareGrain,
    CUBE_GRAIN_TYPE, CUBE_METHOD, SQUARE_GRAIN_TYPE, SQUARE_METHOD,
};

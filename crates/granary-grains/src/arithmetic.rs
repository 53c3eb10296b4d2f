//! Square and cube grains
//!
//! TigerStyle: Checked arithmetic, overflow is an argument error.

use granary_core::error::{Error, Result};
use granary_core::grain::{Grain, GrainContext, MethodTable};
use granary_runtime::RuntimeBuilder;
use tracing::trace;

/// Type tag of [`SquareGrain`]
pub const SQUARE_GRAIN_TYPE: &str = "square";

/// Type tag of [`CubeGrain`]
pub const CUBE_GRAIN_TYPE: &str = "cube";

/// Selector of the squaring method
pub const SQUARE_METHOD: &str = "SquareMe";

/// Selector of the cubing method
pub const CUBE_METHOD: &str = "CubeMe";

fn checked_square(x: i64) -> Option<i64> {
    x.checked_mul(x)
}

fn checked_cube(x: i64) -> Option<i64> {
    checked_square(x)?.checked_mul(x)
}

fn overflow(method: &str, x: i64, power: &str) -> Error {
    Error::invalid_argument(method, format!("{} of {} does not fit in i64", power, x))
}

/// Grain that squares its argument
///
/// Stateless apart from a count of turns served by the activation.
#[derive(Debug, Default)]
pub struct SquareGrain {
    served: u64,
}

impl Grain for SquareGrain {}

impl SquareGrain {
    fn square_me(&mut self, ctx: &GrainContext, x: i64) -> Result<i64> {
        let result = checked_square(x).ok_or_else(|| overflow(SQUARE_METHOD, x, "square"))?;
        self.served += 1;
        trace!(grain_id = %ctx.id, x, result, served = self.served, "SquareMe");
        Ok(result)
    }
}

/// Grain that cubes its argument
#[derive(Debug, Default)]
pub struct CubeGrain {
    served: u64,
}

impl Grain for CubeGrain {}

impl CubeGrain {
    fn cube_me(&mut self, ctx: &GrainContext, x: i64) -> Result<i64> {
        let result = checked_cube(x).ok_or_else(|| overflow(CUBE_METHOD, x, "cube"))?;
        self.served += 1;
        trace!(grain_id = %ctx.id, x, result, served = self.served, "CubeMe");
        Ok(result)
    }
}

/// Method table for [`SquareGrain`]
pub fn square_table() -> Result<MethodTable<SquareGrain>> {
    MethodTable::<SquareGrain>::builder_default()
        .method_with_contract(
            SQUARE_METHOD,
            |x: &i64| {
                checked_square(*x)
                    .map(|_| ())
                    .ok_or_else(|| overflow(SQUARE_METHOD, *x, "square"))
            },
            |grain: &mut SquareGrain, ctx, x: i64| grain.square_me(ctx, x),
        )
        .build()
}

/// Method table for [`CubeGrain`]
pub fn cube_table() -> Result<MethodTable<CubeGrain>> {
    MethodTable::<CubeGrain>::builder_default()
        .method_with_contract(
            CUBE_METHOD,
            |x: &i64| {
                checked_cube(*x)
                    .map(|_| ())
                    .ok_or_else(|| overflow(CUBE_METHOD, *x, "cube"))
            },
            |grain: &mut CubeGrain, ctx, x: i64| grain.cube_me(ctx, x),
        )
        .build()
}

/// Register `square` and `cube` on a runtime builder
///
/// # Errors
/// `GrainTypeAlreadyRegistered` if either tag is already taken.
pub fn register_arithmetic_grains(builder: RuntimeBuilder) -> Result<RuntimeBuilder> {
    builder
        .register(SQUARE_GRAIN_TYPE, square_table()?)?
        .register(CUBE_GRAIN_TYPE, cube_table()?)
}

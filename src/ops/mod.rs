//! Operation encoders
//!
//! One family per submodule. Every encoder validates its operands against
//! the context's device info, then either appends exactly one command record
//! or returns a validation error with nothing appended. Encoding is pure
//! CPU-bound construction; nothing here blocks or performs I/O.

pub mod conv;
pub mod copy;
pub mod elementwise;
pub mod lut;
pub mod matmul;
pub mod pooling;
pub mod shift;

pub use conv::{
    ConvolutionParams, DepthwiseConvolutionParams, PartialSumMode, PointwiseConvolutionParams,
};
pub use copy::CopyParams;
pub use elementwise::{Binary16Params, Binary8Params, Logic16Params, Logic8Params, MacParams};
pub use lut::LookupTableParams;
pub use matmul::{MatrixMulParams, MatrixMulQmParams, RequantMode};
pub use pooling::{AveragePoolingParams, MaxPoolingParams, MinPoolingParams};
pub use shift::ArithShiftParams;

use serde::Serialize;

use crate::command::ConstOperand;
use crate::tensor::{Int16Pair, TensorDescriptor};

/// Tensor-or-constant operand for roles that accept an inline constant
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Operand {
    Tensor(TensorDescriptor),
    Const(ConstOperand),
}

impl Operand {
    pub fn constant(value: i32) -> Self {
        Operand::Const(ConstOperand::signed(value))
    }
}

/// Wide (16-bit pair) tensor-or-constant operand
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum WideOperand {
    Pair(Int16Pair),
    Const(ConstOperand),
}

impl WideOperand {
    pub fn constant(value: i32) -> Self {
        WideOperand::Const(ConstOperand::signed(value))
    }
}

//! npuforge: command encoding and local-memory management for a
//! fixed-function tensor engine
//!
//! The crate models the engine's programming surface: a capacity-constrained
//! local-memory arena, 4-D tensor descriptors with explicit strides, a family
//! of per-operation command encoders producing a packed register image, and a
//! reference executor that interprets the encoded commands with the engine's
//! exact saturating fixed-point arithmetic.
//!
//! ```no_run
//! use npuforge::context::Context;
//! use npuforge::ops::{Binary8Params, Operand};
//! use npuforge::tensor::{Format, Shape};
//!
//! # fn main() -> npuforge::error::ForgeResult<()> {
//! let mut ctx = Context::with_defaults()?;
//! let a = ctx.alloc_tensor(Shape::new(1, 1, 16, 16), Format::I8, true)?;
//! let b = ctx.alloc_tensor(Shape::new(1, 1, 16, 16), Format::I8, true)?;
//! let res = ctx.alloc_tensor(Shape::new(1, 1, 16, 16), Format::I8, true)?;
//! ctx.add(&Binary8Params {
//!     a,
//!     b: Operand::Tensor(b),
//!     res,
//!     relu_enable: false,
//!     rshift_bits: 0,
//!     layer_id: 0,
//! })?;
//! ctx.execute()?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod logging;
pub mod memory;
pub mod numeric;
pub mod ops;
pub mod tensor;

pub use command::{CommandBuffer, CommandRecord, Opcode};
pub use config::DeviceInfo;
pub use context::Context;
pub use error::{ForgeResult, NpuForgeError};
pub use tensor::{Format, Int16Pair, MatrixDescriptor, Shape, Stride, TensorDescriptor};

//! Command records and the command buffer
//!
//! Hardware register bitfields map to a two-layer representation: a
//! structured, named-field [`CommandRecord`] used for validation, testing,
//! and the reference executor, serialized to the packed register image only
//! when the record is appended to a [`CommandBuffer`].

pub mod buffer;
pub mod record;

pub use buffer::CommandBuffer;
pub use record::{
    ConstOperand, KernelGeometry, MatrixRef, Opcode, CommandRecord, TensorRef,
};

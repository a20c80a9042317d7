//! Matrix multiplication encoders: plain and per-channel quantized
//!
//! `res[i,j] = saturate(sum_k left[i,k]*right[k,j] + bias[j])`, with optional
//! accumulation into the existing result, left/right shifts, and ReLU. The
//! quantized variant requantizes each output column through a
//! multiply-and-shift, scalar or per column.

use crate::command::{CommandRecord, Opcode};
use crate::context::Context;
use crate::error::ForgeResult;
use crate::tensor::{check_matrix_range, check_range, MatrixDescriptor, Stride, TensorDescriptor};
use crate::{format_error, shape_error, stride_error};

/// Requantization source for the quantized multiply
///
/// Per-channel blocks carry one 5-byte entry per output column: a
/// little-endian i32 multiplier followed by a one-byte right-shift count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequantMode {
    Scalar { multiplier: i32, rshift: u8 },
    PerChannel(TensorDescriptor),
}

/// Number of bytes in one per-channel requantization entry
pub const REQUANT_ENTRY_BYTES: u32 = 5;

/// Parameters for plain matrix multiplication
#[derive(Debug, Clone, Copy)]
pub struct MatrixMulParams {
    pub left: MatrixDescriptor,
    pub right: MatrixDescriptor,
    pub res: MatrixDescriptor,
    /// One bias row (8-bit) or two rows (split 16-bit: low then high)
    pub bias: Option<MatrixDescriptor>,
    pub lshift_bits: u8,
    pub rshift_bits: u8,
    pub relu_enable: bool,
    /// Accumulate into the existing result contents
    pub add_result: bool,
    pub layer_id: u16,
}

/// Parameters for quantized matrix multiplication
#[derive(Debug, Clone, Copy)]
pub struct MatrixMulQmParams {
    pub left: MatrixDescriptor,
    pub right: MatrixDescriptor,
    pub res: MatrixDescriptor,
    pub bias: Option<MatrixDescriptor>,
    pub requant: RequantMode,
    pub relu_enable: bool,
    pub add_result: bool,
    pub layer_id: u16,
}

fn validate_matmul(
    ctx: &Context,
    left: &MatrixDescriptor,
    right: &MatrixDescriptor,
    res: &MatrixDescriptor,
    bias: Option<&MatrixDescriptor>,
) -> ForgeResult<()> {
    let capacity = ctx.capacity();
    check_matrix_range(left, capacity)?;
    check_matrix_range(right, capacity)?;
    check_matrix_range(res, capacity)?;

    if !left.fmt.is_int8() {
        return Err(format_error!(
            "matrix multiply requires a single-byte integer format, got {:?}",
            left.fmt
        ));
    }
    if left.fmt != right.fmt {
        return Err(format_error!(
            "left format {:?} does not match right format {:?}",
            left.fmt,
            right.fmt
        ));
    }
    if left.cols != right.rows {
        return Err(shape_error!(
            "reduction extents must agree: left is {}x{}, right is {}x{}",
            left.rows,
            left.cols,
            right.rows,
            right.cols
        ));
    }
    if res.rows != left.rows || res.cols != right.cols {
        return Err(shape_error!(
            "result must be {}x{}, got {}x{}",
            left.rows,
            right.cols,
            res.rows,
            res.cols
        ));
    }
    if let Some(bias) = bias {
        check_matrix_range(bias, capacity)?;
        if bias.cols != res.cols {
            return Err(shape_error!(
                "bias carries {} columns, result has {}",
                bias.cols,
                res.cols
            ));
        }
        if bias.rows != 1 && bias.rows != 2 {
            return Err(shape_error!(
                "bias must be one row, or two rows for a split 16-bit value, got {}",
                bias.rows
            ));
        }
    }
    Ok(())
}

fn validate_requant(ctx: &Context, requant: &RequantMode, out_cols: u32) -> ForgeResult<()> {
    match requant {
        RequantMode::Scalar { .. } => Ok(()),
        RequantMode::PerChannel(block) => {
            if !block.fmt.is_int8() {
                return Err(format_error!(
                    "per-channel requant block must use a byte format, got {:?}",
                    block.fmt
                ));
            }
            if !block.stride.is_degenerate() {
                return Err(stride_error!(
                    "per-channel requant block must use a degenerate stride, got {:?}",
                    block.stride
                ));
            }
            if block.shape.c != out_cols || block.shape.w != REQUANT_ENTRY_BYTES {
                return Err(shape_error!(
                    "per-channel requant block must be (1, {}, 1, {}), got {:?}",
                    out_cols,
                    REQUANT_ENTRY_BYTES,
                    block.shape
                ));
            }
            if block.stride.c < REQUANT_ENTRY_BYTES {
                return Err(stride_error!(
                    "per-channel requant entries overlap: channel stride {}",
                    block.stride.c
                ));
            }
            check_range(block, ctx.capacity())
        }
    }
}

impl Context {
    /// Plain matrix multiply with optional bias, shifts, and ReLU
    pub fn matrix_multiply(&mut self, p: &MatrixMulParams) -> ForgeResult<()> {
        validate_matmul(self, &p.left, &p.right, &p.res, p.bias.as_ref())?;

        let mut rec = CommandRecord::new(Opcode::MatrixMultiply, p.layer_id);
        rec.left = Some((&p.left).into());
        rec.right = Some((&p.right).into());
        rec.mat_res = Some((&p.res).into());
        if let Some(bias) = &p.bias {
            rec.mat_bias = Some(bias.into());
        }
        rec.lshift_bits = p.lshift_bits;
        rec.rshift_bits = p.rshift_bits;
        rec.relu_enable = p.relu_enable;
        rec.accumulate = p.add_result;
        rec.res_is_int8 = true;
        self.append_record(rec);
        Ok(())
    }

    /// Quantized matrix multiply with per-output-column requantization
    pub fn matrix_multiply_qm(&mut self, p: &MatrixMulQmParams) -> ForgeResult<()> {
        validate_matmul(self, &p.left, &p.right, &p.res, p.bias.as_ref())?;
        validate_requant(self, &p.requant, p.res.cols)?;

        let mut rec = CommandRecord::new(Opcode::MatrixMultiplyQm, p.layer_id);
        rec.left = Some((&p.left).into());
        rec.right = Some((&p.right).into());
        rec.mat_res = Some((&p.res).into());
        if let Some(bias) = &p.bias {
            rec.mat_bias = Some(bias.into());
        }
        match &p.requant {
            RequantMode::Scalar { multiplier, rshift } => {
                rec.multiplier = Some(*multiplier);
                rec.rshift_bits = *rshift;
            }
            RequantMode::PerChannel(block) => {
                rec.per_channel_quant = Some(block.into());
            }
        }
        rec.relu_enable = p.relu_enable;
        rec.accumulate = p.add_result;
        rec.res_is_int8 = true;
        self.append_record(rec);
        Ok(())
    }
}

/// Build a per-channel requant block descriptor over an allocated region
///
/// The caller fills the region with `cols` entries of
/// [`REQUANT_ENTRY_BYTES`] bytes each.
pub fn per_channel_requant_descriptor(start_address: u32, cols: u32) -> TensorDescriptor {
    TensorDescriptor {
        start_address,
        shape: crate::tensor::Shape::new(1, cols, 1, REQUANT_ENTRY_BYTES),
        stride: Stride {
            n: 0,
            c: REQUANT_ENTRY_BYTES,
            h: 0,
            w: 0,
        },
        fmt: crate::tensor::Format::I8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Format;

    fn mul_params(
        left: MatrixDescriptor,
        right: MatrixDescriptor,
        res: MatrixDescriptor,
    ) -> MatrixMulParams {
        MatrixMulParams {
            left,
            right,
            res,
            bias: None,
            lshift_bits: 0,
            rshift_bits: 0,
            relu_enable: false,
            add_result: false,
            layer_id: 0,
        }
    }

    #[test]
    fn test_shapes_accepted() {
        let mut ctx = Context::with_defaults().unwrap();
        let left = ctx.alloc_matrix(2, 3, Format::I8, true).unwrap();
        let right = ctx.alloc_matrix(3, 4, Format::I8, true).unwrap();
        let res = ctx.alloc_matrix(2, 4, Format::I8, true).unwrap();
        ctx.matrix_multiply(&mul_params(left, right, res)).unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert_eq!(rec.opcode, Opcode::MatrixMultiply);
        assert_eq!(rec.left.unwrap().cols, 3);
    }

    #[test]
    fn test_reduction_mismatch_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let left = ctx.alloc_matrix(2, 3, Format::I8, true).unwrap();
        let right = ctx.alloc_matrix(4, 4, Format::I8, true).unwrap();
        let res = ctx.alloc_matrix(2, 4, Format::I8, true).unwrap();
        assert!(ctx.matrix_multiply(&mul_params(left, right, res)).is_err());
        assert!(ctx.command_buffer().is_empty());
    }

    #[test]
    fn test_result_extent_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let left = ctx.alloc_matrix(2, 3, Format::I8, true).unwrap();
        let right = ctx.alloc_matrix(3, 4, Format::I8, true).unwrap();
        let res = ctx.alloc_matrix(3, 4, Format::I8, true).unwrap();
        assert!(ctx.matrix_multiply(&mul_params(left, right, res)).is_err());
    }

    #[test]
    fn test_bias_row_count() {
        let mut ctx = Context::with_defaults().unwrap();
        let left = ctx.alloc_matrix(2, 3, Format::I8, true).unwrap();
        let right = ctx.alloc_matrix(3, 4, Format::I8, true).unwrap();
        let res = ctx.alloc_matrix(2, 4, Format::I8, true).unwrap();

        let bad = ctx.alloc_matrix(3, 4, Format::I8, true).unwrap();
        let mut p = mul_params(left, right, res);
        p.bias = Some(bad);
        assert!(ctx.matrix_multiply(&p).is_err());

        let good = ctx.alloc_matrix(2, 4, Format::I8, true).unwrap();
        p.bias = Some(good);
        ctx.matrix_multiply(&p).unwrap();
    }

    #[test]
    fn test_scalar_requant_encodes_multiplier() {
        let mut ctx = Context::with_defaults().unwrap();
        let left = ctx.alloc_matrix(4, 4, Format::I8, true).unwrap();
        let right = ctx.alloc_matrix(4, 4, Format::I8, true).unwrap();
        let res = ctx.alloc_matrix(4, 4, Format::I8, true).unwrap();
        ctx.matrix_multiply_qm(&MatrixMulQmParams {
            left,
            right,
            res,
            bias: None,
            requant: RequantMode::Scalar {
                multiplier: 1 << 20,
                rshift: 24,
            },
            relu_enable: false,
            add_result: false,
            layer_id: 9,
        })
        .unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert_eq!(rec.opcode, Opcode::MatrixMultiplyQm);
        assert_eq!(rec.multiplier, Some(1 << 20));
        assert_eq!(rec.rshift_bits, 24);
    }

    #[test]
    fn test_per_channel_requant_block_shape() {
        let mut ctx = Context::with_defaults().unwrap();
        let left = ctx.alloc_matrix(2, 3, Format::I8, true).unwrap();
        let right = ctx.alloc_matrix(3, 4, Format::I8, true).unwrap();
        let res = ctx.alloc_matrix(2, 4, Format::I8, true).unwrap();
        let block_mem = ctx
            .alloc_tensor(crate::tensor::Shape::new(1, 4, 1, 5), Format::I8, false)
            .unwrap();
        let block = per_channel_requant_descriptor(block_mem.start_address, 4);
        ctx.matrix_multiply_qm(&MatrixMulQmParams {
            left,
            right,
            res,
            bias: None,
            requant: RequantMode::PerChannel(block),
            relu_enable: false,
            add_result: false,
            layer_id: 0,
        })
        .unwrap();
        assert!(ctx.command_buffer().records()[0].per_channel_quant.is_some());

        // Wrong column count is rejected
        let bad = per_channel_requant_descriptor(block_mem.start_address, 3);
        assert!(ctx
            .matrix_multiply_qm(&MatrixMulQmParams {
                left,
                right,
                res,
                bias: None,
                requant: RequantMode::PerChannel(bad),
                relu_enable: false,
                add_result: false,
                layer_id: 0,
            })
            .is_err());
    }

    #[test]
    fn test_bf16_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let left = ctx.alloc_matrix(2, 2, Format::Bf16, true).unwrap();
        let right = ctx.alloc_matrix(2, 2, Format::Bf16, true).unwrap();
        let res = ctx.alloc_matrix(2, 2, Format::Bf16, true).unwrap();
        assert!(ctx.matrix_multiply(&mul_params(left, right, res)).is_err());
    }
}

//! Pooling encoders
//!
//! Average, max, and min pooling share the window geometry:
//! `out = floor((in + pad_before + pad_after - kernel)/stride) + 1` per
//! axis, with zero-insertion counts expanding the input grid first (virtual
//! zero rows/columns for fractional upsampling) and padding surrounding the
//! expanded grid.
//!
//! Max and min skip out-of-bounds taps entirely; there is no implicit zero.
//! Average divides by the count of valid taps unless a fixed divisor is
//! supplied.

use crate::command::{CommandRecord, KernelGeometry, Opcode};
use crate::context::Context;
use crate::error::ForgeResult;
use crate::shape_error;
use crate::tensor::{check_range, check_same_format, check_tensor_operand, TensorDescriptor};

/// Parameters for average pooling
#[derive(Debug, Clone, Copy)]
pub struct AveragePoolingParams {
    pub ifmap: TensorDescriptor,
    pub ofmap: TensorDescriptor,
    pub kh: u16,
    pub kw: u16,
    pub stride_h: u16,
    pub stride_w: u16,
    pub pad_top: u16,
    pub pad_bottom: u16,
    pub pad_left: u16,
    pub pad_right: u16,
    pub ins_h: u16,
    pub ins_w: u16,
    pub ins_last_h: u16,
    pub ins_last_w: u16,
    /// Fixed divisor; `None` divides by the valid tap count per window
    pub avg_divisor: Option<f32>,
    pub layer_id: u16,
}

/// Parameters for max pooling
#[derive(Debug, Clone, Copy)]
pub struct MaxPoolingParams {
    pub ifmap: TensorDescriptor,
    pub ofmap: TensorDescriptor,
    pub kh: u16,
    pub kw: u16,
    pub stride_h: u16,
    pub stride_w: u16,
    pub pad_top: u16,
    pub pad_bottom: u16,
    pub pad_left: u16,
    pub pad_right: u16,
    pub ins_h: u16,
    pub ins_w: u16,
    pub ins_last_h: u16,
    pub ins_last_w: u16,
    pub layer_id: u16,
}

/// Parameters for min pooling
pub type MinPoolingParams = MaxPoolingParams;

struct PoolGeometry {
    ifmap: TensorDescriptor,
    ofmap: TensorDescriptor,
    kernel: KernelGeometry,
}

/// Validate the window geometry shared by all three pooling encoders
fn validate_pooling(ctx: &Context, g: &PoolGeometry) -> ForgeResult<()> {
    let capacity = ctx.capacity();
    check_tensor_operand("ifmap", &g.ifmap)?;
    check_tensor_operand("ofmap", &g.ofmap)?;
    check_same_format("ifmap", &g.ifmap, "ofmap", &g.ofmap)?;
    check_range(&g.ifmap, capacity)?;
    check_range(&g.ofmap, capacity)?;

    let k = &g.kernel;
    if k.kh == 0 || k.kw == 0 || k.stride_h == 0 || k.stride_w == 0 {
        return Err(shape_error!(
            "pooling kernel and stride must be positive: kh={} kw={} stride_h={} stride_w={}",
            k.kh,
            k.kw,
            k.stride_h,
            k.stride_w
        ));
    }
    if g.ifmap.shape.n != g.ofmap.shape.n || g.ifmap.shape.c != g.ofmap.shape.c {
        return Err(shape_error!(
            "pooling preserves n and c: ifmap {:?}, ofmap {:?}",
            g.ifmap.shape,
            g.ofmap.shape
        ));
    }

    let expanded_h =
        KernelGeometry::expanded_extent(g.ifmap.shape.h, k.ins_h, k.ins_last_h, k.pad_top, k.pad_bottom);
    let expanded_w =
        KernelGeometry::expanded_extent(g.ifmap.shape.w, k.ins_w, k.ins_last_w, k.pad_left, k.pad_right);
    let out_h = KernelGeometry::output_extent(expanded_h, k.kh, k.stride_h)
        .ok_or_else(|| shape_error!("pooling window {}x{} larger than expanded input {}x{}", k.kh, k.kw, expanded_h, expanded_w))?;
    let out_w = KernelGeometry::output_extent(expanded_w, k.kw, k.stride_w)
        .ok_or_else(|| shape_error!("pooling window {}x{} larger than expanded input {}x{}", k.kh, k.kw, expanded_h, expanded_w))?;

    if out_h != g.ofmap.shape.h || out_w != g.ofmap.shape.w {
        return Err(shape_error!(
            "pooling output must be {}x{}, ofmap declares {}x{}",
            out_h,
            out_w,
            g.ofmap.shape.h,
            g.ofmap.shape.w
        ));
    }
    Ok(())
}

fn pool_kernel(
    kh: u16,
    kw: u16,
    stride_h: u16,
    stride_w: u16,
    pad: (u16, u16, u16, u16),
    ins: (u16, u16, u16, u16),
) -> KernelGeometry {
    KernelGeometry {
        kh,
        kw,
        stride_h,
        stride_w,
        pad_top: pad.0,
        pad_bottom: pad.1,
        pad_left: pad.2,
        pad_right: pad.3,
        ins_h: ins.0,
        ins_w: ins.1,
        ins_last_h: ins.2,
        ins_last_w: ins.3,
        dilation_h: 1,
        dilation_w: 1,
    }
}

impl Context {
    /// Average pooling
    pub fn average_pooling(&mut self, p: &AveragePoolingParams) -> ForgeResult<()> {
        let geometry = PoolGeometry {
            ifmap: p.ifmap,
            ofmap: p.ofmap,
            kernel: pool_kernel(
                p.kh,
                p.kw,
                p.stride_h,
                p.stride_w,
                (p.pad_top, p.pad_bottom, p.pad_left, p.pad_right),
                (p.ins_h, p.ins_w, p.ins_last_h, p.ins_last_w),
            ),
        };
        validate_pooling(self, &geometry)?;

        let mut rec = CommandRecord::new(Opcode::AveragePooling, p.layer_id);
        rec.a = Some((&p.ifmap).into());
        rec.res = Some((&p.ofmap).into());
        rec.kernel = Some(geometry.kernel);
        rec.avg_divisor = p.avg_divisor;
        self.append_record(rec);
        Ok(())
    }

    /// Max pooling
    pub fn max_pooling(&mut self, p: &MaxPoolingParams) -> ForgeResult<()> {
        self.minmax_pooling(Opcode::MaxPooling, p)
    }

    /// Min pooling
    pub fn min_pooling(&mut self, p: &MinPoolingParams) -> ForgeResult<()> {
        self.minmax_pooling(Opcode::MinPooling, p)
    }

    fn minmax_pooling(&mut self, opcode: Opcode, p: &MaxPoolingParams) -> ForgeResult<()> {
        let geometry = PoolGeometry {
            ifmap: p.ifmap,
            ofmap: p.ofmap,
            kernel: pool_kernel(
                p.kh,
                p.kw,
                p.stride_h,
                p.stride_w,
                (p.pad_top, p.pad_bottom, p.pad_left, p.pad_right),
                (p.ins_h, p.ins_w, p.ins_last_h, p.ins_last_w),
            ),
        };
        validate_pooling(self, &geometry)?;

        let mut rec = CommandRecord::new(opcode, p.layer_id);
        rec.a = Some((&p.ifmap).into());
        rec.res = Some((&p.ofmap).into());
        rec.kernel = Some(geometry.kernel);
        self.append_record(rec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Format, Shape};

    fn max_pool_params(
        ifmap: TensorDescriptor,
        ofmap: TensorDescriptor,
        kh: u16,
        kw: u16,
        stride: u16,
    ) -> MaxPoolingParams {
        MaxPoolingParams {
            ifmap,
            ofmap,
            kh,
            kw,
            stride_h: stride,
            stride_w: stride,
            pad_top: 0,
            pad_bottom: 0,
            pad_left: 0,
            pad_right: 0,
            ins_h: 0,
            ins_w: 0,
            ins_last_h: 0,
            ins_last_w: 0,
            layer_id: 0,
        }
    }

    #[test]
    fn test_output_size_64_k3_s2() {
        // floor((64-3)/2)+1 = 31
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 2, 64, 64), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 2, 31, 31), Format::I8, true).unwrap();
        ctx.max_pooling(&max_pool_params(ifmap, ofmap, 3, 3, 2)).unwrap();
        assert_eq!(ctx.command_buffer().len(), 1);
    }

    #[test]
    fn test_wrong_output_size_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 2, 64, 64), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 2, 32, 32), Format::I8, true).unwrap();
        let err = ctx.max_pooling(&max_pool_params(ifmap, ofmap, 3, 3, 2)).unwrap_err();
        assert!(err.is_validation_error());
        assert!(ctx.command_buffer().is_empty());
    }

    #[test]
    fn test_channel_change_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 4, 8, 8), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 2, 4, 4), Format::I8, true).unwrap();
        assert!(ctx.max_pooling(&max_pool_params(ifmap, ofmap, 2, 2, 2)).is_err());
    }

    #[test]
    fn test_padding_extends_output() {
        // 32x32, k3, s2, pad 1 on every edge: floor((32+2-3)/2)+1 = 16
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 2, 32, 32), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 2, 16, 16), Format::I8, true).unwrap();
        let mut p = max_pool_params(ifmap, ofmap, 3, 3, 2);
        p.pad_top = 1;
        p.pad_bottom = 1;
        p.pad_left = 1;
        p.pad_right = 1;
        ctx.max_pooling(&p).unwrap();
    }

    #[test]
    fn test_zero_insertion_expands_input() {
        // 4 wide with ins=1: expanded 7; k3 s1 -> out 5
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 1, 5, 5), Format::I8, true).unwrap();
        let mut p = max_pool_params(ifmap, ofmap, 3, 3, 1);
        p.ins_h = 1;
        p.ins_w = 1;
        ctx.max_pooling(&p).unwrap();
    }

    #[test]
    fn test_average_with_divisor() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 2, 8, 8), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 2, 4, 4), Format::I8, true).unwrap();
        ctx.average_pooling(&AveragePoolingParams {
            ifmap,
            ofmap,
            kh: 2,
            kw: 2,
            stride_h: 2,
            stride_w: 2,
            pad_top: 0,
            pad_bottom: 0,
            pad_left: 0,
            pad_right: 0,
            ins_h: 0,
            ins_w: 0,
            ins_last_h: 0,
            ins_last_w: 0,
            avg_divisor: Some(4.0),
            layer_id: 3,
        })
        .unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert_eq!(rec.opcode, Opcode::AveragePooling);
        assert_eq!(rec.avg_divisor, Some(4.0));
    }

    #[test]
    fn test_kernel_larger_than_input_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 1, 2, 2), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 1, 1, 1), Format::I8, true).unwrap();
        assert!(ctx.max_pooling(&max_pool_params(ifmap, ofmap, 3, 3, 1)).is_err());
    }
}

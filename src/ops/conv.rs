//! Convolution encoders: plain, depthwise, and constant-weight pointwise
//!
//! Out-of-bounds taps contribute zero — true padding, distinct from the
//! pooling skip rule. Zero-insertion counts expand the input grid before
//! padding is applied. A reduction too large for one call is split across
//! passes chained through a wide split-16 partial-sum buffer; shift, ReLU,
//! and the narrow saturating store happen only on the finalizing pass.

use crate::command::{CommandRecord, KernelGeometry, Opcode};
use crate::context::Context;
use crate::error::ForgeResult;
use crate::ops::Operand;
use crate::tensor::{
    check_param_operand, check_range, check_same_format, check_tensor_operand, Int16Pair,
    TensorDescriptor,
};
use crate::{format_error, param_error, shape_error};

/// Role of one convolution pass in a chained wide reduction
///
/// Intermediate passes park raw sums in the wide pair and defer `rshift_bits`
/// and ReLU; the finalizing pass reads the parked sums back at full width,
/// applies them, and stores the saturated int8 result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialSumMode {
    /// Single pass: the narrow result is produced immediately
    #[default]
    Disabled,
    /// First pass of a chain: overwrite the wide partial sums
    Begin,
    /// Middle pass: add onto the existing wide partial sums
    Accumulate,
    /// Last pass: add the partial sums, then shift, ReLU, and saturate
    Finalize,
}

/// Parameters for plain convolution
///
/// `weight` is laid out (oc, ic, kh, kw). `bias` is a per-output-channel
/// 16-bit parameter pair with degenerate strides.
#[derive(Debug, Clone, Copy)]
pub struct ConvolutionParams {
    pub ifmap: TensorDescriptor,
    pub ofmap: TensorDescriptor,
    /// High plane paired with `ofmap` for wide partial sums; required by
    /// every chained mode, rejected when chaining is disabled
    pub ofmap_high: Option<TensorDescriptor>,
    pub weight: TensorDescriptor,
    pub bias: Option<Int16Pair>,
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
    pub dilation_h: u16,
    pub dilation_w: u16,
    pub relu_enable: bool,
    pub rshift_bits: u8,
    /// Chained wide-reduction role of this pass
    pub partial_sum: PartialSumMode,
    pub layer_id: u16,
}

/// Parameters for depthwise convolution
///
/// The input-channel reduction is restricted to the matching channel;
/// `weight` is laid out (1, c, kh, kw).
#[derive(Debug, Clone, Copy)]
pub struct DepthwiseConvolutionParams {
    pub ifmap: TensorDescriptor,
    pub ofmap: TensorDescriptor,
    /// High plane paired with `ofmap` for wide partial sums
    pub ofmap_high: Option<TensorDescriptor>,
    pub weight: TensorDescriptor,
    pub bias: Option<Int16Pair>,
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
    pub dilation_h: u16,
    pub dilation_w: u16,
    pub relu_enable: bool,
    pub rshift_bits: u8,
    pub partial_sum: PartialSumMode,
    pub layer_id: u16,
}

/// Parameters for constant-weight pointwise convolution
///
/// A 1x1 kernel whose weight may be an inline constant applied across every
/// input channel.
#[derive(Debug, Clone, Copy)]
pub struct PointwiseConvolutionParams {
    pub ifmap: TensorDescriptor,
    pub ofmap: TensorDescriptor,
    /// High plane paired with `ofmap` for wide partial sums
    pub ofmap_high: Option<TensorDescriptor>,
    /// Weight tensor (oc, ic, 1, 1) or an inline constant
    pub weight: Operand,
    pub bias: Option<Int16Pair>,
    pub stride_h: u16,
    pub stride_w: u16,
    pub relu_enable: bool,
    pub rshift_bits: u8,
    pub partial_sum: PartialSumMode,
    pub layer_id: u16,
}

/// Dilated kernel extent: dilation*(k-1) + 1
fn dilated(k: u16, dilation: u16) -> u16 {
    dilation * (k - 1) + 1
}

struct ConvGeometry {
    ifmap: TensorDescriptor,
    ofmap: TensorDescriptor,
    kernel: KernelGeometry,
}

fn validate_conv_geometry(ctx: &Context, g: &ConvGeometry) -> ForgeResult<()> {
    let capacity = ctx.capacity();
    check_tensor_operand("ifmap", &g.ifmap)?;
    check_tensor_operand("ofmap", &g.ofmap)?;
    check_same_format("ifmap", &g.ifmap, "ofmap", &g.ofmap)?;
    check_range(&g.ifmap, capacity)?;
    check_range(&g.ofmap, capacity)?;
    if !g.ifmap.fmt.is_int8() {
        return Err(format_error!(
            "convolution requires a single-byte integer format, got {:?}",
            g.ifmap.fmt
        ));
    }

    let k = &g.kernel;
    if k.kh == 0 || k.kw == 0 || k.stride_h == 0 || k.stride_w == 0 || k.dilation_h == 0 || k.dilation_w == 0 {
        return Err(shape_error!(
            "kernel, stride, and dilation must be positive: kh={} kw={} stride=({}, {}) dilation=({}, {})",
            k.kh,
            k.kw,
            k.stride_h,
            k.stride_w,
            k.dilation_h,
            k.dilation_w
        ));
    }
    if g.ifmap.shape.n != g.ofmap.shape.n {
        return Err(shape_error!(
            "batch must match: ifmap n={}, ofmap n={}",
            g.ifmap.shape.n,
            g.ofmap.shape.n
        ));
    }

    let eff_kh = dilated(k.kh, k.dilation_h);
    let eff_kw = dilated(k.kw, k.dilation_w);
    let expanded_h =
        KernelGeometry::expanded_extent(g.ifmap.shape.h, k.ins_h, k.ins_last_h, k.pad_top, k.pad_bottom);
    let expanded_w =
        KernelGeometry::expanded_extent(g.ifmap.shape.w, k.ins_w, k.ins_last_w, k.pad_left, k.pad_right);
    let out_h = KernelGeometry::output_extent(expanded_h, eff_kh, k.stride_h).ok_or_else(|| {
        shape_error!("dilated kernel {}x{} larger than expanded input {}x{}", eff_kh, eff_kw, expanded_h, expanded_w)
    })?;
    let out_w = KernelGeometry::output_extent(expanded_w, eff_kw, k.stride_w).ok_or_else(|| {
        shape_error!("dilated kernel {}x{} larger than expanded input {}x{}", eff_kh, eff_kw, expanded_h, expanded_w)
    })?;
    if out_h != g.ofmap.shape.h || out_w != g.ofmap.shape.w {
        return Err(shape_error!(
            "convolution output must be {}x{}, ofmap declares {}x{}",
            out_h,
            out_w,
            g.ofmap.shape.h,
            g.ofmap.shape.w
        ));
    }
    Ok(())
}

fn validate_bias(ctx: &Context, bias: &Int16Pair, out_channels: u32) -> ForgeResult<()> {
    check_param_operand("bias", bias.low(), out_channels)?;
    check_range(bias.low(), ctx.capacity())?;
    check_range(bias.high(), ctx.capacity())?;
    Ok(())
}

/// Check the partial-sum plane against the chaining mode
///
/// Every chained mode needs the wide pair; shift and ReLU belong to the
/// finalizing pass, where the parked sums are still unshifted.
fn validate_partial_sum(
    ctx: &Context,
    mode: PartialSumMode,
    ofmap: &TensorDescriptor,
    ofmap_high: &Option<TensorDescriptor>,
    relu_enable: bool,
    rshift_bits: u8,
) -> ForgeResult<()> {
    let high = match (mode, ofmap_high) {
        (PartialSumMode::Disabled, None) => return Ok(()),
        (PartialSumMode::Disabled, Some(_)) => {
            return Err(param_error!(
                "partial-sum high plane supplied but chaining is disabled"
            ))
        }
        (_, None) => {
            return Err(param_error!(
                "{:?} chaining requires a wide partial-sum high plane",
                mode
            ))
        }
        (_, Some(high)) => high,
    };
    Int16Pair::new(*ofmap, *high)?;
    check_range(high, ctx.capacity())?;
    if mode != PartialSumMode::Finalize && (relu_enable || rshift_bits != 0) {
        return Err(param_error!(
            "shift and ReLU apply on the finalizing pass, not {:?}",
            mode
        ));
    }
    Ok(())
}

/// Encode the chaining role into the record's result slots and flags
fn apply_partial_sum(
    rec: &mut CommandRecord,
    mode: PartialSumMode,
    ofmap_high: &Option<TensorDescriptor>,
) {
    if let Some(high) = ofmap_high {
        rec.res_high = Some(high.into());
    }
    rec.accumulate = matches!(mode, PartialSumMode::Accumulate | PartialSumMode::Finalize);
    rec.res_is_int8 = matches!(mode, PartialSumMode::Disabled | PartialSumMode::Finalize);
}

fn conv_kernel(
    kh: u16,
    kw: u16,
    stride: (u16, u16),
    pad: (u16, u16, u16, u16),
    ins: (u16, u16, u16, u16),
    dilation: (u16, u16),
) -> KernelGeometry {
    KernelGeometry {
        kh,
        kw,
        stride_h: stride.0,
        stride_w: stride.1,
        pad_top: pad.0,
        pad_bottom: pad.1,
        pad_left: pad.2,
        pad_right: pad.3,
        ins_h: ins.0,
        ins_w: ins.1,
        ins_last_h: ins.2,
        ins_last_w: ins.3,
        dilation_h: dilation.0,
        dilation_w: dilation.1,
    }
}

impl Context {
    /// Plain convolution over all input channels
    pub fn convolution(&mut self, p: &ConvolutionParams) -> ForgeResult<()> {
        check_tensor_operand("weight", &p.weight)?;
        check_range(&p.weight, self.capacity())?;
        if p.weight.shape.n != p.ofmap.shape.c {
            return Err(shape_error!(
                "weight carries {} output channels, ofmap declares {}",
                p.weight.shape.n,
                p.ofmap.shape.c
            ));
        }
        if p.weight.shape.c != p.ifmap.shape.c {
            return Err(shape_error!(
                "weight reduces {} input channels, ifmap carries {}",
                p.weight.shape.c,
                p.ifmap.shape.c
            ));
        }

        let geometry = ConvGeometry {
            ifmap: p.ifmap,
            ofmap: p.ofmap,
            kernel: conv_kernel(
                p.weight.shape.h as u16,
                p.weight.shape.w as u16,
                (p.stride_h, p.stride_w),
                (p.pad_top, p.pad_bottom, p.pad_left, p.pad_right),
                (p.ins_h, p.ins_w, p.ins_last_h, p.ins_last_w),
                (p.dilation_h, p.dilation_w),
            ),
        };
        validate_conv_geometry(self, &geometry)?;
        validate_partial_sum(self, p.partial_sum, &p.ofmap, &p.ofmap_high, p.relu_enable, p.rshift_bits)?;
        if let Some(bias) = &p.bias {
            validate_bias(self, bias, p.ofmap.shape.c)?;
        }

        let mut rec = CommandRecord::new(Opcode::Convolution, p.layer_id);
        rec.a = Some((&p.ifmap).into());
        rec.weight = Some((&p.weight).into());
        rec.res = Some((&p.ofmap).into());
        if let Some(bias) = &p.bias {
            rec.bias = Some(bias.low().into());
            rec.bias_high = Some(bias.high().into());
        }
        rec.kernel = Some(geometry.kernel);
        rec.relu_enable = p.relu_enable;
        rec.rshift_bits = p.rshift_bits;
        apply_partial_sum(&mut rec, p.partial_sum, &p.ofmap_high);
        self.append_record(rec);
        Ok(())
    }

    /// Depthwise convolution: each channel reduces against itself only
    pub fn depthwise_convolution(&mut self, p: &DepthwiseConvolutionParams) -> ForgeResult<()> {
        check_tensor_operand("weight", &p.weight)?;
        check_range(&p.weight, self.capacity())?;
        if p.ifmap.shape.c != p.ofmap.shape.c {
            return Err(shape_error!(
                "depthwise preserves channels: ifmap c={}, ofmap c={}",
                p.ifmap.shape.c,
                p.ofmap.shape.c
            ));
        }
        if p.weight.shape.n != 1 || p.weight.shape.c != p.ifmap.shape.c {
            return Err(shape_error!(
                "depthwise weight must be (1, {}, kh, kw), got {:?}",
                p.ifmap.shape.c,
                p.weight.shape
            ));
        }

        let geometry = ConvGeometry {
            ifmap: p.ifmap,
            ofmap: p.ofmap,
            kernel: conv_kernel(
                p.weight.shape.h as u16,
                p.weight.shape.w as u16,
                (p.stride_h, p.stride_w),
                (p.pad_top, p.pad_bottom, p.pad_left, p.pad_right),
                (p.ins_h, p.ins_w, p.ins_last_h, p.ins_last_w),
                (p.dilation_h, p.dilation_w),
            ),
        };
        validate_conv_geometry(self, &geometry)?;
        validate_partial_sum(self, p.partial_sum, &p.ofmap, &p.ofmap_high, p.relu_enable, p.rshift_bits)?;
        if let Some(bias) = &p.bias {
            validate_bias(self, bias, p.ofmap.shape.c)?;
        }

        let mut rec = CommandRecord::new(Opcode::DepthwiseConvolution, p.layer_id);
        rec.a = Some((&p.ifmap).into());
        rec.weight = Some((&p.weight).into());
        rec.res = Some((&p.ofmap).into());
        if let Some(bias) = &p.bias {
            rec.bias = Some(bias.low().into());
            rec.bias_high = Some(bias.high().into());
        }
        rec.kernel = Some(geometry.kernel);
        rec.relu_enable = p.relu_enable;
        rec.rshift_bits = p.rshift_bits;
        apply_partial_sum(&mut rec, p.partial_sum, &p.ofmap_high);
        self.append_record(rec);
        Ok(())
    }

    /// Constant-weight pointwise convolution (1x1 kernel)
    pub fn pointwise_convolution(&mut self, p: &PointwiseConvolutionParams) -> ForgeResult<()> {
        match &p.weight {
            Operand::Tensor(w) => {
                check_tensor_operand("weight", w)?;
                check_range(w, self.capacity())?;
                if w.shape.h != 1 || w.shape.w != 1 {
                    return Err(shape_error!(
                        "pointwise weight must use a 1x1 kernel, got {}x{}",
                        w.shape.h,
                        w.shape.w
                    ));
                }
                if w.shape.n != p.ofmap.shape.c || w.shape.c != p.ifmap.shape.c {
                    return Err(shape_error!(
                        "pointwise weight must be ({}, {}, 1, 1), got {:?}",
                        p.ofmap.shape.c,
                        p.ifmap.shape.c,
                        w.shape
                    ));
                }
            }
            Operand::Const(_) => {
                // A constant weight applies uniformly; channel counts must
                // still agree so the reduction extent is defined
                if p.ifmap.shape.c != p.ofmap.shape.c {
                    return Err(shape_error!(
                        "constant-weight pointwise preserves channels: ifmap c={}, ofmap c={}",
                        p.ifmap.shape.c,
                        p.ofmap.shape.c
                    ));
                }
            }
        }

        let geometry = ConvGeometry {
            ifmap: p.ifmap,
            ofmap: p.ofmap,
            kernel: conv_kernel(1, 1, (p.stride_h, p.stride_w), (0, 0, 0, 0), (0, 0, 0, 0), (1, 1)),
        };
        validate_conv_geometry(self, &geometry)?;
        validate_partial_sum(self, p.partial_sum, &p.ofmap, &p.ofmap_high, p.relu_enable, p.rshift_bits)?;
        if let Some(bias) = &p.bias {
            validate_bias(self, bias, p.ofmap.shape.c)?;
        }

        let mut rec = CommandRecord::new(Opcode::Convolution, p.layer_id);
        rec.a = Some((&p.ifmap).into());
        rec.res = Some((&p.ofmap).into());
        match &p.weight {
            Operand::Tensor(w) => rec.weight = Some(w.into()),
            Operand::Const(c) => rec.weight_const = Some(*c),
        }
        if let Some(bias) = &p.bias {
            rec.bias = Some(bias.low().into());
            rec.bias_high = Some(bias.high().into());
        }
        rec.kernel = Some(geometry.kernel);
        rec.relu_enable = p.relu_enable;
        rec.rshift_bits = p.rshift_bits;
        apply_partial_sum(&mut rec, p.partial_sum, &p.ofmap_high);
        self.append_record(rec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Format, Shape, Stride};

    fn conv_params(
        ifmap: TensorDescriptor,
        ofmap: TensorDescriptor,
        weight: TensorDescriptor,
    ) -> ConvolutionParams {
        ConvolutionParams {
            ifmap,
            ofmap,
            ofmap_high: None,
            weight,
            bias: None,
            stride_h: 1,
            stride_w: 1,
            pad_top: 0,
            pad_bottom: 0,
            pad_left: 0,
            pad_right: 0,
            ins_h: 0,
            ins_w: 0,
            ins_last_h: 0,
            ins_last_w: 0,
            dilation_h: 1,
            dilation_w: 1,
            relu_enable: false,
            rshift_bits: 0,
            partial_sum: PartialSumMode::Disabled,
            layer_id: 0,
        }
    }

    #[test]
    fn test_plain_convolution_shapes() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 4, 8, 8), Format::I8, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(8, 4, 3, 3), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 8, 6, 6), Format::I8, true).unwrap();
        ctx.convolution(&conv_params(ifmap, ofmap, weight)).unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert_eq!(rec.opcode, Opcode::Convolution);
        assert_eq!(rec.kernel.unwrap().kh, 3);
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 4, 8, 8), Format::I8, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(8, 2, 3, 3), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 8, 6, 6), Format::I8, true).unwrap();
        assert!(ctx.convolution(&conv_params(ifmap, ofmap, weight)).is_err());
        assert!(ctx.command_buffer().is_empty());
    }

    #[test]
    fn test_padding_and_stride_output() {
        // 28x28, k3, s2, pad 1: floor((28+2-3)/2)+1 = 14
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 2, 28, 28), Format::I8, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(2, 2, 3, 3), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 2, 14, 14), Format::I8, true).unwrap();
        let mut p = conv_params(ifmap, ofmap, weight);
        p.stride_h = 2;
        p.stride_w = 2;
        p.pad_top = 1;
        p.pad_bottom = 1;
        p.pad_left = 1;
        p.pad_right = 1;
        ctx.convolution(&p).unwrap();
    }

    #[test]
    fn test_dilation_grows_effective_kernel() {
        // k3 d2 -> effective 5; 8 - 5 + 1 = 4
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 1, 8, 8), Format::I8, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(1, 1, 3, 3), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let mut p = conv_params(ifmap, ofmap, weight);
        p.dilation_h = 2;
        p.dilation_w = 2;
        ctx.convolution(&p).unwrap();
    }

    #[test]
    fn test_depthwise_weight_shape() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 4, 8, 8), Format::I8, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(1, 4, 3, 3), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 4, 6, 6), Format::I8, true).unwrap();
        ctx.depthwise_convolution(&DepthwiseConvolutionParams {
            ifmap,
            ofmap,
            ofmap_high: None,
            weight,
            bias: None,
            stride_h: 1,
            stride_w: 1,
            pad_top: 0,
            pad_bottom: 0,
            pad_left: 0,
            pad_right: 0,
            ins_h: 0,
            ins_w: 0,
            ins_last_h: 0,
            ins_last_w: 0,
            dilation_h: 1,
            dilation_w: 1,
            relu_enable: false,
            rshift_bits: 0,
            partial_sum: PartialSumMode::Disabled,
            layer_id: 0,
        })
        .unwrap();
        assert_eq!(
            ctx.command_buffer().records()[0].opcode,
            Opcode::DepthwiseConvolution
        );
    }

    #[test]
    fn test_bias_must_be_degenerate() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 2, 4, 4), Format::I8, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(2, 2, 1, 1), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 2, 4, 4), Format::I8, true).unwrap();

        // A fully-strided bias tensor is illegal in the parameter role
        let bad_low = ctx.alloc_tensor(Shape::new(1, 2, 1, 1), Format::I8, true).unwrap();
        let bad_high = ctx.alloc_tensor(Shape::new(1, 2, 1, 1), Format::I8, true).unwrap();
        let bad_bias = Int16Pair::new(bad_low, bad_high).unwrap();
        let mut p = conv_params(ifmap, ofmap, weight);
        p.bias = Some(bad_bias);
        assert!(ctx.convolution(&p).is_err());

        // Degenerate strides make it legal
        let mut low = bad_low;
        low.stride = Stride::per_channel();
        let mut high = bad_high;
        high.stride = Stride::per_channel();
        p.bias = Some(Int16Pair::new(low, high).unwrap());
        ctx.convolution(&p).unwrap();
    }

    #[test]
    fn test_pointwise_const_weight() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 4, 8, 8), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 4, 8, 8), Format::I8, true).unwrap();
        ctx.pointwise_convolution(&PointwiseConvolutionParams {
            ifmap,
            ofmap,
            ofmap_high: None,
            weight: Operand::constant(2),
            bias: None,
            stride_h: 1,
            stride_w: 1,
            relu_enable: true,
            rshift_bits: 0,
            partial_sum: PartialSumMode::Disabled,
            layer_id: 5,
        })
        .unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert!(rec.weight.is_none());
        assert_eq!(rec.weight_const.unwrap().value, 2);
        assert!(rec.relu_enable);
    }

    #[test]
    fn test_chained_pass_needs_wide_planes() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(1, 1, 1, 1), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();

        let mut p = conv_params(ifmap, ofmap, weight);
        p.partial_sum = PartialSumMode::Begin;
        let err = ctx.convolution(&p).unwrap_err();
        assert!(matches!(err, crate::error::NpuForgeError::InvalidParameters(_)));
        assert!(ctx.command_buffer().is_empty());

        // A stray high plane without a chaining mode is also rejected
        let high = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let mut p = conv_params(ifmap, ofmap, weight);
        p.ofmap_high = Some(high);
        assert!(ctx.convolution(&p).is_err());
    }

    #[test]
    fn test_shift_deferred_to_finalizing_pass() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(1, 1, 1, 1), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let high = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();

        let mut p = conv_params(ifmap, ofmap, weight);
        p.ofmap_high = Some(high);
        p.partial_sum = PartialSumMode::Begin;
        p.rshift_bits = 2;
        assert!(ctx.convolution(&p).is_err());

        p.partial_sum = PartialSumMode::Finalize;
        ctx.convolution(&p).unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert!(rec.accumulate);
        assert!(rec.res_is_int8);
        assert!(rec.res_high.is_some());
    }

    #[test]
    fn test_intermediate_pass_defers_narrowing() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(1, 1, 1, 1), Format::I8, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let high = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();

        let mut p = conv_params(ifmap, ofmap, weight);
        p.ofmap_high = Some(high);
        p.partial_sum = PartialSumMode::Accumulate;
        ctx.convolution(&p).unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert!(rec.accumulate);
        assert!(!rec.res_is_int8);
    }

    #[test]
    fn test_bf16_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let ifmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::Bf16, true).unwrap();
        let weight = ctx.alloc_tensor(Shape::new(1, 1, 1, 1), Format::Bf16, true).unwrap();
        let ofmap = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::Bf16, true).unwrap();
        let err = ctx.convolution(&conv_params(ifmap, ofmap, weight)).unwrap_err();
        assert!(matches!(err, crate::error::NpuForgeError::UnsupportedFormat(_)));
    }
}

//! Elementwise arithmetic and logic encoders
//!
//! add, max, min, ge, multiply-accumulate, and, or, xor — each in an int8
//! and a split-int16 variant. Operand B may be an inline constant. Compute
//! is saturating per element; an optional ReLU clamps negative results to
//! zero after the op for the arithmetic encoders.

use crate::command::{CommandRecord, Opcode};
use crate::context::Context;
use crate::error::ForgeResult;
use crate::ops::{Operand, WideOperand};
use crate::shape_error;
use crate::tensor::{
    check_range, check_same_format, check_same_shape, check_tensor_operand, Int16Pair,
    TensorDescriptor,
};

/// Parameters for the arithmetic int8 encoders (add, max, min)
#[derive(Debug, Clone, Copy)]
pub struct Binary8Params {
    pub a: TensorDescriptor,
    pub b: Operand,
    pub res: TensorDescriptor,
    pub relu_enable: bool,
    pub rshift_bits: u8,
    pub layer_id: u16,
}

/// Parameters for the arithmetic split-int16 encoders
#[derive(Debug, Clone, Copy)]
pub struct Binary16Params {
    pub a: Int16Pair,
    pub b: WideOperand,
    pub res: Int16Pair,
    pub relu_enable: bool,
    pub rshift_bits: u8,
    pub layer_id: u16,
}

/// Parameters for the logic/compare int8 encoders (ge, and, or, xor)
#[derive(Debug, Clone, Copy)]
pub struct Logic8Params {
    pub a: TensorDescriptor,
    pub b: Operand,
    pub res: TensorDescriptor,
    pub layer_id: u16,
}

/// Parameters for the logic/compare split-int16 encoders
#[derive(Debug, Clone, Copy)]
pub struct Logic16Params {
    pub a: Int16Pair,
    pub b: WideOperand,
    pub res: Int16Pair,
    pub layer_id: u16,
}

/// Parameters for multiply-accumulate
///
/// `res = saturate(((a * b) << lshift + res_prev) >> rshift)`. With a high
/// plane present the previous value is the joined 16-bit accumulator. When
/// `res_is_int8` is also set, the engine mirrors the saturated 8-bit result
/// into both planes; otherwise the 16-bit result is re-split.
#[derive(Debug, Clone, Copy)]
pub struct MacParams {
    pub a: TensorDescriptor,
    pub b: Operand,
    pub res: TensorDescriptor,
    pub res_high: Option<TensorDescriptor>,
    pub lshift_bits: u8,
    pub rshift_bits: u8,
    pub res_is_int8: bool,
    pub relu_enable: bool,
    pub layer_id: u16,
}

/// Shared validation for the int8 binary encoders
fn validate_binary8(ctx: &Context, a: &TensorDescriptor, b: &Operand, res: &TensorDescriptor) -> ForgeResult<()> {
    let capacity = ctx.capacity();
    check_tensor_operand("a", a)?;
    check_tensor_operand("res", res)?;
    check_same_shape("a", a, "res", res)?;
    check_same_format("a", a, "res", res)?;
    check_range(a, capacity)?;
    check_range(res, capacity)?;
    if let Operand::Tensor(b) = b {
        check_tensor_operand("b", b)?;
        check_same_shape("a", a, "b", b)?;
        check_same_format("a", a, "b", b)?;
        check_range(b, capacity)?;
    }
    Ok(())
}

/// Shared validation for the split-int16 binary encoders
fn validate_binary16(ctx: &Context, a: &Int16Pair, b: &WideOperand, res: &Int16Pair) -> ForgeResult<()> {
    let capacity = ctx.capacity();
    check_tensor_operand("a", a.low())?;
    check_tensor_operand("res", res.low())?;
    check_same_shape("a", a.low(), "res", res.low())?;
    check_range(a.low(), capacity)?;
    check_range(a.high(), capacity)?;
    check_range(res.low(), capacity)?;
    check_range(res.high(), capacity)?;
    if let WideOperand::Pair(b) = b {
        check_tensor_operand("b", b.low())?;
        check_same_shape("a", a.low(), "b", b.low())?;
        check_range(b.low(), capacity)?;
        check_range(b.high(), capacity)?;
    }
    Ok(())
}

fn binary8_record(opcode: Opcode, p: &Binary8Params) -> CommandRecord {
    let mut rec = CommandRecord::new(opcode, p.layer_id);
    rec.a = Some((&p.a).into());
    rec.res = Some((&p.res).into());
    match &p.b {
        Operand::Tensor(b) => rec.b = Some(b.into()),
        Operand::Const(c) => rec.b_const = Some(*c),
    }
    rec.relu_enable = p.relu_enable;
    rec.rshift_bits = p.rshift_bits;
    rec.res_is_int8 = true;
    rec
}

fn binary16_record(opcode: Opcode, p: &Binary16Params) -> CommandRecord {
    let mut rec = CommandRecord::new(opcode, p.layer_id);
    rec.set_a_pair(&p.a);
    rec.set_res_pair(&p.res);
    match &p.b {
        WideOperand::Pair(b) => rec.set_b_pair(b),
        WideOperand::Const(c) => rec.b_const = Some(*c),
    }
    rec.relu_enable = p.relu_enable;
    rec.rshift_bits = p.rshift_bits;
    rec
}

fn logic8_record(opcode: Opcode, p: &Logic8Params) -> CommandRecord {
    let mut rec = CommandRecord::new(opcode, p.layer_id);
    rec.a = Some((&p.a).into());
    rec.res = Some((&p.res).into());
    match &p.b {
        Operand::Tensor(b) => rec.b = Some(b.into()),
        Operand::Const(c) => rec.b_const = Some(*c),
    }
    rec.res_is_int8 = true;
    rec
}

fn logic16_record(opcode: Opcode, p: &Logic16Params) -> CommandRecord {
    let mut rec = CommandRecord::new(opcode, p.layer_id);
    rec.set_a_pair(&p.a);
    rec.set_res_pair(&p.res);
    match &p.b {
        WideOperand::Pair(b) => rec.set_b_pair(b),
        WideOperand::Const(c) => rec.b_const = Some(*c),
    }
    rec
}

impl Context {
    /// Saturating elementwise add, int8
    pub fn add(&mut self, p: &Binary8Params) -> ForgeResult<()> {
        validate_binary8(self, &p.a, &p.b, &p.res)?;
        self.append_record(binary8_record(Opcode::Add, p));
        Ok(())
    }

    /// Saturating elementwise add, split int16
    pub fn add_int16(&mut self, p: &Binary16Params) -> ForgeResult<()> {
        validate_binary16(self, &p.a, &p.b, &p.res)?;
        self.append_record(binary16_record(Opcode::Add, p));
        Ok(())
    }

    /// Elementwise maximum, int8
    pub fn max(&mut self, p: &Binary8Params) -> ForgeResult<()> {
        validate_binary8(self, &p.a, &p.b, &p.res)?;
        self.append_record(binary8_record(Opcode::Max, p));
        Ok(())
    }

    /// Elementwise maximum, split int16
    pub fn max_int16(&mut self, p: &Binary16Params) -> ForgeResult<()> {
        validate_binary16(self, &p.a, &p.b, &p.res)?;
        self.append_record(binary16_record(Opcode::Max, p));
        Ok(())
    }

    /// Elementwise minimum, int8
    pub fn min(&mut self, p: &Binary8Params) -> ForgeResult<()> {
        validate_binary8(self, &p.a, &p.b, &p.res)?;
        self.append_record(binary8_record(Opcode::Min, p));
        Ok(())
    }

    /// Elementwise minimum, split int16
    pub fn min_int16(&mut self, p: &Binary16Params) -> ForgeResult<()> {
        validate_binary16(self, &p.a, &p.b, &p.res)?;
        self.append_record(binary16_record(Opcode::Min, p));
        Ok(())
    }

    /// Elementwise greater-or-equal indicator, int8
    pub fn ge(&mut self, p: &Logic8Params) -> ForgeResult<()> {
        validate_binary8(self, &p.a, &p.b, &p.res)?;
        self.append_record(logic8_record(Opcode::Ge, p));
        Ok(())
    }

    /// Elementwise greater-or-equal indicator, split int16
    pub fn ge_int16(&mut self, p: &Logic16Params) -> ForgeResult<()> {
        validate_binary16(self, &p.a, &p.b, &p.res)?;
        self.append_record(logic16_record(Opcode::Ge, p));
        Ok(())
    }

    /// Bitwise and, int8
    pub fn bitwise_and(&mut self, p: &Logic8Params) -> ForgeResult<()> {
        validate_binary8(self, &p.a, &p.b, &p.res)?;
        require_int8_logic(&p.a)?;
        self.append_record(logic8_record(Opcode::And, p));
        Ok(())
    }

    /// Bitwise and, split int16
    pub fn bitwise_and_int16(&mut self, p: &Logic16Params) -> ForgeResult<()> {
        validate_binary16(self, &p.a, &p.b, &p.res)?;
        self.append_record(logic16_record(Opcode::And, p));
        Ok(())
    }

    /// Bitwise or, int8
    pub fn bitwise_or(&mut self, p: &Logic8Params) -> ForgeResult<()> {
        validate_binary8(self, &p.a, &p.b, &p.res)?;
        require_int8_logic(&p.a)?;
        self.append_record(logic8_record(Opcode::Or, p));
        Ok(())
    }

    /// Bitwise or, split int16
    pub fn bitwise_or_int16(&mut self, p: &Logic16Params) -> ForgeResult<()> {
        validate_binary16(self, &p.a, &p.b, &p.res)?;
        self.append_record(logic16_record(Opcode::Or, p));
        Ok(())
    }

    /// Bitwise xor, int8
    pub fn bitwise_xor(&mut self, p: &Logic8Params) -> ForgeResult<()> {
        validate_binary8(self, &p.a, &p.b, &p.res)?;
        require_int8_logic(&p.a)?;
        self.append_record(logic8_record(Opcode::Xor, p));
        Ok(())
    }

    /// Bitwise xor, split int16
    pub fn bitwise_xor_int16(&mut self, p: &Logic16Params) -> ForgeResult<()> {
        validate_binary16(self, &p.a, &p.b, &p.res)?;
        self.append_record(logic16_record(Opcode::Xor, p));
        Ok(())
    }

    /// Multiply-accumulate
    pub fn mac(&mut self, p: &MacParams) -> ForgeResult<()> {
        validate_binary8(self, &p.a, &p.b, &p.res)?;
        if let Some(res_high) = &p.res_high {
            check_tensor_operand("res_high", res_high)?;
            check_same_shape("res", &p.res, "res_high", res_high)?;
            if p.res.stride != res_high.stride {
                return Err(shape_error!(
                    "mac result planes must share stride: low {:?}, high {:?}",
                    p.res.stride,
                    res_high.stride
                ));
            }
            check_range(res_high, self.capacity())?;
        }

        let mut rec = CommandRecord::new(Opcode::Mac, p.layer_id);
        rec.a = Some((&p.a).into());
        rec.res = Some((&p.res).into());
        rec.res_high = p.res_high.as_ref().map(|t| t.into());
        match &p.b {
            Operand::Tensor(b) => rec.b = Some(b.into()),
            Operand::Const(c) => rec.b_const = Some(*c),
        }
        rec.lshift_bits = p.lshift_bits;
        rec.rshift_bits = p.rshift_bits;
        rec.res_is_int8 = p.res_is_int8;
        rec.relu_enable = p.relu_enable;
        rec.accumulate = true;
        self.append_record(rec);
        Ok(())
    }
}

/// Logic ops operate on raw bytes; narrow-float operands make no sense there
fn require_int8_logic(a: &TensorDescriptor) -> ForgeResult<()> {
    if !a.fmt.is_int8() {
        return Err(crate::format_error!(
            "logic ops require a single-byte integer format, got {:?}",
            a.fmt
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Format, Shape};

    fn ctx_with_three() -> (Context, TensorDescriptor, TensorDescriptor, TensorDescriptor) {
        let mut ctx = Context::with_defaults().unwrap();
        let shape = Shape::new(1, 4, 4, 4);
        let a = ctx.alloc_tensor(shape, Format::I8, true).unwrap();
        let b = ctx.alloc_tensor(shape, Format::I8, true).unwrap();
        let res = ctx.alloc_tensor(shape, Format::I8, true).unwrap();
        (ctx, a, b, res)
    }

    #[test]
    fn test_add_appends_one_record() {
        let (mut ctx, a, b, res) = ctx_with_three();
        ctx.add(&Binary8Params {
            a,
            b: Operand::Tensor(b),
            res,
            relu_enable: false,
            rshift_bits: 0,
            layer_id: 1,
        })
        .unwrap();
        assert_eq!(ctx.command_buffer().len(), 1);
        let rec = &ctx.command_buffer().records()[0];
        assert_eq!(rec.opcode, Opcode::Add);
        assert!(rec.b.is_some());
        assert!(rec.b_const.is_none());
    }

    #[test]
    fn test_shape_mismatch_appends_nothing() {
        let (mut ctx, a, _b, _res) = ctx_with_three();
        let small = ctx.alloc_tensor(Shape::new(1, 4, 2, 2), Format::I8, true).unwrap();
        let err = ctx
            .add(&Binary8Params {
                a,
                b: Operand::Tensor(small),
                res: small,
                relu_enable: false,
                rshift_bits: 0,
                layer_id: 0,
            })
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(ctx.command_buffer().is_empty());
    }

    #[test]
    fn test_const_operand_encodes_inline() {
        let (mut ctx, a, _b, res) = ctx_with_three();
        ctx.max(&Binary8Params {
            a,
            b: Operand::constant(5),
            res,
            relu_enable: false,
            rshift_bits: 0,
            layer_id: 0,
        })
        .unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert!(rec.b.is_none());
        assert_eq!(rec.b_const.unwrap().value, 5);
    }

    #[test]
    fn test_format_mismatch_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let shape = Shape::new(1, 1, 4, 4);
        let a = ctx.alloc_tensor(shape, Format::I8, true).unwrap();
        let b = ctx.alloc_tensor(shape, Format::U8, true).unwrap();
        let res = ctx.alloc_tensor(shape, Format::I8, true).unwrap();
        assert!(ctx
            .add(&Binary8Params {
                a,
                b: Operand::Tensor(b),
                res,
                relu_enable: false,
                rshift_bits: 0,
                layer_id: 0,
            })
            .is_err());
    }

    #[test]
    fn test_logic_rejects_bf16() {
        let mut ctx = Context::with_defaults().unwrap();
        let shape = Shape::new(1, 1, 4, 4);
        let a = ctx.alloc_tensor(shape, Format::Bf16, true).unwrap();
        let b = ctx.alloc_tensor(shape, Format::Bf16, true).unwrap();
        let res = ctx.alloc_tensor(shape, Format::Bf16, true).unwrap();
        let err = ctx
            .bitwise_xor(&Logic8Params {
                a,
                b: Operand::Tensor(b),
                res,
                layer_id: 0,
            })
            .unwrap_err();
        assert!(matches!(err, crate::error::NpuForgeError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_int16_variant_captures_planes() {
        let mut ctx = Context::with_defaults().unwrap();
        let shape = Shape::new(1, 2, 4, 4);
        let a = ctx.alloc_int16(shape, true).unwrap();
        let b = ctx.alloc_int16(shape, true).unwrap();
        let res = ctx.alloc_int16(shape, true).unwrap();
        ctx.add_int16(&Binary16Params {
            a,
            b: WideOperand::Pair(b),
            res,
            relu_enable: false,
            rshift_bits: 0,
            layer_id: 2,
        })
        .unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert!(rec.a_high.is_some());
        assert!(rec.b_high.is_some());
        assert!(rec.res_high.is_some());
    }

    #[test]
    fn test_mac_requires_matching_high_plane() {
        let (mut ctx, a, b, res) = ctx_with_three();
        let bad_high = ctx.alloc_tensor(Shape::new(1, 4, 2, 2), Format::I8, true).unwrap();
        assert!(ctx
            .mac(&MacParams {
                a,
                b: Operand::Tensor(b),
                res,
                res_high: Some(bad_high),
                lshift_bits: 0,
                rshift_bits: 0,
                res_is_int8: true,
                relu_enable: false,
                layer_id: 0,
            })
            .is_err());
        assert!(ctx.command_buffer().is_empty());
    }
}

//! Per-channel arithmetic shift over split 16-bit values
//!
//! Shift counts live in a degenerate per-channel tensor of signed bytes.
//! Negative counts shift right arithmetically; positive counts shift left
//! with wraparound, matching the hardware barrel shifter.

use crate::command::{CommandRecord, Opcode};
use crate::context::Context;
use crate::error::ForgeResult;
use crate::shape_error;
use crate::tensor::{check_param_operand, check_range, Int16Pair, TensorDescriptor};

#[derive(Debug, Clone, Copy)]
pub struct ArithShiftParams {
    pub a: Int16Pair,
    pub res: Int16Pair,
    /// Signed per-channel shift counts, degenerate strides
    pub bits: TensorDescriptor,
    pub layer_id: u16,
}

impl Context {
    /// Shift each 16-bit element by its channel's signed count
    pub fn arithmetic_shift(&mut self, p: &ArithShiftParams) -> ForgeResult<()> {
        let capacity = self.capacity();
        for plane in [p.a.low(), p.a.high(), p.res.low(), p.res.high()] {
            check_range(plane, capacity)?;
        }
        if p.a.shape() != p.res.shape() {
            return Err(shape_error!(
                "operand shape {:?} does not match result shape {:?}",
                p.a.shape(),
                p.res.shape()
            ));
        }
        check_param_operand("shift bits", &p.bits, p.a.shape().c)?;
        check_range(&p.bits, capacity)?;

        let mut rec = CommandRecord::new(Opcode::ArithShift, p.layer_id);
        rec.set_a_pair(&p.a);
        rec.set_res_pair(&p.res);
        rec.shift_bits = Some((&p.bits).into());
        self.append_record(rec);
        Ok(())
    }
}

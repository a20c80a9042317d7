//! Stride-aware tensor copy encoder

use crate::command::{CommandRecord, Opcode};
use crate::context::Context;
use crate::error::ForgeResult;
use crate::tensor::{
    check_range, check_same_format, check_same_shape, check_tensor_operand, TensorDescriptor,
};

#[derive(Debug, Clone, Copy)]
pub struct CopyParams {
    pub src: TensorDescriptor,
    pub dst: TensorDescriptor,
    pub layer_id: u16,
}

impl Context {
    /// Copy element-by-element under each side's own strides
    ///
    /// Shapes and formats must match; strides may differ, which makes this
    /// the layout-conversion primitive.
    pub fn tensor_copy(&mut self, p: &CopyParams) -> ForgeResult<()> {
        check_tensor_operand("src", &p.src)?;
        check_tensor_operand("dst", &p.dst)?;
        check_same_shape("src", &p.src, "dst", &p.dst)?;
        check_same_format("src", &p.src, "dst", &p.dst)?;
        check_range(&p.src, self.capacity())?;
        check_range(&p.dst, self.capacity())?;

        let mut rec = CommandRecord::new(Opcode::Copy, p.layer_id);
        rec.a = Some((&p.src).into());
        rec.res = Some((&p.dst).into());
        self.append_record(rec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Format, Shape};

    #[test]
    fn test_copy_encodes() {
        let mut ctx = Context::with_defaults().unwrap();
        let src = ctx.alloc_tensor(Shape::new(1, 2, 4, 4), Format::I8, true).unwrap();
        let dst = ctx.alloc_tensor(Shape::new(1, 2, 4, 4), Format::I8, true).unwrap();
        ctx.tensor_copy(&CopyParams {
            src,
            dst,
            layer_id: 3,
        })
        .unwrap();
        let rec = &ctx.command_buffer().records()[0];
        assert_eq!(rec.opcode, Opcode::Copy);
        assert_eq!(rec.layer_id, 3);
    }

    #[test]
    fn test_format_mismatch_rejected() {
        let mut ctx = Context::with_defaults().unwrap();
        let src = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let dst = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::Bf16, true).unwrap();
        assert!(ctx
            .tensor_copy(&CopyParams {
                src,
                dst,
                layer_id: 0
            })
            .is_err());
    }
}

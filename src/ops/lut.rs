//! Table lookup encoder
//!
//! Each input byte indexes into a resident table; unsigned indexing covers
//! the full 256-entry domain, so the table must hold at least 256 elements.

use crate::command::{CommandRecord, Opcode};
use crate::context::Context;
use crate::error::ForgeResult;
use crate::tensor::{
    check_range, check_same_format, check_same_shape, check_tensor_operand, TensorDescriptor,
};
use crate::{format_error, shape_error};

/// Minimum table extent for the 8-bit index domain
pub const LUT_TABLE_ENTRIES: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct LookupTableParams {
    pub ifmap: TensorDescriptor,
    pub ofmap: TensorDescriptor,
    pub table: TensorDescriptor,
    pub layer_id: u16,
}

impl Context {
    /// Gather `ofmap[i] = table[ifmap[i] as unsigned]`
    pub fn lookup_table(&mut self, p: &LookupTableParams) -> ForgeResult<()> {
        check_tensor_operand("ifmap", &p.ifmap)?;
        check_tensor_operand("ofmap", &p.ofmap)?;
        check_tensor_operand("table", &p.table)?;
        check_same_shape("ifmap", &p.ifmap, "ofmap", &p.ofmap)?;
        check_same_format("table", &p.table, "ofmap", &p.ofmap)?;
        check_range(&p.ifmap, self.capacity())?;
        check_range(&p.ofmap, self.capacity())?;
        check_range(&p.table, self.capacity())?;
        if !p.ifmap.fmt.is_int8() {
            return Err(format_error!(
                "lookup index must be a single-byte format, got {:?}",
                p.ifmap.fmt
            ));
        }
        if p.table.shape.element_count() < LUT_TABLE_ENTRIES {
            return Err(shape_error!(
                "table holds {} entries, the 8-bit domain needs {}",
                p.table.shape.element_count(),
                LUT_TABLE_ENTRIES
            ));
        }

        let mut rec = CommandRecord::new(Opcode::LookupTable, p.layer_id);
        rec.a = Some((&p.ifmap).into());
        rec.res = Some((&p.ofmap).into());
        rec.table = Some((&p.table).into());
        self.append_record(rec);
        Ok(())
    }
}

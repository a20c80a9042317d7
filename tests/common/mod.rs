//! Shared helpers for the integration suites
#![allow(dead_code)]

use npuforge::{Context, Format, MatrixDescriptor, Shape, Stride, TensorDescriptor};

/// Write signed byte values into a tensor's region
pub fn write_i8(ctx: &mut Context, t: &TensorDescriptor, values: &[i8]) {
    let bytes: Vec<u8> = values.iter().map(|&v| v as u8).collect();
    ctx.copy_to_device(t, &bytes).unwrap();
}

/// Read a tensor's region back as signed bytes
pub fn read_i8(ctx: &Context, t: &TensorDescriptor) -> Vec<i8> {
    ctx.copy_to_host(t).unwrap().iter().map(|&b| b as i8).collect()
}

/// Fill a tensor with one signed byte value
pub fn fill_i8(ctx: &mut Context, t: &TensorDescriptor, value: i8) {
    let n = t.shape.element_count();
    write_i8(ctx, t, &vec![value; n]);
}

/// Tensor view over a matrix region, honoring its row stride
pub fn mat_view(m: &MatrixDescriptor) -> TensorDescriptor {
    TensorDescriptor {
        start_address: m.start_address,
        shape: Shape::new(1, 1, m.rows, m.cols),
        stride: Stride {
            n: m.rows * m.row_stride,
            c: m.rows * m.row_stride,
            h: m.row_stride,
            w: 1,
        },
        fmt: m.fmt,
    }
}

/// Write signed byte values row by row into a matrix region
pub fn write_mat_i8(ctx: &mut Context, m: &MatrixDescriptor, values: &[i8]) {
    write_i8(ctx, &mat_view(m), values);
}

/// Read a matrix region back as signed bytes, row by row
pub fn read_mat_i8(ctx: &Context, m: &MatrixDescriptor) -> Vec<i8> {
    read_i8(ctx, &mat_view(m))
}

/// Raw byte view over an allocated region
pub fn byte_view(start_address: u32, len: u32) -> TensorDescriptor {
    TensorDescriptor::contiguous(start_address, Shape::new(1, 1, 1, len), Format::U8)
}

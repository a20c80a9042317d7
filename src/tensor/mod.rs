//! Tensor descriptors and operand validation
//!
//! A [`TensorDescriptor`] is pure metadata: shape, stride, base address, and
//! storage format of a 4-D array resident in local memory. Descriptors are
//! created by the context's allocator (address assigned) or built directly
//! for pre-existing operands, and are immutable once handed to an encoder.
//!
//! The validation helpers here are shared by every encoder family: same-shape
//! checks, stride legality (degenerate strides only in per-channel parameter
//! roles), format compatibility, and address-range checks.

use serde::Serialize;

use crate::error::{ForgeResult, NpuForgeError};
use crate::{format_error, shape_error, stride_error};

/// Storage format of one local-memory tensor plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Format {
    /// Signed 8-bit integer
    I8,
    /// Unsigned 8-bit integer
    U8,
    /// Narrow float (bf16), two bytes per element
    Bf16,
}

impl Format {
    /// Bytes per element
    pub fn bytes(&self) -> usize {
        match self {
            Format::I8 | Format::U8 => 1,
            Format::Bf16 => 2,
        }
    }

    /// Whether this is a single-byte integer format
    pub fn is_int8(&self) -> bool {
        matches!(self, Format::I8 | Format::U8)
    }
}

/// 4-D tensor shape, {n, c, h, w}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Shape {
    pub n: u32,
    pub c: u32,
    pub h: u32,
    pub w: u32,
}

impl Shape {
    pub fn new(n: u32, c: u32, h: u32, w: u32) -> Self {
        Self { n, c, h, w }
    }

    /// Total element count
    pub fn element_count(&self) -> usize {
        self.n as usize * self.c as usize * self.h as usize * self.w as usize
    }

    /// All components positive
    pub fn is_valid(&self) -> bool {
        self.n > 0 && self.c > 0 && self.h > 0 && self.w > 0
    }
}

/// Element strides for the four axes
///
/// Strides are in elements, not bytes. A descriptor whose `h` and `w`
/// strides are both zero is degenerate: it carries one value per channel and
/// is legal only in parameter roles (bias, per-channel quantization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stride {
    pub n: u32,
    pub c: u32,
    pub h: u32,
    pub w: u32,
}

impl Stride {
    pub fn new(n: u32, c: u32, h: u32, w: u32) -> Self {
        Self { n, c, h, w }
    }

    /// Contiguous row-major strides for a shape
    pub fn contiguous(shape: &Shape) -> Self {
        Self {
            n: shape.c * shape.h * shape.w,
            c: shape.h * shape.w,
            h: shape.w,
            w: 1,
        }
    }

    /// Degenerate per-channel parameter stride: one value per channel
    pub fn per_channel() -> Self {
        Self { n: 0, c: 1, h: 0, w: 0 }
    }

    /// Whether the spatial strides are zero (per-channel parameter layout)
    pub fn is_degenerate(&self) -> bool {
        self.h == 0 && self.w == 0
    }

    /// Whether every axis stride is positive
    pub fn is_fully_positive(&self) -> bool {
        self.n > 0 && self.c > 0 && self.h > 0 && self.w > 0
    }
}

/// Metadata for a 4-D tensor resident in local memory
///
/// `start_address` is a byte offset from the start of local memory. The
/// descriptor does not own the storage; pairing every allocation with one
/// free is the caller's responsibility, through the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TensorDescriptor {
    pub start_address: u32,
    pub shape: Shape,
    pub stride: Stride,
    pub fmt: Format,
}

impl TensorDescriptor {
    /// Build a descriptor with contiguous strides
    pub fn contiguous(start_address: u32, shape: Shape, fmt: Format) -> Self {
        Self {
            start_address,
            shape,
            stride: Stride::contiguous(&shape),
            fmt,
        }
    }

    /// Contiguous byte size of the shape in this format
    pub fn size_bytes(&self) -> usize {
        self.shape.element_count() * self.fmt.bytes()
    }

    /// Byte footprint spanned by the strided access pattern
    ///
    /// For degenerate strides this is smaller than the contiguous size; the
    /// range check uses whichever region the hardware will actually touch.
    pub fn footprint_bytes(&self) -> usize {
        let last = (self.shape.n as usize - 1) * self.stride.n as usize
            + (self.shape.c as usize - 1) * self.stride.c as usize
            + (self.shape.h as usize - 1) * self.stride.h as usize
            + (self.shape.w as usize - 1) * self.stride.w as usize;
        (last + 1) * self.fmt.bytes()
    }

    /// Element offset of one coordinate under this descriptor's strides
    #[inline]
    pub fn element_offset(&self, n: u32, c: u32, h: u32, w: u32) -> usize {
        n as usize * self.stride.n as usize
            + c as usize * self.stride.c as usize
            + h as usize * self.stride.h as usize
            + w as usize * self.stride.w as usize
    }

    /// Byte address of one coordinate
    #[inline]
    pub fn byte_offset(&self, n: u32, c: u32, h: u32, w: u32) -> usize {
        self.start_address as usize + self.element_offset(n, c, h, w) * self.fmt.bytes()
    }
}

/// A logical signed 16-bit tensor stored as two 8-bit planes
///
/// The engine stores wide values as two independent tensors: a low plane
/// holding the least-significant bits and a high plane holding the
/// sign-carrying most-significant bits. This type validates the pairing once
/// at construction so the encoders never re-check plane agreement, and the
/// split representation stays confined to the command serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Int16Pair {
    low: TensorDescriptor,
    high: TensorDescriptor,
}

impl Int16Pair {
    /// Pair two byte planes into a logical 16-bit tensor
    ///
    /// # Errors
    /// `InvalidShape` / `InvalidStride` if the planes disagree,
    /// `UnsupportedFormat` if either plane is not a single-byte format.
    pub fn new(low: TensorDescriptor, high: TensorDescriptor) -> ForgeResult<Self> {
        if low.shape != high.shape {
            return Err(shape_error!(
                "int16 planes must share shape: low {:?}, high {:?}",
                low.shape,
                high.shape
            ));
        }
        if low.stride != high.stride {
            return Err(stride_error!(
                "int16 planes must share stride: low {:?}, high {:?}",
                low.stride,
                high.stride
            ));
        }
        if !low.fmt.is_int8() || !high.fmt.is_int8() {
            return Err(format_error!("int16 planes must use a single-byte format"));
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> &TensorDescriptor {
        &self.low
    }

    pub fn high(&self) -> &TensorDescriptor {
        &self.high
    }

    pub fn shape(&self) -> &Shape {
        &self.low.shape
    }

    pub fn stride(&self) -> &Stride {
        &self.low.stride
    }
}

/// Matrix operand view for the multiplication encoders
///
/// Rows map to the n axis and columns to the w axis of the underlying
/// storage; `row_stride` is in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatrixDescriptor {
    pub start_address: u32,
    pub rows: u32,
    pub cols: u32,
    pub row_stride: u32,
    pub fmt: Format,
}

impl MatrixDescriptor {
    /// Build a matrix descriptor with a packed row stride
    pub fn packed(start_address: u32, rows: u32, cols: u32, fmt: Format) -> Self {
        Self {
            start_address,
            rows,
            cols,
            row_stride: cols,
            fmt,
        }
    }

    /// Byte footprint of the matrix under its row stride
    pub fn footprint_bytes(&self) -> usize {
        ((self.rows as usize - 1) * self.row_stride as usize + self.cols as usize)
            * self.fmt.bytes()
    }

    /// Byte address of one entry
    #[inline]
    pub fn byte_offset(&self, row: u32, col: u32) -> usize {
        self.start_address as usize
            + (row as usize * self.row_stride as usize + col as usize) * self.fmt.bytes()
    }
}

// ---------------------------------------------------------------------------
// Shared validation rules
// ---------------------------------------------------------------------------

/// Require identical shapes across two operand roles
pub fn check_same_shape(
    role_a: &str,
    a: &TensorDescriptor,
    role_b: &str,
    b: &TensorDescriptor,
) -> ForgeResult<()> {
    if a.shape != b.shape {
        return Err(shape_error!(
            "{} shape {:?} does not match {} shape {:?}",
            role_a,
            a.shape,
            role_b,
            b.shape
        ));
    }
    Ok(())
}

/// Require a well-formed tensor operand in a non-parameter role
///
/// Shape components must be positive and every stride axis positive;
/// degenerate per-channel layouts are rejected here.
pub fn check_tensor_operand(role: &str, t: &TensorDescriptor) -> ForgeResult<()> {
    if !t.shape.is_valid() {
        return Err(shape_error!("{} has a zero shape component: {:?}", role, t.shape));
    }
    if !t.stride.is_fully_positive() {
        return Err(stride_error!(
            "{} requires fully positive strides, got {:?}",
            role,
            t.stride
        ));
    }
    Ok(())
}

/// Require a per-channel parameter operand (bias, quant params, shift bits)
///
/// The descriptor must be degenerate (zero spatial strides) and carry the
/// expected channel count.
pub fn check_param_operand(role: &str, t: &TensorDescriptor, channels: u32) -> ForgeResult<()> {
    if !t.shape.is_valid() {
        return Err(shape_error!("{} has a zero shape component: {:?}", role, t.shape));
    }
    if !t.stride.is_degenerate() {
        return Err(stride_error!(
            "{} must use a degenerate per-channel stride, got {:?}",
            role,
            t.stride
        ));
    }
    if t.shape.c != channels {
        return Err(shape_error!(
            "{} carries {} channels, operation needs {}",
            role,
            t.shape.c,
            channels
        ));
    }
    Ok(())
}

/// Require matching storage formats across two operand roles
pub fn check_same_format(
    role_a: &str,
    a: &TensorDescriptor,
    role_b: &str,
    b: &TensorDescriptor,
) -> ForgeResult<()> {
    if a.fmt != b.fmt {
        return Err(format_error!(
            "{} format {:?} does not match {} format {:?}",
            role_a,
            a.fmt,
            role_b,
            b.fmt
        ));
    }
    Ok(())
}

/// Require a tensor footprint inside the local-memory capacity
pub fn check_range(t: &TensorDescriptor, capacity: usize) -> ForgeResult<()> {
    let size = t.footprint_bytes();
    if t.start_address as usize + size > capacity {
        return Err(NpuForgeError::OutOfRange {
            addr: t.start_address,
            size,
            capacity,
        });
    }
    Ok(())
}

/// Require a matrix footprint inside the local-memory capacity
pub fn check_matrix_range(m: &MatrixDescriptor, capacity: usize) -> ForgeResult<()> {
    if m.rows == 0 || m.cols == 0 {
        return Err(shape_error!("matrix has zero extent: {}x{}", m.rows, m.cols));
    }
    if m.row_stride < m.cols {
        return Err(stride_error!(
            "matrix row stride {} smaller than column count {}",
            m.row_stride,
            m.cols
        ));
    }
    let size = m.footprint_bytes();
    if m.start_address as usize + size > capacity {
        return Err(NpuForgeError::OutOfRange {
            addr: m.start_address,
            size,
            capacity,
        });
    }
    Ok(())
}

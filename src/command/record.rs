//! Structured command records and their packed register image

use serde::Serialize;

use crate::tensor::{Format, Int16Pair, MatrixDescriptor, Shape, Stride, TensorDescriptor};

/// Engine opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum Opcode {
    Add = 0x01,
    Mac = 0x02,
    Max = 0x03,
    Min = 0x04,
    Ge = 0x05,
    And = 0x06,
    Or = 0x07,
    Xor = 0x08,
    AveragePooling = 0x10,
    MaxPooling = 0x11,
    MinPooling = 0x12,
    Convolution = 0x20,
    DepthwiseConvolution = 0x21,
    MatrixMultiply = 0x30,
    MatrixMultiplyQm = 0x31,
    LookupTable = 0x40,
    ArithShift = 0x41,
    Copy = 0x42,
}

/// Snapshot of one tensor operand as the hardware sees it
///
/// Copied out of the caller's descriptor at encode time so a record stays
/// valid even if the caller later rebuilds descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TensorRef {
    pub addr: u32,
    pub shape: Shape,
    pub stride: Stride,
    pub fmt: Format,
}

impl From<&TensorDescriptor> for TensorRef {
    fn from(t: &TensorDescriptor) -> Self {
        Self {
            addr: t.start_address,
            shape: t.shape,
            stride: t.stride,
            fmt: t.fmt,
        }
    }
}

impl TensorRef {
    /// Byte address of one coordinate under the captured strides
    #[inline]
    pub fn byte_offset(&self, n: u32, c: u32, h: u32, w: u32) -> usize {
        self.addr as usize
            + (n as usize * self.stride.n as usize
                + c as usize * self.stride.c as usize
                + h as usize * self.stride.h as usize
                + w as usize * self.stride.w as usize)
                * self.fmt.bytes()
    }
}

/// Snapshot of one matrix operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatrixRef {
    pub addr: u32,
    pub rows: u32,
    pub cols: u32,
    pub row_stride: u32,
    pub fmt: Format,
}

impl From<&MatrixDescriptor> for MatrixRef {
    fn from(m: &MatrixDescriptor) -> Self {
        Self {
            addr: m.start_address,
            rows: m.rows,
            cols: m.cols,
            row_stride: m.row_stride,
            fmt: m.fmt,
        }
    }
}

impl MatrixRef {
    #[inline]
    pub fn byte_offset(&self, row: u32, col: u32) -> usize {
        self.addr as usize
            + (row as usize * self.row_stride as usize + col as usize) * self.fmt.bytes()
    }
}

/// Inline constant standing in for a tensor operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConstOperand {
    pub value: i32,
    pub is_signed: bool,
}

impl ConstOperand {
    pub fn signed(value: i32) -> Self {
        Self { value, is_signed: true }
    }

    pub fn unsigned(value: u32) -> Self {
        Self {
            value: value as i32,
            is_signed: false,
        }
    }
}

/// Window geometry shared by the pooling and convolution families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct KernelGeometry {
    pub kh: u16,
    pub kw: u16,
    pub stride_h: u16,
    pub stride_w: u16,
    pub pad_top: u16,
    pub pad_bottom: u16,
    pub pad_left: u16,
    pub pad_right: u16,
    /// Virtual zero rows/columns inserted between input elements
    pub ins_h: u16,
    pub ins_w: u16,
    /// Trailing insertion counts for boundary handling
    pub ins_last_h: u16,
    pub ins_last_w: u16,
    pub dilation_h: u16,
    pub dilation_w: u16,
}

impl KernelGeometry {
    /// Expanded input extent along one axis after zero insertion and padding
    pub fn expanded_extent(in_extent: u32, ins: u16, ins_last: u16, pad_before: u16, pad_after: u16) -> u32 {
        (in_extent - 1) * (ins as u32 + 1) + ins_last as u32 + 1 + pad_before as u32 + pad_after as u32
    }

    /// Output extent along one axis: floor((expanded - kernel)/stride) + 1
    pub fn output_extent(expanded: u32, kernel: u16, stride: u16) -> Option<u32> {
        if expanded < kernel as u32 || stride == 0 || kernel == 0 {
            return None;
        }
        Some((expanded - kernel as u32) / stride as u32 + 1)
    }
}

/// One hardware operation, fully described
///
/// Field roles vary by opcode; unused slots stay `None`. A record is
/// immutable once appended and lives until the owning buffer is reset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    pub opcode: Opcode,
    /// Diagnostic layer id carried through to the packed image
    pub layer_id: u16,

    // Elementwise / shift / lookup operand slots
    pub a: Option<TensorRef>,
    pub a_high: Option<TensorRef>,
    pub b: Option<TensorRef>,
    pub b_high: Option<TensorRef>,
    pub res: Option<TensorRef>,
    pub res_high: Option<TensorRef>,

    // Convolution / pooling slots
    pub weight: Option<TensorRef>,
    pub bias: Option<TensorRef>,
    pub bias_high: Option<TensorRef>,

    // Lookup table slot
    pub table: Option<TensorRef>,

    // Per-channel shift amounts for the arithmetic shift op
    pub shift_bits: Option<TensorRef>,

    // Matrix multiplication slots
    pub left: Option<MatrixRef>,
    pub right: Option<MatrixRef>,
    pub mat_res: Option<MatrixRef>,
    pub mat_bias: Option<MatrixRef>,

    // Inline constants
    pub b_const: Option<ConstOperand>,
    pub weight_const: Option<ConstOperand>,

    pub kernel: Option<KernelGeometry>,

    // Control flags
    pub relu_enable: bool,
    pub lshift_bits: u8,
    pub rshift_bits: u8,
    /// Accumulate into the existing result instead of overwriting
    pub accumulate: bool,
    /// Result stored at 8 bits even when a high plane is present
    pub res_is_int8: bool,

    /// Fixed average-pooling divisor; `None` divides by the valid tap count
    pub avg_divisor: Option<f32>,
    /// Scalar requantization multiplier (quantized matmul)
    pub multiplier: Option<i32>,
    /// Per-output-channel quantization parameter block
    pub per_channel_quant: Option<TensorRef>,
}

impl CommandRecord {
    /// Empty record for an opcode; encoders fill in the operand slots
    pub fn new(opcode: Opcode, layer_id: u16) -> Self {
        Self {
            opcode,
            layer_id,
            a: None,
            a_high: None,
            b: None,
            b_high: None,
            res: None,
            res_high: None,
            weight: None,
            bias: None,
            bias_high: None,
            table: None,
            shift_bits: None,
            left: None,
            right: None,
            mat_res: None,
            mat_bias: None,
            b_const: None,
            weight_const: None,
            kernel: None,
            relu_enable: false,
            lshift_bits: 0,
            rshift_bits: 0,
            accumulate: false,
            res_is_int8: false,
            avg_divisor: None,
            multiplier: None,
            per_channel_quant: None,
        }
    }

    /// Serialize to the packed register image
    ///
    /// Layout, all little-endian:
    /// - header: opcode u8, flags u8, layer_id u16, lshift u8, rshift u8,
    ///   operand-presence bitmap u16
    /// - one 38-byte slot per present tensor operand, in declaration order:
    ///   addr u32, shape 4 x u32, stride 4 x u32, fmt u8, reserved u8.
    ///   Shape and stride fields carry their full 32-bit width; degenerate
    ///   parameter descriptors routinely exceed a 16-bit stride
    /// - one 20-byte slot per present matrix operand: addr u32, rows u32,
    ///   cols u32, row_stride u32, fmt u8, 3 reserved bytes
    /// - optional constants, geometry, divisor, and multiplier blocks,
    ///   presence driven by the header flags and bitmap
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);

        let mut flags = 0u8;
        if self.relu_enable {
            flags |= 1 << 0;
        }
        if self.accumulate {
            flags |= 1 << 1;
        }
        if self.res_is_int8 {
            flags |= 1 << 2;
        }
        if self.b_const.is_some() {
            flags |= 1 << 3;
        }
        if self.weight_const.is_some() {
            flags |= 1 << 4;
        }
        if self.kernel.is_some() {
            flags |= 1 << 5;
        }
        if self.avg_divisor.is_some() {
            flags |= 1 << 6;
        }
        if self.multiplier.is_some() {
            flags |= 1 << 7;
        }

        out.push(self.opcode as u8);
        out.push(flags);
        out.extend_from_slice(&(self.layer_id).to_le_bytes());
        out.push(self.lshift_bits);
        out.push(self.rshift_bits);

        let tensor_slots = [
            &self.a,
            &self.a_high,
            &self.b,
            &self.b_high,
            &self.res,
            &self.res_high,
            &self.weight,
            &self.bias,
            &self.bias_high,
            &self.table,
            &self.shift_bits,
            &self.per_channel_quant,
        ];
        let matrix_slots = [&self.left, &self.right, &self.mat_res, &self.mat_bias];

        let mut bitmap = 0u16;
        for (i, slot) in tensor_slots.iter().enumerate() {
            if slot.is_some() {
                bitmap |= 1 << i;
            }
        }
        for (i, slot) in matrix_slots.iter().enumerate() {
            if slot.is_some() {
                bitmap |= 1 << (12 + i);
            }
        }
        out.extend_from_slice(&(bitmap).to_le_bytes());

        for slot in tensor_slots.iter().filter_map(|s| s.as_ref()) {
            pack_tensor_ref(&mut out, slot);
        }
        for slot in matrix_slots.iter().filter_map(|s| s.as_ref()) {
            pack_matrix_ref(&mut out, slot);
        }

        if let Some(c) = &self.b_const {
            pack_const(&mut out, c);
        }
        if let Some(c) = &self.weight_const {
            pack_const(&mut out, c);
        }
        if let Some(k) = &self.kernel {
            pack_kernel(&mut out, k);
        }
        if let Some(d) = self.avg_divisor {
            out.extend_from_slice(&(d.to_bits()).to_le_bytes());
        }
        if let Some(m) = self.multiplier {
            out.extend_from_slice(&(m).to_le_bytes());
        }

        out
    }

    /// Capture both planes of a 16-bit pair into the a/a_high slots
    pub fn set_a_pair(&mut self, pair: &Int16Pair) {
        self.a = Some(pair.low().into());
        self.a_high = Some(pair.high().into());
    }

    /// Capture both planes of a 16-bit pair into the b/b_high slots
    pub fn set_b_pair(&mut self, pair: &Int16Pair) {
        self.b = Some(pair.low().into());
        self.b_high = Some(pair.high().into());
    }

    /// Capture both planes of a 16-bit pair into the res/res_high slots
    pub fn set_res_pair(&mut self, pair: &Int16Pair) {
        self.res = Some(pair.low().into());
        self.res_high = Some(pair.high().into());
    }
}

fn pack_tensor_ref(out: &mut Vec<u8>, t: &TensorRef) {
    out.extend_from_slice(&(t.addr).to_le_bytes());
    for v in [t.shape.n, t.shape.c, t.shape.h, t.shape.w] {
        out.extend_from_slice(&(v).to_le_bytes());
    }
    for v in [t.stride.n, t.stride.c, t.stride.h, t.stride.w] {
        out.extend_from_slice(&(v).to_le_bytes());
    }
    out.push(fmt_code(t.fmt));
    out.push(0); // reserved
}

fn pack_matrix_ref(out: &mut Vec<u8>, m: &MatrixRef) {
    out.extend_from_slice(&(m.addr).to_le_bytes());
    out.extend_from_slice(&(m.rows).to_le_bytes());
    out.extend_from_slice(&(m.cols).to_le_bytes());
    out.extend_from_slice(&(m.row_stride).to_le_bytes());
    out.push(fmt_code(m.fmt));
    out.push(0); // reserved
    out.extend_from_slice(&0u16.to_le_bytes()); // reserved
}

fn pack_const(out: &mut Vec<u8>, c: &ConstOperand) {
    out.extend_from_slice(&(c.value).to_le_bytes());
    out.push(c.is_signed as u8);
}

fn pack_kernel(out: &mut Vec<u8>, k: &KernelGeometry) {
    for v in [
        k.kh,
        k.kw,
        k.stride_h,
        k.stride_w,
        k.pad_top,
        k.pad_bottom,
        k.pad_left,
        k.pad_right,
        k.ins_h,
        k.ins_w,
        k.ins_last_h,
        k.ins_last_w,
        k.dilation_h,
        k.dilation_w,
    ] {
        out.extend_from_slice(&(v).to_le_bytes());
    }
}

fn fmt_code(fmt: Format) -> u8 {
    match fmt {
        Format::I8 => 0,
        Format::U8 => 1,
        Format::Bf16 => 2,
    }
}

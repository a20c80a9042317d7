//! Reference executor
//!
//! Interprets command records against the context's local-memory image with
//! the exact arithmetic the numeric module defines. This is the behavioral
//! model the encoders are tested against; it trades speed for being a
//! readable statement of every edge-case rule (saturation, skip-vs-zero
//! window taps, split-plane stores, per-channel requantization).

use byteorder::{ByteOrder, LittleEndian};

use crate::command::{CommandRecord, ConstOperand, MatrixRef, Opcode, TensorRef};
use crate::error::{ForgeResult, NpuForgeError};
use crate::numeric::{
    arith_shift16, bf16_to_f32, f32_to_bf16, join16, left_shift, relu, requantize,
    round_right_shift, sat_i16, sat_i8, sat_u8, split16,
};
use crate::tensor::{Format, Shape};

/// Execute one record against the local-memory image
pub fn execute_record(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    match rec.opcode {
        Opcode::Add | Opcode::Max | Opcode::Min | Opcode::Ge => exec_arith(rec, lmem),
        Opcode::And | Opcode::Or | Opcode::Xor => exec_logic(rec, lmem),
        Opcode::Mac => exec_mac(rec, lmem),
        Opcode::AveragePooling | Opcode::MaxPooling | Opcode::MinPooling => exec_pooling(rec, lmem),
        Opcode::Convolution | Opcode::DepthwiseConvolution => exec_conv(rec, lmem),
        Opcode::MatrixMultiply | Opcode::MatrixMultiplyQm => exec_matmul(rec, lmem),
        Opcode::LookupTable => exec_lookup(rec, lmem),
        Opcode::ArithShift => exec_shift(rec, lmem),
        Opcode::Copy => exec_copy(rec, lmem),
    }
}

// ---------------------------------------------------------------------------
// Memory access helpers
// ---------------------------------------------------------------------------

fn missing(name: &str) -> NpuForgeError {
    NpuForgeError::UnsupportedCommand(format!("record is missing its {} operand", name))
}

fn slot<'a, T>(s: &'a Option<T>, name: &str) -> ForgeResult<&'a T> {
    s.as_ref().ok_or_else(|| missing(name))
}

fn byte_at(lmem: &[u8], off: usize) -> ForgeResult<u8> {
    lmem.get(off).copied().ok_or(NpuForgeError::OutOfRange {
        addr: off as u32,
        size: 1,
        capacity: lmem.len(),
    })
}

fn put_byte(lmem: &mut [u8], off: usize, v: u8) -> ForgeResult<()> {
    let capacity = lmem.len();
    match lmem.get_mut(off) {
        Some(b) => {
            *b = v;
            Ok(())
        }
        None => Err(NpuForgeError::OutOfRange {
            addr: off as u32,
            size: 1,
            capacity,
        }),
    }
}

fn bytes_at<'a>(lmem: &'a [u8], off: usize, len: usize) -> ForgeResult<&'a [u8]> {
    lmem.get(off..off + len).ok_or(NpuForgeError::OutOfRange {
        addr: off as u32,
        size: len,
        capacity: lmem.len(),
    })
}

/// Load one integer element, sign- or zero-extended per format
fn load_int(lmem: &[u8], t: &TensorRef, n: u32, c: u32, h: u32, w: u32) -> ForgeResult<i64> {
    let off = t.byte_offset(n, c, h, w);
    match t.fmt {
        Format::I8 => Ok(byte_at(lmem, off)? as i8 as i64),
        Format::U8 => Ok(byte_at(lmem, off)? as i64),
        Format::Bf16 => Err(NpuForgeError::UnsupportedCommand(
            "integer load from a narrow-float operand".into(),
        )),
    }
}

/// Store one integer element with saturation to the destination format
fn store_int_sat(
    lmem: &mut [u8],
    t: &TensorRef,
    n: u32,
    c: u32,
    h: u32,
    w: u32,
    v: i64,
) -> ForgeResult<()> {
    let off = t.byte_offset(n, c, h, w);
    match t.fmt {
        Format::I8 => put_byte(lmem, off, sat_i8(v) as u8),
        Format::U8 => put_byte(lmem, off, sat_u8(v)),
        Format::Bf16 => Err(NpuForgeError::UnsupportedCommand(
            "integer store to a narrow-float operand".into(),
        )),
    }
}

/// Store one integer element with truncation (bitwise results are exact)
fn store_int_raw(
    lmem: &mut [u8],
    t: &TensorRef,
    n: u32,
    c: u32,
    h: u32,
    w: u32,
    v: i64,
) -> ForgeResult<()> {
    put_byte(lmem, t.byte_offset(n, c, h, w), v as u8)
}

fn load_f32(lmem: &[u8], t: &TensorRef, n: u32, c: u32, h: u32, w: u32) -> ForgeResult<f32> {
    let off = t.byte_offset(n, c, h, w);
    let raw = LittleEndian::read_u16(bytes_at(lmem, off, 2)?);
    Ok(bf16_to_f32(half::bf16::from_bits(raw)))
}

fn store_f32(
    lmem: &mut [u8],
    t: &TensorRef,
    n: u32,
    c: u32,
    h: u32,
    w: u32,
    v: f32,
) -> ForgeResult<()> {
    let off = t.byte_offset(n, c, h, w);
    let capacity = lmem.len();
    let dst = lmem.get_mut(off..off + 2).ok_or(NpuForgeError::OutOfRange {
        addr: off as u32,
        size: 2,
        capacity,
    })?;
    LittleEndian::write_u16(dst, f32_to_bf16(v).to_bits());
    Ok(())
}

/// Load a split 16-bit element from its two planes
fn load_pair(
    lmem: &[u8],
    low: &TensorRef,
    high: &TensorRef,
    n: u32,
    c: u32,
    h: u32,
    w: u32,
) -> ForgeResult<i16> {
    let l = byte_at(lmem, low.byte_offset(n, c, h, w))?;
    let hb = byte_at(lmem, high.byte_offset(n, c, h, w))? as i8;
    Ok(join16(l, hb))
}

fn store_pair(
    lmem: &mut [u8],
    low: &TensorRef,
    high: &TensorRef,
    n: u32,
    c: u32,
    h: u32,
    w: u32,
    v: i16,
) -> ForgeResult<()> {
    let (l, hb) = split16(v);
    put_byte(lmem, low.byte_offset(n, c, h, w), l)?;
    put_byte(lmem, high.byte_offset(n, c, h, w), hb as u8)
}

fn const_int(c: &ConstOperand) -> i64 {
    if c.is_signed {
        c.value as i64
    } else {
        c.value as u32 as i64
    }
}

fn for_each(
    shape: Shape,
    mut f: impl FnMut(u32, u32, u32, u32) -> ForgeResult<()>,
) -> ForgeResult<()> {
    for n in 0..shape.n {
        for c in 0..shape.c {
            for h in 0..shape.h {
                for w in 0..shape.w {
                    f(n, c, h, w)?;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Elementwise arithmetic and compare
// ---------------------------------------------------------------------------

fn exec_arith(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    let a = slot(&rec.a, "a")?;
    let res = slot(&rec.res, "res")?;

    if let (Some(a_high), Some(res_high)) = (&rec.a_high, &rec.res_high) {
        return for_each(res.shape, |n, c, h, w| {
            let av = load_pair(lmem, a, a_high, n, c, h, w)? as i64;
            let bv = match (&rec.b, &rec.b_high, &rec.b_const) {
                (Some(b), Some(b_high), _) => load_pair(lmem, b, b_high, n, c, h, w)? as i64,
                (None, None, Some(c)) => const_int(c),
                _ => return Err(missing("b")),
            };
            let mut v = combine(rec.opcode, av, bv);
            v = round_right_shift(v, rec.rshift_bits);
            if rec.relu_enable {
                v = relu(v);
            }
            store_pair(lmem, res, res_high, n, c, h, w, sat_i16(v))
        });
    }

    if res.fmt == Format::Bf16 {
        return for_each(res.shape, |n, c, h, w| {
            let av = load_f32(lmem, a, n, c, h, w)?;
            let bv = match (&rec.b, &rec.b_const) {
                (Some(b), _) => load_f32(lmem, b, n, c, h, w)?,
                (None, Some(cst)) => cst.value as f32,
                _ => return Err(missing("b")),
            };
            let mut v = match rec.opcode {
                Opcode::Add => av + bv,
                Opcode::Max => av.max(bv),
                Opcode::Min => av.min(bv),
                Opcode::Ge => (av >= bv) as u8 as f32,
                _ => unreachable!("arith dispatch"),
            };
            if rec.relu_enable && v < 0.0 {
                v = 0.0;
            }
            store_f32(lmem, res, n, c, h, w, v)
        });
    }

    for_each(res.shape, |n, c, h, w| {
        let av = load_int(lmem, a, n, c, h, w)?;
        let bv = match (&rec.b, &rec.b_const) {
            (Some(b), _) => load_int(lmem, b, n, c, h, w)?,
            (None, Some(cst)) => const_int(cst),
            _ => return Err(missing("b")),
        };
        let mut v = combine(rec.opcode, av, bv);
        v = round_right_shift(v, rec.rshift_bits);
        if rec.relu_enable {
            v = relu(v);
        }
        store_int_sat(lmem, res, n, c, h, w, v)
    })
}

fn combine(opcode: Opcode, a: i64, b: i64) -> i64 {
    match opcode {
        Opcode::Add => a + b,
        Opcode::Max => a.max(b),
        Opcode::Min => a.min(b),
        Opcode::Ge => (a >= b) as i64,
        _ => unreachable!("arith dispatch"),
    }
}

fn exec_logic(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    let a = slot(&rec.a, "a")?;
    let res = slot(&rec.res, "res")?;
    let op = |a: i64, b: i64| match rec.opcode {
        Opcode::And => a & b,
        Opcode::Or => a | b,
        Opcode::Xor => a ^ b,
        _ => unreachable!("logic dispatch"),
    };

    if let (Some(a_high), Some(res_high)) = (&rec.a_high, &rec.res_high) {
        return for_each(res.shape, |n, c, h, w| {
            let av = load_pair(lmem, a, a_high, n, c, h, w)? as i64;
            let bv = match (&rec.b, &rec.b_high, &rec.b_const) {
                (Some(b), Some(b_high), _) => load_pair(lmem, b, b_high, n, c, h, w)? as i64,
                (None, None, Some(cst)) => const_int(cst),
                _ => return Err(missing("b")),
            };
            store_pair(lmem, res, res_high, n, c, h, w, op(av, bv) as i16)
        });
    }

    for_each(res.shape, |n, c, h, w| {
        let av = load_int(lmem, a, n, c, h, w)?;
        let bv = match (&rec.b, &rec.b_const) {
            (Some(b), _) => load_int(lmem, b, n, c, h, w)?,
            (None, Some(cst)) => const_int(cst),
            _ => return Err(missing("b")),
        };
        store_int_raw(lmem, res, n, c, h, w, op(av, bv))
    })
}

// ---------------------------------------------------------------------------
// Multiply-accumulate
// ---------------------------------------------------------------------------

fn exec_mac(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    let a = slot(&rec.a, "a")?;
    let res = slot(&rec.res, "res")?;

    if res.fmt == Format::Bf16 {
        return for_each(res.shape, |n, c, h, w| {
            let av = load_f32(lmem, a, n, c, h, w)?;
            let bv = match (&rec.b, &rec.b_const) {
                (Some(b), _) => load_f32(lmem, b, n, c, h, w)?,
                (None, Some(cst)) => cst.value as f32,
                _ => return Err(missing("b")),
            };
            let prev = load_f32(lmem, res, n, c, h, w)?;
            let mut v = av * bv + prev;
            if rec.relu_enable && v < 0.0 {
                v = 0.0;
            }
            store_f32(lmem, res, n, c, h, w, v)
        });
    }

    for_each(res.shape, |n, c, h, w| {
        let av = load_int(lmem, a, n, c, h, w)?;
        let bv = match (&rec.b, &rec.b_const) {
            (Some(b), _) => load_int(lmem, b, n, c, h, w)?,
            (None, Some(cst)) => const_int(cst),
            _ => return Err(missing("b")),
        };
        let prev = match &rec.res_high {
            Some(res_high) => load_pair(lmem, res, res_high, n, c, h, w)? as i64,
            None => load_int(lmem, res, n, c, h, w)?,
        };
        let mut acc = left_shift(av * bv, rec.lshift_bits) + prev;
        acc = round_right_shift(acc, rec.rshift_bits);
        if rec.relu_enable {
            acc = relu(acc);
        }
        match &rec.res_high {
            Some(res_high) if rec.res_is_int8 => {
                // Narrow result is mirrored into both planes
                let v = sat_i8(acc);
                put_byte(lmem, res.byte_offset(n, c, h, w), v as u8)?;
                put_byte(lmem, res_high.byte_offset(n, c, h, w), v as u8)
            }
            Some(res_high) => store_pair(lmem, res, res_high, n, c, h, w, sat_i16(acc)),
            None => store_int_sat(lmem, res, n, c, h, w, acc),
        }
    })
}

// ---------------------------------------------------------------------------
// Windowed operations
// ---------------------------------------------------------------------------

/// Classification of one expanded-grid position along one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tap {
    /// In the padding margin: skipped by max/min, zero for the others
    Pad,
    /// An inserted zero between real elements
    Zero,
    /// A real input element at this index
    In(u32),
}

/// Map an expanded-grid coordinate back onto the input axis
fn classify_tap(e: u32, pad_before: u16, ins: u16, ins_last: u16, in_extent: u32) -> Tap {
    if e < pad_before as u32 {
        return Tap::Pad;
    }
    let p = e - pad_before as u32;
    let logical = (in_extent - 1) * (ins as u32 + 1) + ins_last as u32 + 1;
    if p >= logical {
        return Tap::Pad;
    }
    let period = ins as u32 + 1;
    if p % period != 0 {
        return Tap::Zero;
    }
    let i = p / period;
    if i >= in_extent {
        Tap::Zero
    } else {
        Tap::In(i)
    }
}

fn exec_pooling(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    let ifmap = slot(&rec.a, "ifmap")?;
    let ofmap = slot(&rec.res, "ofmap")?;
    let k = slot(&rec.kernel, "kernel geometry")?;
    let float = ofmap.fmt == Format::Bf16;

    for_each(ofmap.shape, |n, c, oh, ow| {
        let mut sum_i = 0i64;
        let mut sum_f = 0f32;
        let mut best: Option<i64> = None;
        let mut best_f: Option<f32> = None;
        let mut valid = 0u32;

        for kh in 0..k.kh as u32 {
            for kw in 0..k.kw as u32 {
                let eh = oh * k.stride_h as u32 + kh;
                let ew = ow * k.stride_w as u32 + kw;
                let th = classify_tap(eh, k.pad_top, k.ins_h, k.ins_last_h, ifmap.shape.h);
                let tw = classify_tap(ew, k.pad_left, k.ins_w, k.ins_last_w, ifmap.shape.w);
                if th == Tap::Pad || tw == Tap::Pad {
                    continue;
                }
                valid += 1;
                let (iv, fv) = match (th, tw) {
                    (Tap::In(ih), Tap::In(iw)) => {
                        if float {
                            (0, load_f32(lmem, ifmap, n, c, ih, iw)?)
                        } else {
                            (load_int(lmem, ifmap, n, c, ih, iw)?, 0.0)
                        }
                    }
                    // An inserted zero is a real tap of value zero
                    _ => (0, 0.0),
                };
                sum_i += iv;
                sum_f += fv;
                best = Some(best.map_or(iv, |b| match rec.opcode {
                    Opcode::MinPooling => b.min(iv),
                    _ => b.max(iv),
                }));
                best_f = Some(best_f.map_or(fv, |b| match rec.opcode {
                    Opcode::MinPooling => b.min(fv),
                    _ => b.max(fv),
                }));
            }
        }

        match rec.opcode {
            Opcode::AveragePooling => {
                let divisor = rec.avg_divisor.unwrap_or(valid.max(1) as f32);
                if float {
                    store_f32(lmem, ofmap, n, c, oh, ow, sum_f / divisor)
                } else {
                    let v = (sum_i as f32 / divisor).round() as i64;
                    store_int_sat(lmem, ofmap, n, c, oh, ow, v)
                }
            }
            _ => {
                if float {
                    store_f32(lmem, ofmap, n, c, oh, ow, best_f.unwrap_or(0.0))
                } else {
                    store_int_sat(lmem, ofmap, n, c, oh, ow, best.unwrap_or(0))
                }
            }
        }
    })
}

fn exec_conv(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    let ifmap = slot(&rec.a, "ifmap")?;
    let ofmap = slot(&rec.res, "ofmap")?;
    let k = slot(&rec.kernel, "kernel geometry")?;
    let depthwise = rec.opcode == Opcode::DepthwiseConvolution;

    for_each(ofmap.shape, |n, oc, oh, ow| {
        let mut acc = 0i64;
        for kh in 0..k.kh as u32 {
            for kw in 0..k.kw as u32 {
                let eh = oh * k.stride_h as u32 + kh * k.dilation_h as u32;
                let ew = ow * k.stride_w as u32 + kw * k.dilation_w as u32;
                let th = classify_tap(eh, k.pad_top, k.ins_h, k.ins_last_h, ifmap.shape.h);
                let tw = classify_tap(ew, k.pad_left, k.ins_w, k.ins_last_w, ifmap.shape.w);
                // Padding and inserted zeros both contribute zero here
                let (ih, iw) = match (th, tw) {
                    (Tap::In(ih), Tap::In(iw)) => (ih, iw),
                    _ => continue,
                };
                acc += conv_taps(rec, lmem, ifmap, depthwise, n, oc, ih, iw, kh, kw)?;
            }
        }
        if let (Some(bias), Some(bias_high)) = (&rec.bias, &rec.bias_high) {
            acc += load_pair(lmem, bias, bias_high, 0, oc, 0, 0)? as i64;
        }
        // Chained partial sums live in the wide pair; a saturated narrow
        // result is never read back as a partial sum
        if rec.accumulate {
            let high = slot(&rec.res_high, "partial-sum high plane")?;
            acc += load_pair(lmem, ofmap, high, n, oc, oh, ow)? as i64;
        }
        match &rec.res_high {
            // Intermediate pass: park the raw sum, shift and ReLU wait for
            // the finalizing pass
            Some(high) if !rec.res_is_int8 => {
                store_pair(lmem, ofmap, high, n, oc, oh, ow, sat_i16(acc))
            }
            Some(high) => {
                acc = round_right_shift(acc, rec.rshift_bits);
                if rec.relu_enable {
                    acc = relu(acc);
                }
                let v = sat_i8(acc);
                put_byte(lmem, ofmap.byte_offset(n, oc, oh, ow), v as u8)?;
                put_byte(lmem, high.byte_offset(n, oc, oh, ow), v as u8)
            }
            None => {
                acc = round_right_shift(acc, rec.rshift_bits);
                if rec.relu_enable {
                    acc = relu(acc);
                }
                store_int_sat(lmem, ofmap, n, oc, oh, ow, acc)
            }
        }
    })
}

/// Accumulate all input-channel contributions for one window tap
#[allow(clippy::too_many_arguments)]
fn conv_taps(
    rec: &CommandRecord,
    lmem: &[u8],
    ifmap: &TensorRef,
    depthwise: bool,
    n: u32,
    oc: u32,
    ih: u32,
    iw: u32,
    kh: u32,
    kw: u32,
) -> ForgeResult<i64> {
    if depthwise {
        let weight = slot(&rec.weight, "weight")?;
        let wv = load_int(lmem, weight, 0, oc, kh, kw)?;
        return Ok(load_int(lmem, ifmap, n, oc, ih, iw)? * wv);
    }
    let mut acc = 0i64;
    match (&rec.weight, &rec.weight_const) {
        (Some(weight), _) => {
            for ic in 0..ifmap.shape.c {
                let wv = load_int(lmem, weight, oc, ic, kh, kw)?;
                acc += load_int(lmem, ifmap, n, ic, ih, iw)? * wv;
            }
        }
        (None, Some(cst)) => {
            let wv = const_int(cst);
            for ic in 0..ifmap.shape.c {
                acc += load_int(lmem, ifmap, n, ic, ih, iw)? * wv;
            }
        }
        (None, None) => return Err(missing("weight")),
    }
    Ok(acc)
}

// ---------------------------------------------------------------------------
// Matrix multiplication
// ---------------------------------------------------------------------------

fn load_mat_int(lmem: &[u8], m: &MatrixRef, row: u32, col: u32) -> ForgeResult<i64> {
    let off = m.byte_offset(row, col);
    match m.fmt {
        Format::I8 => Ok(byte_at(lmem, off)? as i8 as i64),
        Format::U8 => Ok(byte_at(lmem, off)? as i64),
        Format::Bf16 => Err(NpuForgeError::UnsupportedCommand(
            "integer load from a narrow-float matrix".into(),
        )),
    }
}

fn exec_matmul(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    let left = slot(&rec.left, "left")?;
    let right = slot(&rec.right, "right")?;
    let res = slot(&rec.mat_res, "result")?;
    let quantized = rec.opcode == Opcode::MatrixMultiplyQm;

    for i in 0..res.rows {
        for j in 0..res.cols {
            let mut acc = 0i64;
            for k in 0..left.cols {
                acc += load_mat_int(lmem, left, i, k)? * load_mat_int(lmem, right, k, j)?;
            }
            if let Some(bias) = &rec.mat_bias {
                acc += if bias.rows == 2 {
                    // Two rows carry a split 16-bit value: low then high
                    let l = byte_at(lmem, bias.byte_offset(0, j))?;
                    let hb = byte_at(lmem, bias.byte_offset(1, j))? as i8;
                    join16(l, hb) as i64
                } else {
                    load_mat_int(lmem, bias, 0, j)?
                };
            }
            if rec.accumulate {
                acc += load_mat_int(lmem, res, i, j)?;
            }

            if quantized {
                acc = match &rec.per_channel_quant {
                    Some(block) => {
                        let entry = block.addr as usize + (j * block.stride.c) as usize;
                        let raw = bytes_at(lmem, entry, 5)?;
                        let multiplier = LittleEndian::read_i32(&raw[0..4]);
                        requantize(acc, multiplier, raw[4])
                    }
                    None => {
                        let multiplier = rec.multiplier.ok_or_else(|| missing("multiplier"))?;
                        requantize(acc, multiplier, rec.rshift_bits)
                    }
                };
            } else {
                acc = left_shift(acc, rec.lshift_bits);
                acc = round_right_shift(acc, rec.rshift_bits);
            }
            if rec.relu_enable {
                acc = relu(acc);
            }

            let off = res.byte_offset(i, j);
            match res.fmt {
                Format::I8 => put_byte(lmem, off, sat_i8(acc) as u8)?,
                Format::U8 => put_byte(lmem, off, sat_u8(acc))?,
                Format::Bf16 => {
                    return Err(NpuForgeError::UnsupportedCommand(
                        "integer store to a narrow-float matrix".into(),
                    ))
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lookup, shift, copy
// ---------------------------------------------------------------------------

/// Decompose a linear element index into table coordinates, w fastest
fn linear_coords(shape: Shape, idx: u32) -> (u32, u32, u32, u32) {
    let w = idx % shape.w;
    let rest = idx / shape.w;
    let h = rest % shape.h;
    let rest = rest / shape.h;
    let c = rest % shape.c;
    (rest / shape.c, c, h, w)
}

fn exec_lookup(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    let ifmap = slot(&rec.a, "ifmap")?;
    let ofmap = slot(&rec.res, "ofmap")?;
    let table = slot(&rec.table, "table")?;
    let eb = table.fmt.bytes();

    for_each(ifmap.shape, |n, c, h, w| {
        // Indices are always unsigned over the full byte domain
        let idx = byte_at(lmem, ifmap.byte_offset(n, c, h, w))? as u32;
        let (tn, tc, th, tw) = linear_coords(table.shape, idx);
        let src = table.byte_offset(tn, tc, th, tw);
        let dst = ofmap.byte_offset(n, c, h, w);
        for k in 0..eb {
            let v = byte_at(lmem, src + k)?;
            put_byte(lmem, dst + k, v)?;
        }
        Ok(())
    })
}

fn exec_shift(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    let a = slot(&rec.a, "a")?;
    let a_high = slot(&rec.a_high, "a high plane")?;
    let res = slot(&rec.res, "res")?;
    let res_high = slot(&rec.res_high, "res high plane")?;
    let bits = slot(&rec.shift_bits, "shift bits")?;

    for_each(res.shape, |n, c, h, w| {
        let v = load_pair(lmem, a, a_high, n, c, h, w)?;
        let count = byte_at(lmem, bits.byte_offset(0, c, 0, 0))? as i8;
        store_pair(lmem, res, res_high, n, c, h, w, arith_shift16(v, count))
    })
}

fn exec_copy(rec: &CommandRecord, lmem: &mut [u8]) -> ForgeResult<()> {
    let src = slot(&rec.a, "src")?;
    let dst = slot(&rec.res, "dst")?;
    let eb = src.fmt.bytes();

    for_each(src.shape, |n, c, h, w| {
        let s = src.byte_offset(n, c, h, w);
        let d = dst.byte_offset(n, c, h, w);
        for k in 0..eb {
            let v = byte_at(lmem, s + k)?;
            put_byte(lmem, d + k, v)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_tap_plain() {
        // No pad, no insertion: identity
        assert_eq!(classify_tap(0, 0, 0, 0, 4), Tap::In(0));
        assert_eq!(classify_tap(3, 0, 0, 0, 4), Tap::In(3));
    }

    #[test]
    fn test_classify_tap_padding() {
        // pad_before 1, extent 4: positions 0 and 5+ are padding
        assert_eq!(classify_tap(0, 1, 0, 0, 4), Tap::Pad);
        assert_eq!(classify_tap(1, 1, 0, 0, 4), Tap::In(0));
        assert_eq!(classify_tap(4, 1, 0, 0, 4), Tap::In(3));
        assert_eq!(classify_tap(5, 1, 0, 0, 4), Tap::Pad);
    }

    #[test]
    fn test_classify_tap_insertion() {
        // ins 1: real elements land on even positions
        assert_eq!(classify_tap(0, 0, 1, 0, 4), Tap::In(0));
        assert_eq!(classify_tap(1, 0, 1, 0, 4), Tap::Zero);
        assert_eq!(classify_tap(2, 0, 1, 0, 4), Tap::In(1));
        assert_eq!(classify_tap(6, 0, 1, 0, 4), Tap::In(3));
    }

    #[test]
    fn test_classify_tap_insertion_inside_padding() {
        // Insertion happens first, padding surrounds the expanded grid
        assert_eq!(classify_tap(0, 2, 1, 0, 3), Tap::Pad);
        assert_eq!(classify_tap(2, 2, 1, 0, 3), Tap::In(0));
        assert_eq!(classify_tap(3, 2, 1, 0, 3), Tap::Zero);
        assert_eq!(classify_tap(7, 2, 1, 0, 3), Tap::Pad);
    }

    #[test]
    fn test_linear_coords() {
        let shape = Shape::new(1, 1, 16, 16);
        assert_eq!(linear_coords(shape, 0), (0, 0, 0, 0));
        assert_eq!(linear_coords(shape, 17), (0, 0, 1, 1));
        assert_eq!(linear_coords(shape, 255), (0, 0, 15, 15));
    }
}

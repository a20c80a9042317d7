//! Context: device binding, tensor lifecycle, and command buffer ownership
//!
//! A [`Context`] binds the device parameters, the local-memory allocator, and
//! the open command buffer. It is the unit of allocation and submission, and
//! it owns the simulated local-memory image the host-transfer calls and the
//! reference executor operate on. One context means one logical thread of
//! control; independent contexts need no coordination.

use crate::command::{CommandBuffer, CommandRecord};
use crate::config::DeviceInfo;
use crate::error::{ForgeResult, NpuForgeError};
use crate::exec;
use crate::memory::LocalMemoryArena;
use crate::tensor::{Format, Int16Pair, MatrixDescriptor, Shape, TensorDescriptor};

/// Device binding plus all per-context mutable state
#[derive(Debug)]
pub struct Context {
    info: DeviceInfo,
    arena: LocalMemoryArena,
    cmdbuf: CommandBuffer,
    /// Simulated local-memory transport for host transfer and execution
    lmem: Vec<u8>,
}

impl Context {
    /// Create a context bound to the given device info
    ///
    /// # Errors
    /// `InvalidConfiguration` if the device info fails validation; the
    /// context is never partially constructed.
    pub fn new(info: DeviceInfo) -> ForgeResult<Self> {
        info.validate()?;
        let arena = LocalMemoryArena::new(info.lmem_size)?;
        tracing::info!(
            "context created: lmem={} bytes, eu={}, npu={}, banks={}",
            info.lmem_size,
            info.eu_num,
            info.npu_num,
            info.lmem_banks
        );
        Ok(Self {
            info,
            arena,
            cmdbuf: CommandBuffer::new(),
            lmem: vec![0u8; info.lmem_size],
        })
    }

    /// Create a context with the default device profile
    pub fn with_defaults() -> ForgeResult<Self> {
        Self::new(DeviceInfo::default())
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Local-memory capacity in bytes
    pub fn capacity(&self) -> usize {
        self.info.lmem_size
    }

    // -----------------------------------------------------------------
    // Tensor lifecycle
    // -----------------------------------------------------------------

    /// Allocate local memory for a tensor and return its descriptor
    ///
    /// The descriptor has contiguous strides and the assigned address. With
    /// `eu_align` the address and size round to the execution-unit
    /// granularity.
    pub fn alloc_tensor(
        &mut self,
        shape: Shape,
        fmt: Format,
        eu_align: bool,
    ) -> ForgeResult<TensorDescriptor> {
        if !shape.is_valid() {
            return Err(NpuForgeError::InvalidAllocation(format!(
                "shape components must be positive: {:?}",
                shape
            )));
        }
        let raw = shape.element_count() * fmt.bytes();
        let alignment = if eu_align { self.info.eu_alignment() } else { 1 };
        let size = raw.div_ceil(alignment) * alignment;
        let addr = self.arena.alloc(size, alignment)?;
        Ok(TensorDescriptor::contiguous(addr, shape, fmt))
    }

    /// Allocate both planes of a logical 16-bit tensor
    pub fn alloc_int16(&mut self, shape: Shape, eu_align: bool) -> ForgeResult<Int16Pair> {
        let low = self.alloc_tensor(shape, Format::I8, eu_align)?;
        let high = match self.alloc_tensor(shape, Format::I8, eu_align) {
            Ok(high) => high,
            Err(e) => {
                // Keep alloc/free pairing intact when the second plane fails
                self.arena.free(low.start_address)?;
                return Err(e);
            }
        };
        Int16Pair::new(low, high)
    }

    /// Allocate local memory for a matrix operand
    ///
    /// Rows are padded to the execution-unit granularity when `eu_align` is
    /// set, which widens the row stride past the column count.
    pub fn alloc_matrix(
        &mut self,
        rows: u32,
        cols: u32,
        fmt: Format,
        eu_align: bool,
    ) -> ForgeResult<MatrixDescriptor> {
        if rows == 0 || cols == 0 {
            return Err(NpuForgeError::InvalidAllocation(format!(
                "matrix extents must be positive: {}x{}",
                rows, cols
            )));
        }
        let alignment = if eu_align { self.info.eu_alignment() } else { 1 };
        let row_bytes = (cols as usize * fmt.bytes()).div_ceil(alignment) * alignment;
        let addr = self.arena.alloc(row_bytes * rows as usize, alignment)?;
        Ok(MatrixDescriptor {
            start_address: addr,
            rows,
            cols,
            row_stride: (row_bytes / fmt.bytes()) as u32,
            fmt,
        })
    }

    /// Free a matrix operand's local memory
    pub fn free_matrix(&mut self, m: &MatrixDescriptor) -> ForgeResult<()> {
        self.arena.free(m.start_address)
    }

    /// Free a tensor's local memory
    ///
    /// # Errors
    /// `InvalidHandle` if the descriptor's address is not a live allocation.
    pub fn free_tensor(&mut self, t: &TensorDescriptor) -> ForgeResult<()> {
        self.arena.free(t.start_address)
    }

    /// Free both planes of a 16-bit pair
    pub fn free_int16(&mut self, pair: &Int16Pair) -> ForgeResult<()> {
        self.arena.free(pair.low().start_address)?;
        self.arena.free(pair.high().start_address)
    }

    pub fn arena(&self) -> &LocalMemoryArena {
        &self.arena
    }

    // -----------------------------------------------------------------
    // Host transfer (simulated transport)
    // -----------------------------------------------------------------

    /// Copy host bytes into the tensor's local-memory region
    ///
    /// The host buffer is the tensor's contiguous image; the copy honors the
    /// descriptor's strides on the device side.
    pub fn copy_to_device(&mut self, t: &TensorDescriptor, host: &[u8]) -> ForgeResult<()> {
        let expected = t.size_bytes();
        if host.len() != expected {
            return Err(NpuForgeError::TransferSizeMismatch {
                host: host.len(),
                tensor: expected,
            });
        }
        crate::tensor::check_range(t, self.info.lmem_size)?;

        let eb = t.fmt.bytes();
        let mut src = 0usize;
        for n in 0..t.shape.n {
            for c in 0..t.shape.c {
                for h in 0..t.shape.h {
                    for w in 0..t.shape.w {
                        let dst = t.byte_offset(n, c, h, w);
                        self.lmem[dst..dst + eb].copy_from_slice(&host[src..src + eb]);
                        src += eb;
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy the tensor's local-memory region back to a contiguous host image
    pub fn copy_to_host(&self, t: &TensorDescriptor) -> ForgeResult<Vec<u8>> {
        crate::tensor::check_range(t, self.info.lmem_size)?;
        let eb = t.fmt.bytes();
        let mut out = Vec::with_capacity(t.size_bytes());
        for n in 0..t.shape.n {
            for c in 0..t.shape.c {
                for h in 0..t.shape.h {
                    for w in 0..t.shape.w {
                        let src = t.byte_offset(n, c, h, w);
                        out.extend_from_slice(&self.lmem[src..src + eb]);
                    }
                }
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------
    // Command buffer
    // -----------------------------------------------------------------

    /// The open command buffer, for inspection or external submission
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.cmdbuf
    }

    /// Explicitly roll the buffer back to `len` records
    pub fn truncate_commands(&mut self, len: usize) {
        self.cmdbuf.truncate(len);
    }

    /// Append a validated record (encoder internal)
    pub(crate) fn append_record(&mut self, record: CommandRecord) {
        self.cmdbuf.append(record);
    }

    /// Execute every buffered record against the simulated local memory
    ///
    /// Stands in for driver submission plus wait-for-completion. The buffer
    /// is left intact; call [`Context::reset_commands`] to reuse it.
    pub fn execute(&mut self) -> ForgeResult<usize> {
        for record in self.cmdbuf.records() {
            exec::execute_record(record, &mut self.lmem)?;
        }
        Ok(self.cmdbuf.len())
    }

    /// Drop all buffered records after submission
    pub fn reset_commands(&mut self) {
        self.cmdbuf.reset();
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Release all allocations and buffered commands
    pub fn reset(&mut self) {
        self.arena.reset();
        self.cmdbuf.reset();
        self.lmem.fill(0);
        tracing::info!("context reset");
    }

    /// Tear the context down; safe to call after a prior reset
    pub fn cleanup(&mut self) {
        self.reset();
    }

    /// Raw view of the simulated local memory (test support)
    pub fn lmem(&self) -> &[u8] {
        &self.lmem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_with_defaults() {
        let ctx = Context::with_defaults().unwrap();
        assert_eq!(ctx.capacity(), 32768);
        assert!(ctx.command_buffer().is_empty());
    }

    #[test]
    fn test_bad_config_rejected() {
        let info = DeviceInfo {
            lmem_size: 0,
            ..DeviceInfo::default()
        };
        assert!(matches!(
            Context::new(info).unwrap_err(),
            NpuForgeError::InvalidConfiguration(_)
        ));
    }

    #[test]
    fn test_alloc_assigns_contiguous_strides() {
        let mut ctx = Context::with_defaults().unwrap();
        let shape = Shape::new(1, 4, 4, 4);
        let t = ctx.alloc_tensor(shape, Format::I8, true).unwrap();
        assert_eq!(t.shape, shape);
        assert_eq!(t.stride.w, 1);
        assert_eq!(t.stride.h, 4);
        assert_eq!(t.start_address % 16, 0);
    }

    #[test]
    fn test_alloc_free_pairing() {
        let mut ctx = Context::with_defaults().unwrap();
        let t = ctx.alloc_tensor(Shape::new(1, 1, 16, 16), Format::I8, true).unwrap();
        assert_eq!(ctx.arena().live_count(), 1);
        ctx.free_tensor(&t).unwrap();
        assert_eq!(ctx.arena().live_count(), 0);
        assert!(ctx.free_tensor(&t).is_err());
    }

    #[test]
    fn test_int16_pair_allocation() {
        let mut ctx = Context::with_defaults().unwrap();
        let pair = ctx.alloc_int16(Shape::new(1, 4, 4, 4), true).unwrap();
        assert_ne!(pair.low().start_address, pair.high().start_address);
        assert_eq!(ctx.arena().live_count(), 2);
        ctx.free_int16(&pair).unwrap();
        assert_eq!(ctx.arena().live_count(), 0);
    }

    #[test]
    fn test_host_round_trip() {
        let mut ctx = Context::with_defaults().unwrap();
        let t = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let data: Vec<u8> = (0..16).collect();
        ctx.copy_to_device(&t, &data).unwrap();
        assert_eq!(ctx.copy_to_host(&t).unwrap(), data);
    }

    #[test]
    fn test_transfer_size_mismatch() {
        let mut ctx = Context::with_defaults().unwrap();
        let t = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        let err = ctx.copy_to_device(&t, &[0u8; 3]).unwrap_err();
        assert!(matches!(err, NpuForgeError::TransferSizeMismatch { .. }));
    }

    #[test]
    fn test_reset_then_cleanup_is_safe() {
        let mut ctx = Context::with_defaults().unwrap();
        let _ = ctx.alloc_tensor(Shape::new(1, 1, 4, 4), Format::I8, true).unwrap();
        ctx.reset();
        ctx.cleanup();
        assert_eq!(ctx.arena().live_count(), 0);
    }
}

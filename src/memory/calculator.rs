//! Pre-flight local-memory sizing
//!
//! Computes the exact footprint of a set of tensors before any allocation
//! occurs, so a layer's working set can be rejected up front instead of
//! failing halfway through a sequence of allocations.

use crate::tensor::{Format, Shape};

/// Accumulates tensor footprints against the local-memory capacity
///
/// # Example
/// ```ignore
/// let mut calc = MemoryCalculator::new(32768, 16);
/// calc.add_tensor("ifmap", &Shape::new(1, 4, 16, 16), Format::I8, true);
/// calc.add_tensor("ofmap", &Shape::new(1, 4, 16, 16), Format::I8, true);
/// assert!(calc.fits());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCalculator {
    entries: Vec<(String, usize)>,
    capacity: usize,
    eu_alignment: usize,
}

impl MemoryCalculator {
    /// Create a calculator for a capacity and execution-unit alignment
    pub fn new(capacity: usize, eu_alignment: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            eu_alignment,
        }
    }

    /// Byte size of one tensor: element count times format width, rounded
    /// up to the alignment granularity when alignment is requested
    pub fn tensor_bytes(&self, shape: &Shape, fmt: Format, eu_align: bool) -> usize {
        let raw = shape.element_count() * fmt.bytes();
        if eu_align {
            raw.div_ceil(self.eu_alignment) * self.eu_alignment
        } else {
            raw
        }
    }

    /// Add a tensor to the running total
    pub fn add_tensor(&mut self, name: &str, shape: &Shape, fmt: Format, eu_align: bool) {
        let bytes = self.tensor_bytes(shape, fmt, eu_align);
        self.entries.push((name.to_string(), bytes));
    }

    /// Total bytes across all added tensors
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|(_, b)| b).sum()
    }

    /// Whether the running total fits the capacity
    pub fn fits(&self) -> bool {
        self.total_bytes() <= self.capacity
    }

    /// Log the per-tensor breakdown at debug level
    pub fn log_breakdown(&self) {
        for (name, bytes) in &self.entries {
            tracing::debug!("lmem plan: {} = {} bytes", name, bytes);
        }
        tracing::debug!(
            "lmem plan total: {} / {} bytes",
            self.total_bytes(),
            self.capacity
        );
    }
}

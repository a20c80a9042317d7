//! Unified error handling for npuforge
//!
//! This module provides a centralized error type that consolidates the
//! domain-specific failures of the encoding layer. It implements error
//! categorization for:
//! - Configuration errors (bad device info, fatal for the context)
//! - Allocation errors (local-memory exhaustion, bad frees — recoverable)
//! - Validation errors (operand rejection by an encoder — recoverable)

use std::fmt;

/// Unified error type for npuforge
///
/// Saturation and wraparound are never represented here; they are defined
/// numeric outcomes, not failures. An encoder that returns an error has
/// appended nothing to the command buffer.
#[derive(Debug, thiserror::Error)]
pub enum NpuForgeError {
    // ========== Configuration Errors ==========
    /// Device info rejected at context creation
    #[error("invalid device configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Allocation Errors ==========
    /// No free local-memory region large enough for the request
    #[error("local memory exhausted: need {needed} bytes, {free} free")]
    OutOfMemory { needed: usize, free: usize },

    /// Free of an address the allocator does not consider live
    #[error("invalid local-memory handle: address {0:#x}")]
    InvalidHandle(u32),

    /// Zero-sized or otherwise degenerate allocation request
    #[error("invalid allocation request: {0}")]
    InvalidAllocation(String),

    // ========== Validation Errors ==========
    /// Operand shapes incompatible for the requested operation
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Degenerate or non-positive stride in a role that forbids it
    #[error("invalid stride: {0}")]
    InvalidStride(String),

    /// Tensor footprint extends past the local-memory capacity
    #[error("address out of range: {addr:#x} + {size} bytes exceeds capacity {capacity}")]
    OutOfRange {
        addr: u32,
        size: usize,
        capacity: usize,
    },

    /// Storage format not accepted by this operand role
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Control parameters inconsistent with the requested operation
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    // ========== Transfer Errors ==========
    /// Host buffer length does not match the tensor footprint
    #[error("host transfer size mismatch: host {host} bytes, tensor {tensor} bytes")]
    TransferSizeMismatch { host: usize, tensor: usize },

    // ========== Execution Errors ==========
    /// Reference executor met a record it cannot interpret
    #[error("unsupported command record: {0}")]
    UnsupportedCommand(String),
}

/// Result type alias used throughout the crate
pub type ForgeResult<T> = Result<T, NpuForgeError>;

/// Error category for triage and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fatal at context creation; the context is unusable
    Configuration,
    /// Local-memory management failure; caller may free and retry
    Allocation,
    /// Operand rejection; nothing was emitted
    Validation,
    /// Host transfer failure
    Transfer,
    /// Reference-executor failure
    Execution,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "Configuration"),
            ErrorCategory::Allocation => write!(f, "Allocation"),
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::Transfer => write!(f, "Transfer"),
            ErrorCategory::Execution => write!(f, "Execution"),
        }
    }
}

impl NpuForgeError {
    /// Categorize this error for triage
    pub fn category(&self) -> ErrorCategory {
        match self {
            NpuForgeError::InvalidConfiguration(_) => ErrorCategory::Configuration,
            NpuForgeError::OutOfMemory { .. }
            | NpuForgeError::InvalidHandle(_)
            | NpuForgeError::InvalidAllocation(_) => ErrorCategory::Allocation,
            NpuForgeError::InvalidShape(_)
            | NpuForgeError::InvalidStride(_)
            | NpuForgeError::OutOfRange { .. }
            | NpuForgeError::UnsupportedFormat(_)
            | NpuForgeError::InvalidParameters(_) => ErrorCategory::Validation,
            NpuForgeError::TransferSizeMismatch { .. } => ErrorCategory::Transfer,
            NpuForgeError::UnsupportedCommand(_) => ErrorCategory::Execution,
        }
    }

    /// Whether the caller can recover without recreating the context
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.category(), ErrorCategory::Configuration)
    }

    /// Whether this is an encoder operand rejection
    pub fn is_validation_error(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }
}

/// Build an `InvalidShape` error from a format string
#[macro_export]
macro_rules! shape_error {
    ($($arg:tt)*) => {
        $crate::error::NpuForgeError::InvalidShape(format!($($arg)*))
    };
}

/// Build an `InvalidStride` error from a format string
#[macro_export]
macro_rules! stride_error {
    ($($arg:tt)*) => {
        $crate::error::NpuForgeError::InvalidStride(format!($($arg)*))
    };
}

/// Build an `UnsupportedFormat` error from a format string
#[macro_export]
macro_rules! format_error {
    ($($arg:tt)*) => {
        $crate::error::NpuForgeError::UnsupportedFormat(format!($($arg)*))
    };
}

/// Build an `InvalidParameters` error from a format string
#[macro_export]
macro_rules! param_error {
    ($($arg:tt)*) => {
        $crate::error::NpuForgeError::InvalidParameters(format!($($arg)*))
    };
}

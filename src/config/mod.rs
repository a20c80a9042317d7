//! Device configuration
//!
//! `DeviceInfo` carries the engine parameters a context is bound to: scratch
//! capacity, lane counts, and bank geometry. It is validated once at context
//! creation and immutable afterwards; changing any of these mid-flight would
//! invalidate every address and stride already encoded.

use serde::Deserialize;

use crate::error::{ForgeResult, NpuForgeError};

/// Default local-memory capacity in bytes (32 KiB)
pub const DEFAULT_LMEM_SIZE: usize = 32 * 1024;

/// Default execution-unit count; also the byte granularity of aligned
/// allocations
pub const DEFAULT_EU_NUM: u32 = 16;

/// Default parallel-channel (NPU lane) count
pub const DEFAULT_NPU_NUM: u32 = 8;

/// Default local-memory bank count
pub const DEFAULT_LMEM_BANKS: u32 = 8;

/// Engine parameters bound to a context at creation
///
/// Loaded from an external configuration collaborator (file, environment,
/// or the defaults below) and never mutated during the context's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    /// Local-memory capacity in bytes
    pub lmem_size: usize,
    /// Execution-unit count; aligned allocations round to this many bytes
    pub eu_num: u32,
    /// Parallel-channel count
    pub npu_num: u32,
    /// Local-memory bank count; `lmem_size` must divide evenly into banks
    pub lmem_banks: u32,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            lmem_size: DEFAULT_LMEM_SIZE,
            eu_num: DEFAULT_EU_NUM,
            npu_num: DEFAULT_NPU_NUM,
            lmem_banks: DEFAULT_LMEM_BANKS,
        }
    }
}

impl DeviceInfo {
    /// Parse device info from a JSON configuration document
    pub fn from_json(text: &str) -> ForgeResult<Self> {
        let info: DeviceInfo = serde_json::from_str(text)
            .map_err(|e| NpuForgeError::InvalidConfiguration(e.to_string()))?;
        info.validate()?;
        Ok(info)
    }

    /// Validate the parameters
    ///
    /// # Errors
    /// `InvalidConfiguration` if any count is zero, `eu_num` is not a power
    /// of two, or the capacity does not divide evenly into banks.
    pub fn validate(&self) -> ForgeResult<()> {
        if self.lmem_size == 0 {
            return Err(NpuForgeError::InvalidConfiguration(
                "lmem_size cannot be zero".to_string(),
            ));
        }
        if self.eu_num == 0 || self.npu_num == 0 || self.lmem_banks == 0 {
            return Err(NpuForgeError::InvalidConfiguration(format!(
                "lane counts must be positive: eu_num={}, npu_num={}, lmem_banks={}",
                self.eu_num, self.npu_num, self.lmem_banks
            )));
        }
        if !self.eu_num.is_power_of_two() {
            return Err(NpuForgeError::InvalidConfiguration(format!(
                "eu_num must be a power of two, got {}",
                self.eu_num
            )));
        }
        if self.lmem_size % self.lmem_banks as usize != 0 {
            return Err(NpuForgeError::InvalidConfiguration(format!(
                "lmem_size {} does not divide into {} banks",
                self.lmem_size, self.lmem_banks
            )));
        }
        Ok(())
    }

    /// Byte granularity of execution-unit-aligned allocations
    pub fn eu_alignment(&self) -> usize {
        self.eu_num as usize
    }

    /// Size of one local-memory bank in bytes
    pub fn bank_size(&self) -> usize {
        self.lmem_size / self.lmem_banks as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_valid() {
        let info = DeviceInfo::default();
        assert!(info.validate().is_ok());
        assert_eq!(info.lmem_size, 32768);
        assert_eq!(info.eu_alignment(), 16);
        assert_eq!(info.bank_size(), 4096);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let info = DeviceInfo {
            lmem_size: 0,
            ..DeviceInfo::default()
        };
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_non_power_of_two_eu_rejected() {
        let info = DeviceInfo {
            eu_num: 12,
            ..DeviceInfo::default()
        };
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_bank_divisibility_rejected() {
        let info = DeviceInfo {
            lmem_size: 30000,
            lmem_banks: 7,
            ..DeviceInfo::default()
        };
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let info = DeviceInfo::from_json(r#"{"lmem_size": 65536, "eu_num": 32}"#).unwrap();
        assert_eq!(info.lmem_size, 65536);
        assert_eq!(info.eu_num, 32);
        // Unspecified fields fall back to the defaults
        assert_eq!(info.npu_num, DEFAULT_NPU_NUM);
    }

    #[test]
    fn test_from_json_invalid_values() {
        assert!(DeviceInfo::from_json(r#"{"lmem_size": 0}"#).is_err());
        assert!(DeviceInfo::from_json("not json").is_err());
    }
}

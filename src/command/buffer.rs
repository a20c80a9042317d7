//! Append-only command buffer
//!
//! A context owns exactly one open buffer. Encoders append one record per
//! successful call; the packed register image is produced at append time and
//! grows alongside the structured records. Removing a committed record is
//! not a normal operation; `truncate` exists for explicit rollback only.

use crate::command::record::CommandRecord;

/// Append-only sequence of command records with their packed image
#[derive(Debug, Default)]
pub struct CommandBuffer {
    records: Vec<CommandRecord>,
    /// Concatenated packed register images, in append order
    image: Vec<u8>,
    /// Byte offset of each record within `image`
    offsets: Vec<usize>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, packing it into the register image
    pub fn append(&mut self, record: CommandRecord) {
        let packed = record.pack();
        tracing::debug!(
            "cmdbuf append: {:?} layer={} ({} bytes packed)",
            record.opcode,
            record.layer_id,
            packed.len()
        );
        self.offsets.push(self.image.len());
        self.image.extend_from_slice(&packed);
        self.records.push(record);
    }

    /// Records in append order
    pub fn records(&self) -> &[CommandRecord] {
        &self.records
    }

    /// The packed register image for external submission
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Packed image of one record
    pub fn record_image(&self, index: usize) -> Option<&[u8]> {
        let start = *self.offsets.get(index)?;
        let end = self
            .offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.image.len());
        Some(&self.image[start..end])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record (buffer reuse after submission)
    pub fn reset(&mut self) {
        self.records.clear();
        self.image.clear();
        self.offsets.clear();
    }

    /// Explicitly roll back to the first `len` records
    pub fn truncate(&mut self, len: usize) {
        if len >= self.records.len() {
            return;
        }
        self.records.truncate(len);
        let cut = self.offsets[len];
        self.image.truncate(cut);
        self.offsets.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::record::{CommandRecord, Opcode};

    #[test]
    fn test_append_grows_image() {
        let mut buf = CommandBuffer::new();
        assert!(buf.is_empty());

        buf.append(CommandRecord::new(Opcode::Add, 0));
        buf.append(CommandRecord::new(Opcode::Xor, 1));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.image().len(), 16);
        assert_eq!(buf.record_image(0).unwrap().len(), 8);
        assert_eq!(buf.record_image(1).unwrap()[0], Opcode::Xor as u8);
        assert!(buf.record_image(2).is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut buf = CommandBuffer::new();
        buf.append(CommandRecord::new(Opcode::Add, 0));
        buf.reset();
        assert!(buf.is_empty());
        assert!(buf.image().is_empty());
    }

    #[test]
    fn test_truncate_rolls_back_image() {
        let mut buf = CommandBuffer::new();
        buf.append(CommandRecord::new(Opcode::Add, 0));
        buf.append(CommandRecord::new(Opcode::Max, 1));
        buf.append(CommandRecord::new(Opcode::Min, 2));
        let one_len = buf.record_image(0).unwrap().len();

        buf.truncate(1);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.image().len(), one_len);

        // Truncating past the end is a no-op
        buf.truncate(10);
        assert_eq!(buf.len(), 1);
    }
}

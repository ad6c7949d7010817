//! Byte-level code buffer.

/// Append-only machine code buffer. Code is emitted here first, then copied
/// into the executable arena in one shot.
#[derive(Default)]
pub struct CodeBuf {
    bytes: Vec<u8>,
}

impl CodeBuf {
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(4096),
        }
    }

    #[inline]
    pub fn emit_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    /// Little-endian 32-bit word; one instruction on aarch64.
    #[inline]
    pub fn emit_u32(&mut self, word: u32) {
        self.bytes.extend_from_slice(&word.to_le_bytes());
    }

    /// Little-endian 64-bit immediate.
    #[inline]
    pub fn emit_u64(&mut self, word: u64) {
        self.bytes.extend_from_slice(&word.to_le_bytes());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_emit_little_endian() {
        let mut buf = CodeBuf::new();
        buf.emit_u8(0xC3);
        buf.emit_u32(0xD65F03C0);
        buf.emit_u64(0x0102030405060708);
        assert_eq!(buf.len(), 13);
        assert_eq!(&buf.as_slice()[..5], &[0xC3, 0xC0, 0x03, 0x5F, 0xD6]);
        assert_eq!(buf.as_slice()[5], 0x08);
        assert_eq!(buf.as_slice()[12], 0x01);
    }
}

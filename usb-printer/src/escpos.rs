//! ESC/POS command builder
//!
//! Fluent byte builder for the subset of ESC/POS used by the raster path.

/// ESC
pub const ESC: u8 = 0x1B;
/// Line feed (print and advance one line)
pub const LF: u8 = 0x0A;

/// `ESC *` mode 33: 24-dot double-density column image
pub const BIT_IMAGE_24_DOUBLE_DENSITY: u8 = 33;

/// ESC/POS command builder
pub struct EscPosBuilder {
    buf: Vec<u8>,
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Set line spacing to `dots` (ESC 3 n)
    pub fn line_spacing(&mut self, dots: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'3', dots]);
        self
    }

    /// Center alignment (ESC a 1, ASCII form)
    pub fn center(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'a', b'1']);
        self
    }

    /// Start a 24-dot column image strip (ESC * 33 nL nH)
    ///
    /// Must be followed by exactly `3 * width` column bytes.
    pub fn bit_image_24(&mut self, width: u16) -> &mut Self {
        let [n_l, n_h] = width.to_le_bytes();
        self.buf
            .extend_from_slice(&[ESC, b'*', BIT_IMAGE_24_DOUBLE_DENSITY, n_l, n_h]);
        self
    }

    pub fn newline(&mut self) -> &mut Self {
        self.buf.push(LF);
        self
    }

    /// Write raw bytes directly
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bytes() {
        let mut b = EscPosBuilder::new();
        b.line_spacing(24).center();
        assert_eq!(b.build(), vec![0x1B, 0x33, 24, 0x1B, 0x61, 0x31]);
    }

    #[test]
    fn test_bit_image_width_little_endian() {
        let mut b = EscPosBuilder::new();
        b.bit_image_24(0x0123);
        assert_eq!(b.build(), vec![0x1B, 0x2A, 33, 0x23, 0x01]);
    }

    #[test]
    fn test_raw_and_newline() {
        let mut b = EscPosBuilder::default();
        assert!(b.is_empty());
        b.raw(&[1, 2]).newline();
        assert_eq!(b.len(), 3);
        assert_eq!(b.build(), vec![1, 2, LF]);
    }
}

//! Program buffer
//!
//! 256 16-bit words, written from the byte-wide command bus and read a word
//! at a time by the sequencer. An even byte is held until its odd partner
//! arrives; the odd byte commits `(odd << 8) | even`.

/// Words in the program buffer
pub const BUFFER_WORDS: usize = 256;

/// Byte-addressed view of a 256-word memory
#[derive(Debug, Clone)]
pub struct WordBuffer {
    words: [u16; BUFFER_WORDS],
    even: u8,
}

impl Default for WordBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WordBuffer {
    /// Zero-filled buffer
    pub const fn new() -> Self {
        Self {
            words: [0; BUFFER_WORDS],
            even: 0,
        }
    }

    /// Write one byte at `offset` from the buffer base
    pub fn write_byte(&mut self, offset: u32, data: u8) {
        if offset & 1 == 0 {
            self.even = data;
        } else {
            let index = Self::index(offset >> 1);
            self.words[index] = ((data as u16) << 8) | self.even as u16;
        }
    }

    /// Read one byte at `offset` from the buffer base
    pub fn read_byte(&self, offset: u32) -> u8 {
        let word = self.words[Self::index(offset >> 1)];
        if offset & 1 == 0 {
            word as u8
        } else {
            (word >> 8) as u8
        }
    }

    /// Word at `index` (only the low 8 bits are used)
    pub fn word(&self, index: u32) -> u16 {
        self.words[Self::index(index)]
    }

    /// All words
    pub fn words(&self) -> &[u16; BUFFER_WORDS] {
        &self.words
    }

    fn index(index: u32) -> usize {
        (index as usize) % BUFFER_WORDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_byte_commits() {
        let mut buf = WordBuffer::new();
        buf.write_byte(4, 0x34);
        assert_eq!(buf.word(2), 0);
        buf.write_byte(5, 0x12);
        assert_eq!(buf.word(2), 0x1234);
        assert_eq!(buf.read_byte(4), 0x34);
        assert_eq!(buf.read_byte(5), 0x12);
    }

    #[test]
    fn test_index_wraps() {
        let mut buf = WordBuffer::new();
        buf.write_byte(0, 0xCD);
        buf.write_byte(1, 0xAB);
        assert_eq!(buf.word(0x100), 0xABCD);
        assert_eq!(buf.words()[0], 0xABCD);
    }
}

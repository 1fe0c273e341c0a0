// mlx5 RegEx Engine Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Fixed-layout command buffers.
//!
//! DevX commands are arrays of big-endian 32-bit words. Fields are addressed
//! by their bit offset from the start of the structure, counted from the most
//! significant bit of the first word, and by their width in bits. A field
//! never straddles a word boundary except for 64-bit fields, which occupy two
//! whole consecutive words.
//!
//! The layouts themselves live in [`crate::layout`] as tables of [`Field`]
//! descriptors; this module only knows how to read and write a descriptor.

/// Location of a field inside a command structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Field name as spelled in the hardware manual.
    pub name: &'static str,
    /// Offset in bits from the start of the enclosing structure.
    pub bit_offset: u32,
    /// Width in bits (1..=32, or 64).
    pub bit_width: u32,
}

impl Field {
    /// Create a field from an absolute bit offset.
    pub const fn new(name: &'static str, bit_offset: u32, bit_width: u32) -> Self {
        Self {
            name,
            bit_offset,
            bit_width,
        }
    }

    /// Create a field from a byte offset plus a bit offset within that byte range.
    pub const fn at(name: &'static str, byte_offset: u32, bit: u32, bit_width: u32) -> Self {
        Self::new(name, byte_offset * 8 + bit, bit_width)
    }

    /// The same field inside a sub-structure that starts at `base` bits.
    pub const fn within(self, base: u32) -> Self {
        Self::new(self.name, base + self.bit_offset, self.bit_width)
    }

    /// First bit past the end of this field.
    pub const fn end(&self) -> u32 {
        self.bit_offset + self.bit_width
    }

    /// Index of the word holding the (first bits of the) field.
    #[inline]
    const fn word(&self) -> usize {
        (self.bit_offset / 32) as usize
    }

    /// Left shift of the field's least significant bit inside its word.
    #[inline]
    const fn shift(&self) -> u32 {
        32 - self.bit_width - (self.bit_offset % 32)
    }

    #[inline]
    const fn mask(&self) -> u32 {
        if self.bit_width == 32 {
            u32::MAX
        } else {
            (1 << self.bit_width) - 1
        }
    }
}

/// Number of 32-bit words needed for a structure of `bits` bits.
pub const fn dwords(bits: u32) -> usize {
    (bits / 32) as usize
}

/// A zero-initialized command buffer of `DW` big-endian words.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Command<const DW: usize> {
    words: [u32; DW],
}

impl<const DW: usize> Command<DW> {
    /// Create a zeroed buffer.
    pub const fn new() -> Self {
        Self { words: [0; DW] }
    }

    /// Write a field of at most 32 bits. Bits of `value` above the field
    /// width are discarded.
    #[inline]
    pub fn set(&mut self, field: Field, value: u32) {
        debug_assert!(
            (1..=32).contains(&field.bit_width),
            "{} is not a 32-bit field",
            field.name
        );
        let mask = field.mask();
        let shift = field.shift();
        let word = &mut self.words[field.word()];
        let mut host = u32::from_be(*word);
        host &= !(mask << shift);
        host |= (value & mask) << shift;
        *word = host.to_be();
    }

    /// Read a field of at most 32 bits.
    #[inline]
    pub fn get(&self, field: Field) -> u32 {
        debug_assert!(
            (1..=32).contains(&field.bit_width),
            "{} is not a 32-bit field",
            field.name
        );
        (u32::from_be(self.words[field.word()]) >> field.shift()) & field.mask()
    }

    /// Write a 64-bit field.
    #[inline]
    pub fn set64(&mut self, field: Field, value: u64) {
        debug_assert!(
            field.bit_width == 64 && field.bit_offset % 32 == 0,
            "{} is not a word-aligned 64-bit field",
            field.name
        );
        let word = field.word();
        self.words[word] = ((value >> 32) as u32).to_be();
        self.words[word + 1] = (value as u32).to_be();
    }

    /// Read a 64-bit field.
    #[inline]
    pub fn get64(&self, field: Field) -> u64 {
        debug_assert!(
            field.bit_width == 64 && field.bit_offset % 32 == 0,
            "{} is not a word-aligned 64-bit field",
            field.name
        );
        let word = field.word();
        let hi = u32::from_be(self.words[word]) as u64;
        let lo = u32::from_be(self.words[word + 1]) as u64;
        (hi << 32) | lo
    }

    /// The raw words, in device (big-endian) byte order.
    pub fn as_words(&self) -> &[u32] {
        &self.words
    }

    /// The raw words, mutable, for the device to fill in.
    pub fn as_words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// The buffer as it will appear on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: a [u32; DW] is DW * 4 initialized bytes with no padding.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), DW * 4) }
    }

    /// Size of the buffer in bytes.
    pub const fn len_bytes(&self) -> usize {
        DW * 4
    }
}

impl<const DW: usize> Default for Command<DW> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DW: usize> std::fmt::Debug for Command<DW> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("bytes", &self.len_bytes())
            .finish()
    }
}

/// Format a buffer as rows of 16 bytes, grouped in 4-byte words.
pub fn hexdump(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let groups: Vec<String> = chunk
                .chunks(4)
                .map(|group| group.iter().map(|b| format!("{:02x}", b)).collect())
                .collect();
            format!("{:#06x}:\t{}", row * 16, groups.join(" "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPCODE: Field = Field::new("opcode", 0x00, 0x10);
    const OP_MOD: Field = Field::new("op_mod", 0x30, 0x10);
    const FLAG: Field = Field::new("flag", 0x5f, 0x1);
    const NIBBLE: Field = Field::new("nibble", 0x44, 0x4);
    const WORD: Field = Field::new("word", 0x60, 0x20);
    const ADDR: Field = Field::new("addr", 0x80, 0x40);

    #[test]
    fn test_set_writes_big_endian() {
        let mut cmd = Command::<4>::new();
        cmd.set(OPCODE, 0x0b04);
        assert_eq!(&cmd.as_bytes()[..4], &[0x0b, 0x04, 0x00, 0x00]);

        cmd.set(OP_MOD, 0x1);
        assert_eq!(&cmd.as_bytes()[4..8], &[0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_single_bit_at_word_end() {
        let mut cmd = Command::<4>::new();
        cmd.set(FLAG, 1);
        assert_eq!(&cmd.as_bytes()[8..12], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(cmd.get(FLAG), 1);
    }

    #[test]
    fn test_set_preserves_neighbours() {
        let mut cmd = Command::<4>::new();
        cmd.set(FLAG, 1);
        cmd.set(NIBBLE, 0xf);
        cmd.set(NIBBLE, 0x5);
        assert_eq!(cmd.get(FLAG), 1);
        assert_eq!(cmd.get(NIBBLE), 0x5);
        // nibble occupies bits 4..8 of word 2, counted from the MSB
        assert_eq!(cmd.as_bytes()[8], 0x05);
    }

    #[test]
    fn test_set_truncates_to_width() {
        let mut cmd = Command::<4>::new();
        cmd.set(NIBBLE, 0x1234);
        assert_eq!(cmd.get(NIBBLE), 0x4);
    }

    #[test]
    fn test_full_word_field() {
        let mut cmd = Command::<4>::new();
        cmd.set(WORD, 0xdead_beef);
        assert_eq!(cmd.get(WORD), 0xdead_beef);
        assert_eq!(&cmd.as_bytes()[12..16], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_64bit_field() {
        let mut cmd = Command::<8>::new();
        cmd.set64(ADDR, 0x0000_7f12_3456_0000);
        assert_eq!(cmd.get64(ADDR), 0x0000_7f12_3456_0000);
        assert_eq!(
            &cmd.as_bytes()[16..24],
            &[0x00, 0x00, 0x7f, 0x12, 0x34, 0x56, 0x00, 0x00]
        );
    }

    #[test]
    fn test_nested_field() {
        let inner = Field::new("db_mkey", 0x80, 0x20);
        let outer = inner.within(0x80);
        assert_eq!(outer.bit_offset, 0x100);
        assert_eq!(outer.name, "db_mkey");

        let mut cmd = Command::<16>::new();
        cmd.set(outer, 42);
        assert_eq!(cmd.as_words()[8], 42u32.to_be());
    }

    #[test]
    fn test_field_at_byte_offset() {
        assert_eq!(Field::at("engine_id", 8, 24, 8), Field::new("engine_id", 0x58, 8));
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_field_panics() {
        let mut cmd = Command::<2>::new();
        cmd.set(WORD, 1);
    }

    #[test]
    fn test_hexdump_rows() {
        let mut cmd = Command::<8>::new();
        cmd.set(OPCODE, 0x0100);
        let lines = hexdump(cmd.as_bytes());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "0x0000:\t01000000 00000000 00000000 00000000");
        assert!(lines[1].starts_with("0x0010:\t"));
    }
}

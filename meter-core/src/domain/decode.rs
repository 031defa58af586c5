//! Register word decoding.
//!
//! Meters publish multi-word values in big-endian word order: the first
//! register read holds the most significant 16 bits. The word count is part of
//! each function's signature, so a decode never fails once the caller has
//! fetched the right number of registers.

pub fn decode_u16(words: [u16; 1]) -> u16 {
    words[0]
}

pub fn decode_u32(words: [u16; 2]) -> u32 {
    (u32::from(words[0]) << 16) | u32::from(words[1])
}

/// IEEE-754 single precision from the 32-bit pattern held in two registers.
pub fn decode_f32(words: [u16; 2]) -> f32 {
    f32::from_bits(decode_u32(words))
}

pub fn decode_u64(words: [u16; 4]) -> u64 {
    (u64::from(words[0]) << 48)
        | (u64::from(words[1]) << 32)
        | (u64::from(words[2]) << 16)
        | u64::from(words[3])
}

#[cfg(test)]
pub(crate) fn encode_f32(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

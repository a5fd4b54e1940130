//! Streaming CRC32 used to seal DFU uploads.
//!
//! Standard reflected CRC-32 (polynomial 0xEDB88320) seeded with
//! 0xFFFFFFFF, but the trailer stores the raw register value without
//! the usual final inversion.

const CRC32_POLY: u32 = 0xEDB8_8320;

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { CRC32_POLY ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = build_table();

/// CRC32 accumulator.
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.state = CRC32_TABLE[((self.state ^ byte as u32) & 0xFF) as usize] ^ (self.state >> 8);
        }
    }

    /// Raw register value, exactly as written into the upload trailer.
    pub fn value(&self) -> u32 {
        self.state
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_well_known_entries() {
        assert_eq!(CRC32_TABLE[0], 0x0000_0000);
        assert_eq!(CRC32_TABLE[1], 0x7707_3096);
        assert_eq!(CRC32_TABLE[255], 0x2D02_EF8D);
    }

    #[test]
    fn test_empty_input_keeps_seed() {
        let crc = Crc32::new();
        assert_eq!(crc.value(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_check_vector_without_final_xor() {
        // The classic "123456789" check value is 0xCBF43926 *after* the
        // final inversion, which this variant deliberately skips.
        let mut crc = Crc32::new();
        crc.update(b"123456789");
        assert_eq!(crc.value() ^ 0xFFFF_FFFF, 0xCBF4_3926);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut a = Crc32::new();
        a.update(b"hello ");
        a.update(b"world");

        let mut b = Crc32::new();
        b.update(b"hello world");

        assert_eq!(a.value(), b.value());
    }
}

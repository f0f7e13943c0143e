//! Incremental CRC-32 (IEEE 802.3, reflected polynomial 0xEDB88320)

use once_cell::sync::Lazy;

const POLYNOMIAL: u32 = 0xEDB8_8320;

static CRC_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (n, slot) in table.iter_mut().enumerate() {
        let mut c = n as u32;
        for _ in 0..8 {
            c = if c & 1 != 0 { POLYNOMIAL ^ (c >> 1) } else { c >> 1 };
        }
        *slot = c;
    }
    table
});

/// Running CRC-32 state
///
/// The register is held pre-complemented, so `update` can be fed chunks of
/// any size (including empty ones) and `finalize` can be called at any point
/// without consuming the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc32 {
    register: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self { register: 0xFFFF_FFFF }
    }

    /// Fold another chunk into the checksum
    pub fn update(&mut self, chunk: &[u8]) {
        let table = &*CRC_TABLE;
        let mut crc = self.register;
        for &byte in chunk {
            crc = table[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
        }
        self.register = crc;
    }

    /// Same as `update` but by value, for fold-style use
    pub fn chain(mut self, chunk: &[u8]) -> Self {
        self.update(chunk);
        self
    }

    pub fn finalize(&self) -> u32 {
        self.register ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC-32 of a buffer
pub fn crc32(data: &[u8]) -> u32 {
    Crc32::new().chain(data).finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(crc32(b""), 0x0000_0000);
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b"The quick brown fox jumps over the lazy dog"), 0x414F_A339);
        assert_eq!(crc32(b"a"), 0xE8B7_BE43);
    }

    #[test]
    fn test_chunked_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let expected = crc32(&data);

        for split in [0, 1, 7, 255, 4096, 9_999, 10_000] {
            let (a, b) = data.split_at(split);
            let chained = Crc32::new().chain(a).chain(&[]).chain(b).finalize();
            assert_eq!(chained, expected, "split at {split}");
        }
    }

    #[test]
    fn test_many_small_chunks() {
        let data = b"stored entries are copied verbatim";
        let mut state = Crc32::new();
        for chunk in data.chunks(3) {
            state.update(chunk);
            state.update(&[]);
        }
        assert_eq!(state.finalize(), crc32(data));
    }

    #[test]
    fn test_finalize_does_not_consume_state() {
        let mut state = Crc32::new();
        state.update(b"1234");
        let partial = state.finalize();
        state.update(b"56789");
        assert_eq!(partial, crc32(b"1234"));
        assert_eq!(state.finalize(), 0xCBF4_3926);
    }

    #[test]
    fn test_empty_state_finalizes_to_zero() {
        assert_eq!(Crc32::new().finalize(), 0);
        assert_eq!(Crc32::default().chain(&[]).finalize(), 0);
    }
}

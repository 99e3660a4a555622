//! CRC32C (Castagnoli, polynomial 0x1EDC6F41) over header + payload.
//!
//! The implementation comes from the `crc32c` crate, which picks hardware
//! acceleration where available. The test vectors below are the protocol
//! conformance set; any replacement implementation must reproduce them.

pub use crc32c::crc32c;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(crc32c(b""), 0x0000_0000);
    }

    #[test]
    fn test_single_zero_byte() {
        assert_eq!(crc32c(&[0x00]), 0x527D_5351);
    }

    #[test]
    fn test_check_string() {
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn test_zeros_32() {
        assert_eq!(crc32c(&[0x00; 32]), 0x8A91_36AA);
    }

    #[test]
    fn test_ones_32() {
        assert_eq!(crc32c(&[0xFF; 32]), 0x62A8_AB43);
    }

    #[test]
    fn test_ascending_bytes() {
        let data: Vec<u8> = (0u8..=255).collect();
        assert_eq!(crc32c(&data), 0x477A_57BE);
    }
}

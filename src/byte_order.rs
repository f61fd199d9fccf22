//! Helpers for the 24-bit network byte-order length field.
//!
//! Frame headers carry the body length as an unsigned 24-bit big-endian
//! integer. Rust has no `u24`, so these helpers convert between a `u32` and
//! its three low-order bytes, keeping Clippy expectations scoped to the
//! conversion points.

/// Largest value representable in the 24-bit length field.
pub const MAX_U24: u32 = 0x00FF_FFFF;

/// Serialise the low 24 bits of `value` in network byte order.
///
/// Bits above the 24th are discarded; callers validate the range first.
///
/// # Examples
///
/// ```
/// use bidirpc::byte_order::write_network_u24;
///
/// assert_eq!(write_network_u24(0x12_3456), [0x12, 0x34, 0x56]);
/// ```
#[must_use]
pub fn write_network_u24(value: u32) -> [u8; 3] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    let [_, hi, mid, lo] = value.to_be_bytes();
    [hi, mid, lo]
}

/// Parse a network-order 24-bit unsigned integer.
///
/// # Examples
///
/// ```
/// use bidirpc::byte_order::read_network_u24;
///
/// assert_eq!(read_network_u24([0x12, 0x34, 0x56]), 0x12_3456);
/// ```
#[must_use]
pub fn read_network_u24(bytes: [u8; 3]) -> u32 {
    let [hi, mid, lo] = bytes;
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes([0, hi, mid, lo])
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{MAX_U24, read_network_u24, write_network_u24};

    #[rstest]
    #[case::one(1, [0x00, 0x00, 0x01])]
    #[case::mid(0x01_0203, [0x01, 0x02, 0x03])]
    #[case::max(MAX_U24, [0xFF, 0xFF, 0xFF])]
    fn u24_encodes_big_endian(#[case] value: u32, #[case] expected: [u8; 3]) {
        assert_eq!(write_network_u24(value), expected);
        assert_eq!(read_network_u24(expected), value);
    }

    #[test]
    fn high_byte_is_dropped() {
        assert_eq!(write_network_u24(0xAB00_0001), [0x00, 0x00, 0x01]);
    }
}

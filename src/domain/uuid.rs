//! GATT UUID Codec
//!
//! Conversions between the `(high, low)` 64-bit halves the board framework
//! uses for 128-bit GATT identifiers and the dashed string form the platform
//! BLE stack expects.

/// MetaWear GATT service UUID, advertised by every board.
pub const METAWEAR_SERVICE_UUID: &str = "326A9000-85CB-9195-D9DD-464CFBBAE75A";

/// Format a 128-bit UUID given as two 64-bit halves into lowercase
/// 8-4-4-4-12 dashed hex.
pub fn uuid128(high: u64, low: u64) -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        high >> 32,
        (high >> 16) & 0xffff,
        high & 0xffff,
        low >> 48,
        low & 0xffff_ffff_ffff
    )
}

/// Split a dashed (or undashed) UUID string back into its `(high, low)` halves.
pub fn parse_uuid128(uuid_str: &str) -> Option<(u64, u64)> {
    let hex = uuid_str.replace('-', "");
    if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let high = u64::from_str_radix(&hex[0..16], 16).ok()?;
    let low = u64::from_str_radix(&hex[16..32], 16).ok()?;
    Some((high, low))
}

/// ASCII case-insensitive comparison. Strings of different length never match.
pub fn iequals(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid128_layout() {
        let s = uuid128(0x326a900085cb9195, 0xd9dd464cfbbae75a);
        assert_eq!(s, "326a9000-85cb-9195-d9dd-464cfbbae75a");

        let parts: Vec<usize> = s.split('-').map(str::len).collect();
        assert_eq!(parts, vec![8, 4, 4, 4, 12]);
    }

    #[test]
    fn test_uuid128_zero_padding() {
        assert_eq!(uuid128(0, 1), "00000000-0000-0000-0000-000000000001");
        assert_eq!(uuid128(u64::MAX, 0), "ffffffff-ffff-ffff-0000-000000000000");
    }

    #[test]
    fn test_uuid128_is_deterministic() {
        let a = uuid128(0x326a9001_85cb_9195, 0xd9dd_464c_fbba_e75a);
        let b = uuid128(0x326a9001_85cb_9195, 0xd9dd_464c_fbba_e75a);
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_uuid128() {
        let (high, low) = parse_uuid128(METAWEAR_SERVICE_UUID).unwrap();
        assert_eq!(high, 0x326a900085cb9195);
        assert_eq!(low, 0xd9dd464cfbbae75a);
        assert!(iequals(&uuid128(high, low), METAWEAR_SERVICE_UUID));

        assert!(parse_uuid128("326A9000-85CB").is_none());
        assert!(parse_uuid128("zz6A9000-85CB-9195-D9DD-464CFBBAE75A").is_none());
    }

    #[test]
    fn test_parse_uuid128_rejects_signs() {
        assert!(parse_uuid128("+26a9000-85cb-9195-d9dd-464cfbbae75a").is_none());
        assert!(parse_uuid128("326a9000-85cb-9195-+9dd-464cfbbae75a").is_none());
    }

    #[test]
    fn test_iequals() {
        assert!(iequals(
            METAWEAR_SERVICE_UUID,
            "326a9000-85cb-9195-d9dd-464cfbbae75a"
        ));
        assert!(!iequals(METAWEAR_SERVICE_UUID, "326a9000-85cb-9195-d9dd-464cfbbae75"));
        assert!(!iequals("abc", "abd"));
        assert!(iequals("", ""));
    }
}

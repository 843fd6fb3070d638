//! Key to slot mapping.
//!
//! Implements the cluster key hashing algorithm: CRC16 (XMODEM variant,
//! polynomial 0x1021) of the key's hash tag or of the whole key, modulo 16384.

/// Total number of slots in the keyspace
pub const SLOT_COUNT: u16 = 16384;

/// CRC16 lookup table for polynomial 0x1021, built at compile time
const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let index = ((crc >> 8) as u8 ^ byte) as usize;
        (crc << 8) ^ CRC16_TABLE[index]
    })
}

/// The part of `key` that is hashed.
///
/// The first `{` and the first `}` after it delimit the hash tag. An empty tag
/// (`{}`) or an unmatched brace means the whole key is hashed.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    let Some(start) = key.iter().position(|&b| b == b'{') else {
        return key;
    };
    match key[start + 1..].iter().position(|&b| b == b'}') {
        Some(len) if len > 0 => &key[start + 1..start + 1 + len],
        _ => key,
    }
}

/// Slot owning `key`
///
/// ```
/// use aikv_client::cluster::key_slot;
///
/// assert_eq!(key_slot(b"foo"), 12182);
/// assert_eq!(key_slot(b"{user1000}.following"), key_slot(b"{user1000}.followers"));
/// ```
pub fn key_slot(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % SLOT_COUNT
}

//! SipHash-2-4, the keyed hash behind the intern table.
//!
//! 128-bit key, 2 compression rounds, 4 finalization rounds, 64-bit output.
//! A keyed PRF rather than a plain hash: an attacker who cannot see the key
//! cannot construct colliding identifier sets, so interner probes stay O(1)
//! under hostile input.
//!
//! The process key is generated once at first use. Tests that need stable
//! output use [`siphash24`] with an explicit key.

use std::sync::OnceLock;

static PROCESS_KEY: OnceLock<[u8; 16]> = OnceLock::new();

/// Hash `data` with the process-global random key.
///
/// # Examples
///
/// ```
/// use guage_util::siphash::hash_bytes;
///
/// // Stable within a process run.
/// assert_eq!(hash_bytes(b"lambda"), hash_bytes(b"lambda"));
/// assert_ne!(hash_bytes(b"lambda"), hash_bytes(b"lambdb"));
/// ```
#[inline]
pub fn hash_bytes(data: &[u8]) -> u64 {
    let key = PROCESS_KEY.get_or_init(rand::random);
    siphash24(data, key)
}

#[inline(always)]
fn sipround(v: &mut [u64; 4]) {
    v[0] = v[0].wrapping_add(v[1]);
    v[1] = v[1].rotate_left(13);
    v[1] ^= v[0];
    v[0] = v[0].rotate_left(32);
    v[2] = v[2].wrapping_add(v[3]);
    v[3] = v[3].rotate_left(16);
    v[3] ^= v[2];
    v[0] = v[0].wrapping_add(v[3]);
    v[3] = v[3].rotate_left(21);
    v[3] ^= v[0];
    v[2] = v[2].wrapping_add(v[1]);
    v[1] = v[1].rotate_left(17);
    v[1] ^= v[2];
    v[2] = v[2].rotate_left(32);
}

/// SipHash-2-4 with an explicit 128-bit key.
pub fn siphash24(data: &[u8], key: &[u8; 16]) -> u64 {
    let k0 = u64::from_le_bytes(key[0..8].try_into().unwrap());
    let k1 = u64::from_le_bytes(key[8..16].try_into().unwrap());

    let mut v = [
        k0 ^ 0x736f6d6570736575,
        k1 ^ 0x646f72616e646f6d,
        k0 ^ 0x6c7967656e657261,
        k1 ^ 0x7465646279746573,
    ];

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let m = u64::from_le_bytes(chunk.try_into().unwrap());
        v[3] ^= m;
        sipround(&mut v);
        sipround(&mut v);
        v[0] ^= m;
    }

    // Tail block: remaining bytes plus the length in the top byte.
    let mut b = (data.len() as u64) << 56;
    for (i, &byte) in chunks.remainder().iter().enumerate() {
        b |= (byte as u64) << (8 * i);
    }

    v[3] ^= b;
    sipround(&mut v);
    sipround(&mut v);
    v[0] ^= b;

    v[2] ^= 0xff;
    sipround(&mut v);
    sipround(&mut v);
    sipround(&mut v);
    sipround(&mut v);

    v[0] ^ v[1] ^ v[2] ^ v[3]
}

//! Reference SHA-256d over a block header, one header at a time.
//!
//! This is the plain FIPS 180-4 formulation: a rolled 64-round loop and a
//! fully materialized message schedule. The lane kernels are checked
//! against it, so keep it boring.

/// SHA-256 round constants.
pub(crate) const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

/// SHA-256 initial hash value.
pub(crate) const H0: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// Serialized block header length in bytes.
pub const HEADER_LEN: usize = 80;

/// First padding word: a single 1 bit directly after the message.
pub(crate) const PAD_WORD: u32 = 0x8000_0000;

/// Message length of a header in bits (last word of the second block).
pub(crate) const HEADER_BITS: u32 = (HEADER_LEN * 8) as u32;

/// Message length of a digest in bits (last word of the outer block).
pub(crate) const DIGEST_BITS: u32 = 256;

/// Run one SHA-256 compression over a 16-word block.
pub fn compress(state: &mut [u32; 8], block: &[u32; 16]) {
    let mut w = [0u32; 64];
    w[..16].copy_from_slice(block);
    for t in 16..64 {
        let s0 = w[t - 15].rotate_right(7) ^ w[t - 15].rotate_right(18) ^ (w[t - 15] >> 3);
        let s1 = w[t - 2].rotate_right(17) ^ w[t - 2].rotate_right(19) ^ (w[t - 2] >> 10);
        w[t] = w[t - 16]
            .wrapping_add(s0)
            .wrapping_add(w[t - 7])
            .wrapping_add(s1);
    }

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;
    for t in 0..64 {
        let s1 = e.rotate_right(6) ^ e.rotate_right(11) ^ e.rotate_right(25);
        let ch = (e & f) ^ (!e & g);
        let t1 = h
            .wrapping_add(s1)
            .wrapping_add(ch)
            .wrapping_add(K[t])
            .wrapping_add(w[t]);
        let s0 = a.rotate_right(2) ^ a.rotate_right(13) ^ a.rotate_right(22);
        let maj = (a & b) ^ (a & c) ^ (b & c);
        let t2 = s0.wrapping_add(maj);

        h = g;
        g = f;
        f = e;
        e = d.wrapping_add(t1);
        d = c;
        c = b;
        b = a;
        a = t1.wrapping_add(t2);
    }

    for (s, v) in state.iter_mut().zip([a, b, c, d, e, f, g, h]) {
        *s = s.wrapping_add(v);
    }
}

/// Split an 80-byte header into its two padded SHA-256 blocks.
fn header_blocks(header: &[u8; HEADER_LEN]) -> ([u32; 16], [u32; 16]) {
    let mut words = [0u32; 20];
    for (word, chunk) in words.iter_mut().zip(header.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    let mut first = [0u32; 16];
    first.copy_from_slice(&words[..16]);

    let mut second = [0u32; 16];
    second[..4].copy_from_slice(&words[16..]);
    second[4] = PAD_WORD;
    second[15] = HEADER_BITS;

    (first, second)
}

/// Padded block holding a 32-byte digest, ready for the outer hash.
fn digest_block(digest: &[u32; 8]) -> [u32; 16] {
    let mut block = [0u32; 16];
    block[..8].copy_from_slice(digest);
    block[8] = PAD_WORD;
    block[15] = DIGEST_BITS;
    block
}

/// Serialize a hash state as big-endian bytes.
pub(crate) fn state_to_bytes(state: &[u32; 8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (chunk, word) in out.chunks_exact_mut(4).zip(state) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }
    out
}

/// SHA-256d of one block header.
pub fn sha256d_header(header: &[u8; HEADER_LEN]) -> [u8; 32] {
    let (first, second) = header_blocks(header);

    let mut inner = H0;
    compress(&mut inner, &first);
    compress(&mut inner, &second);

    let mut outer = H0;
    compress(&mut outer, &digest_block(&inner));
    state_to_bytes(&outer)
}

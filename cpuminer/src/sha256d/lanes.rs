//! N-lane SHA-256d kernel.
//!
//! Every lane carries one independent header. State and message words are
//! held structure-of-arrays (`[[u32; N]; W]`, word-major) so each operation
//! is a lane-wise map over `[u32; N]`. Nothing crosses lanes inside a
//! compression, which lets the compiler lower each map to one vector
//! instruction when the caller is compiled with AVX2 or AVX-512 enabled.
//!
//! All helpers are `#[inline(always)]`: the kernel must be inlined into the
//! `#[target_feature]` wrappers in the parent module to pick up the wide
//! registers.

use super::scalar::{DIGEST_BITS, H0, HEADER_BITS, HEADER_LEN, K, PAD_WORD};

/// One 32-bit word across all lanes.
type Vector<const N: usize> = [u32; N];

/// Array-of-structs to structure-of-arrays: lane `i` of word `w` is the
/// big-endian word `w` of header `i`.
#[inline(always)]
pub fn transpose<const N: usize>(headers: &[[u8; HEADER_LEN]; N]) -> [Vector<N>; 20] {
    let mut words = [[0u32; N]; 20];
    for (lane, header) in headers.iter().enumerate() {
        for (w, chunk) in header.chunks_exact(4).enumerate() {
            words[w][lane] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }
    words
}

/// Structure-of-arrays to array-of-structs: serialize each lane's final
/// state as a 32-byte big-endian digest.
#[inline(always)]
pub fn detranspose<const N: usize>(state: &[Vector<N>; 8]) -> [[u8; 32]; N] {
    let mut digests = [[0u8; 32]; N];
    for (lane, digest) in digests.iter_mut().enumerate() {
        for (w, chunk) in digest.chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&state[w][lane].to_be_bytes());
        }
    }
    digests
}

#[inline(always)]
fn splat<const N: usize>(x: u32) -> Vector<N> {
    [x; N]
}

#[inline(always)]
fn map<const N: usize>(x: Vector<N>, f: impl Fn(u32) -> u32) -> Vector<N> {
    let mut out = [0u32; N];
    for i in 0..N {
        out[i] = f(x[i]);
    }
    out
}

#[inline(always)]
fn add<const N: usize>(a: Vector<N>, b: Vector<N>) -> Vector<N> {
    let mut out = [0u32; N];
    for i in 0..N {
        out[i] = a[i].wrapping_add(b[i]);
    }
    out
}

#[inline(always)]
fn big_sigma0<const N: usize>(x: Vector<N>) -> Vector<N> {
    map(x, |v| v.rotate_right(2) ^ v.rotate_right(13) ^ v.rotate_right(22))
}

#[inline(always)]
fn big_sigma1<const N: usize>(x: Vector<N>) -> Vector<N> {
    map(x, |v| v.rotate_right(6) ^ v.rotate_right(11) ^ v.rotate_right(25))
}

#[inline(always)]
fn small_sigma0<const N: usize>(x: Vector<N>) -> Vector<N> {
    map(x, |v| v.rotate_right(7) ^ v.rotate_right(18) ^ (v >> 3))
}

#[inline(always)]
fn small_sigma1<const N: usize>(x: Vector<N>) -> Vector<N> {
    map(x, |v| v.rotate_right(17) ^ v.rotate_right(19) ^ (v >> 10))
}

#[inline(always)]
fn ch<const N: usize>(e: Vector<N>, f: Vector<N>, g: Vector<N>) -> Vector<N> {
    let mut out = [0u32; N];
    for i in 0..N {
        out[i] = (e[i] & f[i]) ^ (!e[i] & g[i]);
    }
    out
}

#[inline(always)]
fn maj<const N: usize>(a: Vector<N>, b: Vector<N>, c: Vector<N>) -> Vector<N> {
    let mut out = [0u32; N];
    for i in 0..N {
        out[i] = (a[i] & b[i]) ^ (a[i] & c[i]) ^ (b[i] & c[i]);
    }
    out
}

/// One SHA-256 round. Callers rotate the variable names instead of
/// shuffling values, so eight consecutive invocations bring the names back
/// to their starting positions.
macro_rules! round {
    ($a:ident, $b:ident, $c:ident, $d:ident, $e:ident, $f:ident, $g:ident, $h:ident, $w:expr, $t:expr) => {{
        let t1 = add(
            add(add($h, big_sigma1($e)), ch($e, $f, $g)),
            add(splat(K[$t]), $w[$t]),
        );
        let t2 = add(big_sigma0($a), maj($a, $b, $c));
        $d = add($d, t1);
        $h = add(t1, t2);
    }};
}

#[inline(always)]
fn initial_state<const N: usize>() -> [Vector<N>; 8] {
    let mut state = [[0u32; N]; 8];
    for (word, h) in state.iter_mut().zip(H0) {
        *word = splat(h);
    }
    state
}

/// SHA-256 compression of one 16-word block in every lane.
#[inline(always)]
pub fn compress<const N: usize>(state: &mut [Vector<N>; 8], block: &[Vector<N>; 16]) {
    let mut w = [[0u32; N]; 64];
    w[..16].copy_from_slice(block);
    for t in 16..64 {
        w[t] = add(
            add(w[t - 16], small_sigma0(w[t - 15])),
            add(w[t - 7], small_sigma1(w[t - 2])),
        );
    }

    let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;
    for t in (0..64).step_by(8) {
        round!(a, b, c, d, e, f, g, h, w, t);
        round!(h, a, b, c, d, e, f, g, w, t + 1);
        round!(g, h, a, b, c, d, e, f, w, t + 2);
        round!(f, g, h, a, b, c, d, e, w, t + 3);
        round!(e, f, g, h, a, b, c, d, w, t + 4);
        round!(d, e, f, g, h, a, b, c, w, t + 5);
        round!(c, d, e, f, g, h, a, b, w, t + 6);
        round!(b, c, d, e, f, g, h, a, w, t + 7);
    }

    for (s, v) in state.iter_mut().zip([a, b, c, d, e, f, g, h]) {
        *s = add(*s, v);
    }
}

/// Second block of the inner hash: header words 16..20, then padding for an
/// 80-byte message.
#[inline(always)]
fn header_tail_block<const N: usize>(words: &[Vector<N>; 20]) -> [Vector<N>; 16] {
    let mut block = [[0u32; N]; 16];
    block[..4].copy_from_slice(&words[16..]);
    block[4] = splat(PAD_WORD);
    block[15] = splat(HEADER_BITS);
    block
}

/// Block of the outer hash: the inner digest, then padding for a 32-byte
/// message.
#[inline(always)]
fn digest_block<const N: usize>(digest: &[Vector<N>; 8]) -> [Vector<N>; 16] {
    let mut block = [[0u32; N]; 16];
    block[..8].copy_from_slice(digest);
    block[8] = splat(PAD_WORD);
    block[15] = splat(DIGEST_BITS);
    block
}

/// SHA-256d of `N` headers, one per lane.
#[inline(always)]
pub fn sha256d<const N: usize>(headers: &[[u8; HEADER_LEN]; N]) -> [[u8; 32]; N] {
    let words = transpose(headers);

    let mut first = [[0u32; N]; 16];
    first.copy_from_slice(&words[..16]);

    let mut inner = initial_state::<N>();
    compress(&mut inner, &first);
    compress(&mut inner, &header_tail_block(&words));

    let mut outer = initial_state::<N>();
    compress(&mut outer, &digest_block(&inner));
    detranspose(&outer)
}

//! FFT block codec and rolling hash
//!
//! Content blobs and serialized table data are stored as FFT-transformed
//! complex sequences. This is obfuscation plus a tamper hash, not a cipher:
//! the forward transform turns an integer stream into blocks of complex
//! points, the inverse transform recovers the stream exactly.
//!
//! ## Block format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Block 0 (1024 complex points after FFT)              │
//! ├──────────────────────────────────────────────────────┤
//! │ slot 0     = total original length L                 │
//! │ slots 1..  = first 1023 data elements, zero padded   │
//! ├──────────────────────────────────────────────────────┤
//! │ Block k, k > 0                                       │
//! ├──────────────────────────────────────────────────────┤
//! │ slot 0     = 0                                       │
//! │ slots 1..  = next 1023 data elements, zero padded    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Decoding requires the sequence length to be a multiple of the block
//! size; slot 0 of the first block carries L, the concatenated data slots
//! are truncated to L.

use crate::error::{VfsError, VfsResult};
use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

/// FFT block size. Radix-2 requires a power of two.
pub const BLOCK_SIZE: usize = 1 << 10;

/// Data elements carried per block (slot 0 is the length prefix).
const DATA_PER_BLOCK: usize = BLOCK_SIZE - 1;

/// Multiplier of the polynomial rolling hash.
pub const HASH_SEED: u64 = 13331;

/// Negative real parts farther from zero than this are floored one lower
/// when rounding back to integers.
const ROUNDING_THRESHOLD: f64 = 1e-2;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

impl Add for Complex {
    type Output = Complex;
    fn add(self, r: Complex) -> Complex {
        Complex::new(self.re + r.re, self.im + r.im)
    }
}

impl Sub for Complex {
    type Output = Complex;
    fn sub(self, r: Complex) -> Complex {
        Complex::new(self.re - r.re, self.im - r.im)
    }
}

impl Mul for Complex {
    type Output = Complex;
    fn mul(self, r: Complex) -> Complex {
        Complex::new(
            self.re * r.re - self.im * r.im,
            self.re * r.im + self.im * r.re,
        )
    }
}

/// Iterative radix-2 FFT over a power-of-two slice.
///
/// `invert` selects the inverse transform, which also divides every point
/// by the length so a forward-then-inverse pass is the identity.
fn fft(a: &mut [Complex], invert: bool) {
    let n = a.len();
    debug_assert!(n.is_power_of_two());

    // Bit-reversal permutation
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            a.swap(i, j);
        }
    }

    // Butterfly passes
    let mut len = 2;
    while len <= n {
        let ang = 2.0 * PI / len as f64 * if invert { -1.0 } else { 1.0 };
        let wlen = Complex::new(ang.cos(), ang.sin());
        for chunk in a.chunks_mut(len) {
            let mut w = Complex::new(1.0, 0.0);
            let half = len / 2;
            for j in 0..half {
                let u = chunk[j];
                let v = chunk[j + half] * w;
                chunk[j] = u + v;
                chunk[j + half] = u - v;
                w = w * wlen;
            }
        }
        len <<= 1;
    }

    if invert {
        let scale = 1.0 / n as f64;
        for x in a.iter_mut() {
            x.re *= scale;
            x.im *= scale;
        }
    }
}

/// Transform an integer stream into FFT blocks of `(re, im)` pairs.
///
/// The output length is always a non-zero multiple of [`BLOCK_SIZE`]; an
/// empty input produces a single block carrying length zero.
pub fn encrypt(xs: &[i64]) -> Vec<(f64, f64)> {
    let block_count = if xs.is_empty() {
        1
    } else {
        xs.len().div_ceil(DATA_PER_BLOCK)
    };

    let mut out = Vec::with_capacity(block_count * BLOCK_SIZE);
    let mut block = vec![Complex::default(); BLOCK_SIZE];
    for index in 0..block_count {
        let start = (index * DATA_PER_BLOCK).min(xs.len());
        let end = ((index + 1) * DATA_PER_BLOCK).min(xs.len());

        block.fill(Complex::default());
        block[0].re = if index == 0 { xs.len() as f64 } else { 0.0 };
        for (slot, &value) in block[1..].iter_mut().zip(&xs[start..end]) {
            slot.re = value as f64;
        }
        fft(&mut block, false);
        out.extend(block.iter().map(|c| (c.re, c.im)));
    }
    out
}

/// Round an inverse-transform real part back to the stored integer.
fn round_real(re: f64) -> i64 {
    let mut value = re.round() as i64;
    if re < 0.0 && re.abs() > ROUNDING_THRESHOLD {
        value -= 1;
    }
    value
}

/// Inverse of [`encrypt`]: recover the integer stream from FFT blocks.
///
/// Fails with [`VfsError::Corruption`] when the sequence length is not a
/// positive multiple of [`BLOCK_SIZE`] or the carried length exceeds the
/// available data slots.
pub fn decrypt(seq: &[(f64, f64)]) -> VfsResult<Vec<i64>> {
    if seq.is_empty() || seq.len() % BLOCK_SIZE != 0 {
        return Err(VfsError::Corruption(format!(
            "encrypted sequence length {} is not a positive multiple of {}",
            seq.len(),
            BLOCK_SIZE
        )));
    }

    let mut block = vec![Complex::default(); BLOCK_SIZE];
    let mut data = Vec::with_capacity(seq.len() / BLOCK_SIZE * DATA_PER_BLOCK);
    let mut total_len: Option<usize> = None;

    for chunk in seq.chunks(BLOCK_SIZE) {
        for (slot, &(re, im)) in block.iter_mut().zip(chunk) {
            *slot = Complex::new(re, im);
        }
        fft(&mut block, true);

        if total_len.is_none() {
            let carried = round_real(block[0].re);
            if carried < 0 {
                return Err(VfsError::Corruption(format!(
                    "negative length prefix {} in encrypted sequence",
                    carried
                )));
            }
            total_len = Some(carried as usize);
        }
        data.extend(block[1..].iter().map(|c| round_real(c.re)));
    }

    let total_len = total_len.unwrap_or(0);
    if total_len > data.len() {
        return Err(VfsError::Corruption(format!(
            "length prefix {} exceeds {} carried data slots",
            total_len,
            data.len()
        )));
    }
    data.truncate(total_len);
    Ok(data)
}

/// Rolling polynomial hash of a byte string: `h = h * 13331 + b`, seed 0,
/// wrapping at 2^64.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |h, &b| {
        h.wrapping_mul(HASH_SEED).wrapping_add(u64::from(b))
    })
}

/// Rolling polynomial hash of an integer stream, same recurrence as
/// [`hash_bytes`] with each element promoted to unsigned.
pub fn hash_ints(xs: &[i64]) -> u64 {
    xs.iter().fold(0u64, |h, &v| {
        h.wrapping_mul(HASH_SEED).wrapping_add(v as u64)
    })
}

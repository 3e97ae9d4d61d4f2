//! Fixed-point I/Q to normalized complex float conversion.

use num_complex::Complex32;

/// Full-scale value of the receiver's fixed-point samples.
pub const FULL_SCALE: f32 = 8192.0;

const INV_FULL_SCALE: f32 = 1.0 / FULL_SCALE;

/// Convert interleaved `I, Q, I, Q, ...` values into complex samples.
///
/// Writes `raw.len() / 2` samples into the front of `out`, which the caller
/// pre-allocates (typically a slot inside a frame buffer). Returns the number
/// of samples written.
pub fn convert_block(raw: &[i16], out: &mut [Complex32]) -> usize {
    debug_assert!(raw.len() % 2 == 0, "odd number of I/Q values");
    debug_assert!(out.len() >= raw.len() / 2, "destination too small");

    let mut written = 0;
    for (dst, iq) in out.iter_mut().zip(raw.chunks_exact(2)) {
        *dst = Complex32::new(
            f32::from(iq[0]) * INV_FULL_SCALE,
            f32::from(iq[1]) * INV_FULL_SCALE,
        );
        written += 1;
    }
    written
}

/// Inverse of [`convert_block`]: scale back to fixed point, rounding and
/// saturating at the `i16` limits.
pub fn to_fixed(samples: &[Complex32], out: &mut [i16]) -> usize {
    let mut written = 0;
    for (iq, s) in out.chunks_exact_mut(2).zip(samples) {
        iq[0] = quantize(s.re);
        iq[1] = quantize(s.im);
        written += 1;
    }
    written
}

fn quantize(value: f32) -> i16 {
    (value * FULL_SCALE)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

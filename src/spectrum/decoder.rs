use rustfft::num_complex::Complex;

/// Unsigned 8-bit samples are centered at 127.5; the integer part is removed.
pub const DC_OFFSET: f64 = 127.0;

/// Converts one FFT window of interleaved I/Q bytes into complex input.
///
/// Every odd-numbered complex sample is negated, i.e. the sequence is multiplied
/// by `(-1)^n`. That rotates the spectrum by half its width, so the plain
/// transform output already has the zero-frequency bin at index `bins / 2`.
///
/// Panics unless `raw` holds exactly two bytes per output sample and the
/// output length is even.
pub fn decode_window(raw: &[u8], out: &mut [Complex<f64>]) {
    assert_eq!(
        raw.len(),
        2 * out.len(),
        "raw window must hold two bytes per complex sample"
    );
    assert!(out.len() % 2 == 0, "window length must be even");

    for (bytes, pair) in raw.chunks_exact(4).zip(out.chunks_exact_mut(2)) {
        pair[0] = Complex::new(
            f64::from(bytes[0]) - DC_OFFSET,
            f64::from(bytes[1]) - DC_OFFSET,
        );
        pair[1] = Complex::new(
            -(f64::from(bytes[2]) - DC_OFFSET),
            -(f64::from(bytes[3]) - DC_OFFSET),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_samples_are_negated() {
        let raw = [127u8, 127, 127, 127, 137, 127, 127, 137];
        let mut out = vec![Complex::new(f64::NAN, f64::NAN); 4];
        decode_window(&raw, &mut out);

        assert_eq!(out[0], Complex::new(0.0, 0.0));
        assert_eq!(out[1], Complex::new(0.0, 0.0));
        assert_eq!(out[2], Complex::new(10.0, 0.0));
        assert_eq!(out[3], Complex::new(0.0, -10.0));
    }

    #[test]
    fn extremes_map_around_offset() {
        let raw = [0u8, 255, 0, 255];
        let mut out = vec![Complex::default(); 2];
        decode_window(&raw, &mut out);

        assert_eq!(out[0], Complex::new(-127.0, 128.0));
        assert_eq!(out[1], Complex::new(127.0, -128.0));
    }

    #[test]
    fn undoing_the_rotation_recovers_the_bytes() {
        let raw: Vec<u8> = (0..512u32).map(|i| (i * 37 % 256) as u8).collect();
        let mut out = vec![Complex::default(); raw.len() / 2];
        decode_window(&raw, &mut out);

        let recovered: Vec<u8> = out
            .iter()
            .enumerate()
            .map(|(n, c)| if n % 2 == 1 { -c } else { *c })
            .flat_map(|c| [c.re + DC_OFFSET, c.im + DC_OFFSET])
            .map(|v| v as u8)
            .collect();
        assert_eq!(recovered, raw);
    }

    #[test]
    fn matches_explicit_phase_rotation() {
        let raw: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(11)).collect();
        let mut out = vec![Complex::default(); 32];
        decode_window(&raw, &mut out);

        for (n, pair) in raw.chunks_exact(2).enumerate() {
            let plain = Complex::new(f64::from(pair[0]) - 127.0, f64::from(pair[1]) - 127.0);
            let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
            assert_eq!(out[n], plain * sign);
        }
    }

    #[test]
    #[should_panic(expected = "two bytes per complex sample")]
    fn mis_sized_window_panics() {
        let mut out = vec![Complex::default(); 4];
        decode_window(&[0u8; 6], &mut out);
    }
}

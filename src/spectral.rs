//! Stateless transforms on full real-signal spectra.

use realfft::FftError;
use rustfft::num_complex::Complex;

use crate::fft_convolver::Fft;

/// Replaces every bin of `input`'s spectrum by the square root of its
/// magnitude with zero phase and writes the inverse transform to `output`.
///
/// In dB this halves the magnitude response and discards the phase, so the
/// result is a zero-phase kernel centred on index `0` (circularly). It is not
/// an involution: applying it twice yields `|X|^(1/4)`.
///
/// `fft` must be planned for `input.len()` points and `spectrum` must hold
/// `input.len() / 2 + 1` bins.
pub fn make_half_magnitude(
    output: &mut [f32],
    input: &[f32],
    fft: &mut Fft,
    spectrum: &mut [Complex<f32>],
) -> Result<(), FftError> {
    debug_assert_eq!(input.len(), fft.len());
    debug_assert_eq!(output.len(), input.len());

    output.copy_from_slice(input);
    fft.forward(output, spectrum)?;
    for bin in spectrum.iter_mut() {
        *bin = Complex::new(bin.norm().sqrt(), 0.);
    }
    fft.inverse(spectrum, output)
}

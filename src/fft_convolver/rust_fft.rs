use realfft::{ComplexToReal, FftError, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::sync::Arc;

/// Real-only FFT plan pair with its own scratch space, so transforms never
/// allocate once the plan exists.
#[derive(Clone)]
pub struct Fft {
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
    scratch_forward: Vec<Complex<f32>>,
    scratch_inverse: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Fft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fft({})", self.len())
    }
}

impl Fft {
    pub fn new(length: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(length);
        let fft_inverse = planner.plan_fft_inverse(length);
        let scratch_forward = fft_forward.make_scratch_vec();
        let scratch_inverse = fft_inverse.make_scratch_vec();
        Self {
            fft_forward,
            fft_inverse,
            scratch_forward,
            scratch_inverse,
        }
    }

    pub fn len(&self) -> usize {
        self.fft_forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn make_spectrum(&self) -> Vec<Complex<f32>> {
        self.fft_forward.make_output_vec()
    }

    /// `input` is used as scratch and holds garbage afterwards.
    pub fn forward(
        &mut self,
        input: &mut [f32],
        output: &mut [Complex<f32>],
    ) -> Result<(), FftError> {
        self.fft_forward
            .process_with_scratch(input, output, &mut self.scratch_forward)
    }

    /// Normalised inverse transform. The imaginary parts of the DC and
    /// Nyquist bins must be zero.
    pub fn inverse(
        &mut self,
        input: &mut [Complex<f32>],
        output: &mut [f32],
    ) -> Result<(), FftError> {
        self.fft_inverse
            .process_with_scratch(input, output, &mut self.scratch_inverse)?;

        // FFT Normalization
        let scale = 1.0 / output.len() as f32;
        output.iter_mut().for_each(|bin| *bin *= scale);

        Ok(())
    }
}

pub fn complex_size(size: usize) -> usize {
    (size / 2) + 1
}

/// Length of a packed segment for an FFT of `size` points.
pub fn packed_size(size: usize) -> usize {
    size + 1
}

pub fn copy_and_pad(dst: &mut [f32], src: &[f32], src_size: usize) {
    debug_assert!(dst.len() >= src_size);
    dst[0..src_size].copy_from_slice(&src[0..src_size]);
    dst[src_size..].fill(0.);
}

/// Packs a half spectrum of `N/2 + 1` bins into `N + 1` floats:
/// real parts of bins `0..N/2`, then their imaginary parts, then the
/// Nyquist bin, which is purely real.
pub fn pack_spectrum(spectrum: &[Complex<f32>], packed: &mut [f32]) {
    let half = spectrum.len() - 1;
    debug_assert_eq!(packed.len(), 2 * half + 1);

    let (re, rest) = packed.split_at_mut(half);
    let (im, nyquist) = rest.split_at_mut(half);
    for (k, bin) in spectrum[..half].iter().enumerate() {
        re[k] = bin.re;
        im[k] = bin.im;
    }
    im[0] = 0.;
    nyquist[0] = spectrum[half].re;
}

/// Inverse of [`pack_spectrum`], restoring the layout the real inverse FFT
/// expects (zero imaginary parts at DC and Nyquist).
pub fn unpack_spectrum(packed: &[f32], spectrum: &mut [Complex<f32>]) {
    let half = spectrum.len() - 1;
    debug_assert_eq!(packed.len(), 2 * half + 1);

    let (re, rest) = packed.split_at(half);
    let (im, nyquist) = rest.split_at(half);
    for (k, bin) in spectrum[..half].iter_mut().enumerate() {
        *bin = Complex::new(re[k], im[k]);
    }
    spectrum[0].im = 0.;
    spectrum[half] = Complex::new(nyquist[0], 0.);
}

/// `result += a * b` on packed segments.
#[inline]
pub fn complex_multiply_accumulate(result: &mut [f32], a: &[f32], b: &[f32]) {
    debug_assert_eq!(result.len(), a.len());
    debug_assert_eq!(result.len(), b.len());
    let half = result.len() / 2;

    let (result_re, rest) = result.split_at_mut(half);
    let (result_im, result_nyquist) = rest.split_at_mut(half);
    let (a_re, a_im) = (&a[..half], &a[half..2 * half]);
    let (b_re, b_im) = (&b[..half], &b[half..2 * half]);

    for k in 0..half {
        result_re[k] += a_re[k] * b_re[k] - a_im[k] * b_im[k];
        result_im[k] += a_re[k] * b_im[k] + a_im[k] * b_re[k];
    }
    result_nyquist[0] += a[2 * half] * b[2 * half];
}

#[inline]
pub fn sum(result: &mut [f32], a: &[f32], b: &[f32]) {
    debug_assert_eq!(result.len(), a.len());
    debug_assert_eq!(result.len(), b.len());
    for ((r, a), b) in result.iter_mut().zip(a).zip(b) {
        *r = a + b;
    }
}

#[inline]
pub fn add_to_buffer(dst: &mut [f32], src: &[f32]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

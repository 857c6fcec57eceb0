use rustfft::num_complex::Complex;

use crate::error::{Error, Result};
use crate::fft_convolver::Fft;
use crate::linear_phase::prototype::PrototypeFilter;
use crate::spectral::make_half_magnitude;

/// Turns a prototype filter into a linear-phase FIR of `ir_size` taps with
/// its group delay at `ir_size / 2`.
pub struct IrBuilder<P: PrototypeFilter> {
    prototype: P,
    sample_rate: f64,
    ir_size: usize,
    fft: Option<Fft>,
    work: Vec<f32>,
    ir: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
}

impl<P: PrototypeFilter> IrBuilder<P> {
    pub fn new(prototype: P) -> Self {
        Self {
            prototype,
            sample_rate: 0.0,
            ir_size: 0,
            fft: None,
            work: Vec::new(),
            ir: Vec::new(),
            spectrum: Vec::new(),
        }
    }

    pub fn prepare(&mut self, sample_rate: f64, ir_size: usize) {
        debug_assert!(ir_size >= 2 && ir_size % 2 == 0);
        self.prototype.prepare(sample_rate);
        self.sample_rate = sample_rate;

        if self.ir_size != ir_size || self.fft.is_none() {
            let fft = Fft::new(ir_size);
            self.spectrum = fft.make_spectrum();
            self.fft = Some(fft);
            self.work = vec![0.; ir_size];
            self.ir = vec![0.; ir_size];
            self.ir_size = ir_size;
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.fft.is_some()
    }

    pub fn ir_size(&self) -> usize {
        self.ir_size
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn prototype(&self) -> &P {
        &self.prototype
    }

    /// Builds the IR for `parameters`.
    ///
    /// Running the prototype forward, then over the reversed result, cancels
    /// its phase and squares its magnitude. The half-magnitude correction
    /// takes the square root back and leaves a zero-phase kernel around
    /// index 0, which is then rotated to the centre of the buffer.
    pub fn build(&mut self, parameters: &P::Parameters) -> Result<&[f32]> {
        let fft = self.fft.as_mut().ok_or(Error::NotPrepared)?;
        let centre = self.ir_size / 2;

        self.prototype.set_parameters(parameters);
        self.prototype.reset();

        self.work.fill(0.);
        self.work[centre] = 1.;
        self.prototype.process(&mut self.work);
        self.work.reverse();
        self.prototype.reset();
        self.prototype.process(&mut self.work);

        make_half_magnitude(&mut self.ir, &self.work, fft, &mut self.spectrum)?;
        self.ir.rotate_right(centre);

        Ok(&self.ir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear_phase::prototype::{EqBand, EqParameters, ParametricEq};

    /// Symmetric three-tap FIR, already linear phase.
    struct Smoother {
        taps: [f32; 3],
        history: [f32; 2],
    }

    impl PrototypeFilter for Smoother {
        type Parameters = [f32; 3];

        fn prepare(&mut self, _sample_rate: f64) {}

        fn set_parameters(&mut self, parameters: &[f32; 3]) {
            self.taps = *parameters;
        }

        fn reset(&mut self) {
            self.history = [0.; 2];
        }

        fn process(&mut self, buffer: &mut [f32]) {
            for sample in buffer.iter_mut() {
                let x = *sample;
                *sample = self.taps[0] * x + self.taps[1] * self.history[0] + self.taps[2] * self.history[1];
                self.history = [x, self.history[0]];
            }
        }
    }

    #[test]
    fn symmetric_prototype_is_reproduced_at_the_centre() {
        let mut builder = IrBuilder::new(Smoother {
            taps: [0.; 3],
            history: [0.; 2],
        });
        builder.prepare(48_000.0, 256);
        let ir = builder.build(&[0.25, 0.5, 0.25]).unwrap();

        let centre = 128;
        for (i, &sample) in ir.iter().enumerate() {
            let expected = match i {
                i if i == centre => 0.5,
                i if i + 1 == centre || i == centre + 1 => 0.25,
                _ => 0.0,
            };
            assert!((sample - expected).abs() < 1e-5, "tap {i}: {sample}");
        }
    }

    #[test]
    fn flat_eq_builds_a_centred_impulse() {
        let mut builder = IrBuilder::new(ParametricEq::new());
        builder.prepare(48_000.0, 1024);
        let ir = builder.build(&EqParameters::flat()).unwrap();

        for (i, &sample) in ir.iter().enumerate() {
            let expected = if i == 512 { 1.0 } else { 0.0 };
            assert!((sample - expected).abs() < 1e-5, "tap {i}: {sample}");
        }
    }

    #[test]
    fn ir_is_symmetric_and_matches_prototype_magnitude() {
        let size = 4096;
        let sample_rate = 48_000.0;
        let parameters = EqParameters::flat()
            .with_band(EqBand::peaking(1000.0, 6.0, 1.0))
            .with_band(EqBand::high_shelf(6000.0, -4.0));
        let mut builder = IrBuilder::new(ParametricEq::new());
        builder.prepare(sample_rate, size);
        let ir = builder.build(&parameters).unwrap().to_vec();

        let centre = size / 2;
        for k in 1..centre {
            assert!((ir[centre - k] - ir[centre + k]).abs() < 1e-5, "offset {k}");
        }

        let mut fft = Fft::new(size);
        let mut buffer = ir.clone();
        let mut spectrum = fft.make_spectrum();
        fft.forward(&mut buffer, &mut spectrum).unwrap();
        for bin in [10usize, 85, 200, 512, 1200] {
            let frequency = bin as f64 * sample_rate / size as f64;
            let expected = builder.prototype().magnitude_at(frequency);
            let actual = spectrum[bin].norm() as f64;
            assert!(
                (actual - expected).abs() < 1e-2 * expected,
                "bin {bin}: {actual} vs {expected}"
            );
        }
    }

    #[test]
    fn build_before_prepare_fails() {
        let mut builder = IrBuilder::new(ParametricEq::new());
        assert!(matches!(
            builder.build(&EqParameters::flat()),
            Err(Error::NotPrepared)
        ));
    }
}

use std::f64::consts::PI;

/// A filter whose response the linear-phase builder turns into an FIR.
///
/// It is only ever driven from the background context, so implementations
/// may allocate in `set_parameters`.
pub trait PrototypeFilter: Send + 'static {
    type Parameters: Clone + PartialEq + Send + 'static;

    fn prepare(&mut self, sample_rate: f64);

    fn set_parameters(&mut self, parameters: &Self::Parameters);

    /// Clears the internal state but keeps the coefficients.
    fn reset(&mut self);

    fn process(&mut self, buffer: &mut [f32]);
}

const MAX_GAIN_DB: f32 = 24.0;
const MIN_Q: f32 = 0.1;
const MAX_Q: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandKind {
    LowShelf,
    Peaking,
    HighShelf,
    LowPass,
    HighPass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqBand {
    pub kind: BandKind,
    /// Hz
    pub frequency: f32,
    /// dB, ignored by the pass filters
    pub gain_db: f32,
    pub q: f32,
    pub enabled: bool,
}

impl EqBand {
    pub fn peaking(frequency: f32, gain_db: f32, q: f32) -> Self {
        Self {
            kind: BandKind::Peaking,
            frequency,
            gain_db,
            q,
            enabled: true,
        }
    }

    pub fn low_shelf(frequency: f32, gain_db: f32) -> Self {
        Self {
            kind: BandKind::LowShelf,
            frequency,
            gain_db,
            q: std::f32::consts::FRAC_1_SQRT_2,
            enabled: true,
        }
    }

    pub fn high_shelf(frequency: f32, gain_db: f32) -> Self {
        Self {
            kind: BandKind::HighShelf,
            ..Self::low_shelf(frequency, gain_db)
        }
    }

    pub fn low_pass(frequency: f32, q: f32) -> Self {
        Self {
            kind: BandKind::LowPass,
            frequency,
            gain_db: 0.0,
            q,
            enabled: true,
        }
    }

    pub fn high_pass(frequency: f32, q: f32) -> Self {
        Self {
            kind: BandKind::HighPass,
            ..Self::low_pass(frequency, q)
        }
    }
}

/// Parameter snapshot of a [`ParametricEq`], compared by value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EqParameters {
    pub bands: Vec<EqBand>,
}

impl EqParameters {
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn with_band(mut self, band: EqBand) -> Self {
        self.bands.push(band);
        self
    }
}

/// Transposed direct form II biquad.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn design(band: &EqBand, sample_rate: f64) -> Self {
        // keep away from Nyquist where the bilinear designs become unstable
        let frequency = (band.frequency as f64).clamp(1.0, sample_rate * 0.45);
        let q = band.q.clamp(MIN_Q, MAX_Q) as f64;
        let gain_db = band.gain_db.clamp(-MAX_GAIN_DB, MAX_GAIN_DB) as f64;

        let a = 10.0_f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * frequency / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match band.kind {
            BandKind::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_omega,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_omega,
                1.0 - alpha / a,
            ),
            BandKind::LowShelf => {
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_omega + beta),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
                    a * ((a + 1.0) - (a - 1.0) * cos_omega - beta),
                    (a + 1.0) + (a - 1.0) * cos_omega + beta,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
                    (a + 1.0) + (a - 1.0) * cos_omega - beta,
                )
            }
            BandKind::HighShelf => {
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_omega + beta),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
                    a * ((a + 1.0) + (a - 1.0) * cos_omega - beta),
                    (a + 1.0) - (a - 1.0) * cos_omega + beta,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
                    (a + 1.0) - (a - 1.0) * cos_omega - beta,
                )
            }
            BandKind::LowPass => (
                (1.0 - cos_omega) / 2.0,
                1.0 - cos_omega,
                (1.0 - cos_omega) / 2.0,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            BandKind::HighPass => (
                (1.0 + cos_omega) / 2.0,
                -(1.0 + cos_omega),
                (1.0 + cos_omega) / 2.0,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    fn magnitude(&self, omega: f64) -> f64 {
        let (s1, c1) = omega.sin_cos();
        let (s2, c2) = (2.0 * omega).sin_cos();
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        (num_re.hypot(num_im)) / (den_re.hypot(den_im))
    }
}

/// Minimum-phase multi-band equalizer: one biquad per enabled band.
#[derive(Debug, Clone)]
pub struct ParametricEq {
    sample_rate: f64,
    parameters: EqParameters,
    filters: Vec<Biquad>,
}

impl Default for ParametricEq {
    fn default() -> Self {
        Self::new()
    }
}

impl ParametricEq {
    pub fn new() -> Self {
        Self {
            sample_rate: 48_000.0,
            parameters: EqParameters::default(),
            filters: Vec::new(),
        }
    }

    /// Magnitude response (linear) at `frequency` Hz.
    pub fn magnitude_at(&self, frequency: f64) -> f64 {
        let omega = 2.0 * PI * frequency / self.sample_rate;
        self.filters.iter().map(|f| f.magnitude(omega)).product()
    }

    fn redesign(&mut self) {
        let sample_rate = self.sample_rate;
        self.filters = self
            .parameters
            .bands
            .iter()
            .filter(|band| band.enabled)
            .map(|band| Biquad::design(band, sample_rate))
            .collect();
    }
}

impl PrototypeFilter for ParametricEq {
    type Parameters = EqParameters;

    fn prepare(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.redesign();
    }

    fn set_parameters(&mut self, parameters: &EqParameters) {
        self.parameters = parameters.clone();
        self.redesign();
    }

    fn reset(&mut self) {
        self.filters.iter_mut().for_each(Biquad::reset);
    }

    fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            let mut x = *sample as f64;
            for filter in &mut self.filters {
                x = filter.process(x);
            }
            *sample = x as f32;
        }
    }
}

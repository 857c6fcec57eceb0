pub mod config;
pub mod error;
pub mod fft_convolver;
pub mod handoff;
pub mod linear_phase;
pub mod spectral;

pub use config::{EqConfig, LatencyMode, PartitionConfig};
pub use error::{Error, Result};
pub use fft_convolver::ConvolutionEngine;
pub use handoff::IrHandoff;
pub use linear_phase::{EqHandle, IrState, LinearPhaseEq};

pub type Sample = f32;

pub trait Convolution: Clone {
    fn init(response: &[Sample], max_block_size: usize) -> Self;

    // must be implemented in a real-time safe way, e.g. no heap allocations
    fn update(&mut self, response: &[Sample]);

    fn reset(&mut self);

    fn process(&mut self, input: &[Sample], output: &mut [Sample]);
}

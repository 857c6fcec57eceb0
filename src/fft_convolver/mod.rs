#[allow(clippy::module_inception)]
mod fft_convolver;
pub mod rust_fft;

pub use fft_convolver::ConvolutionEngine;
pub use rust_fft::{
    complex_multiply_accumulate, complex_size, copy_and_pad, pack_spectrum, packed_size, sum,
    unpack_spectrum, Fft,
};

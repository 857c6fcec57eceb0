use realfft::FftError;
use rustfft::num_complex::Complex;

use crate::config::PartitionConfig;
use crate::fft_convolver::rust_fft::{
    add_to_buffer, complex_multiply_accumulate, complex_size, copy_and_pad, pack_spectrum,
    packed_size, sum, unpack_spectrum, Fft,
};
use crate::Convolution;

/// Uniformly partitioned overlap-add convolver for one channel.
///
/// The impulse response is cut into partitions of `fft_size - block_size`
/// samples, each stored as a packed spectrum. Input blocks are transformed
/// into a circular array of input segments; the products of older input
/// segments with impulse segments `1..` are summed once per block, the newest
/// segment against impulse segment `0` on every call.
#[derive(Clone, Debug)]
pub struct ConvolutionEngine {
    ir_len: usize,
    block_size: usize,
    fft_size: usize,
    step: usize,
    seg_count: usize,
    input_seg_count: usize,
    segments: Vec<Vec<f32>>,
    segments_ir: Vec<Vec<f32>>,
    fft: Fft,
    fft_buffer: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    pre_multiplied: Vec<f32>,
    conv: Vec<f32>,
    overlap: Vec<f32>,
    output_buffer: Vec<f32>,
    current: usize,
    input_buffer: Vec<f32>,
    input_buffer_fill: usize,
    ir_changed: bool,
}

impl Convolution for ConvolutionEngine {
    fn init(impulse_response: &[f32], max_block_size: usize) -> Self {
        Self::with_config(impulse_response, max_block_size, &PartitionConfig::default())
    }

    fn update(&mut self, response: &[f32]) {
        debug_assert!(
            response.len() <= self.ir_len,
            "new impulse response is longer than the initialized length"
        );
        self.load_ir(response);
        self.ir_changed = true;
    }

    fn reset(&mut self) {
        for s in &mut self.segments {
            s.fill(0.);
        }
        self.fft_buffer.fill(0.);
        self.pre_multiplied.fill(0.);
        self.conv.fill(0.);
        self.overlap.fill(0.);
        self.output_buffer.fill(0.);
        self.input_buffer.fill(0.);
        self.input_buffer_fill = 0;
        self.current = 0;
        self.ir_changed = false;
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());

        let mut processed = 0;
        while processed < output.len() {
            let input_buffer_was_empty = self.input_buffer_fill == 0;
            let processing = std::cmp::min(
                output.len() - processed,
                self.block_size - self.input_buffer_fill,
            );

            let input_buffer_pos = self.input_buffer_fill;
            self.input_buffer[input_buffer_pos..input_buffer_pos + processing]
                .copy_from_slice(&input[processed..processed + processing]);

            // Forward FFT
            if self.transform_input_segment().is_err() {
                output.fill(0.);
                return;
            }

            // complex multiplication
            if input_buffer_was_empty || self.ir_changed {
                self.multiply_tail();
                self.ir_changed = false;
            }
            self.conv.copy_from_slice(&self.pre_multiplied);
            complex_multiply_accumulate(
                &mut self.conv,
                &self.segments[self.current],
                &self.segments_ir[0],
            );

            // Backward FFT
            if self.inverse_conv().is_err() {
                output.fill(0.);
                return;
            }

            // Add overlap
            sum(
                &mut output[processed..processed + processing],
                &self.fft_buffer[input_buffer_pos..input_buffer_pos + processing],
                &self.overlap[input_buffer_pos..input_buffer_pos + processing],
            );

            // Input buffer full => Next block
            self.input_buffer_fill += processing;
            if self.input_buffer_fill == self.block_size {
                self.input_buffer.fill(0.);
                self.input_buffer_fill = 0;
                self.save_overlap();
                self.advance();
            }
            processed += processing;
        }
    }
}

impl ConvolutionEngine {
    pub fn with_config(
        impulse_response: &[f32],
        max_block_size: usize,
        config: &PartitionConfig,
    ) -> Self {
        let ir_len = impulse_response.len();
        let block_size = max_block_size.max(1).next_power_of_two();
        let fft_size = block_size * config.fft_factor(block_size);
        debug_assert!(fft_size >= 2 * block_size);

        let partition = fft_size - block_size;
        let step = partition / block_size;
        let seg_count = ir_len.div_ceil(partition) + 1;
        let input_seg_count = seg_count * step;
        let fft_complex_size = complex_size(fft_size);
        let fft_packed_size = packed_size(fft_size);

        let mut engine = Self {
            ir_len,
            block_size,
            fft_size,
            step,
            seg_count,
            input_seg_count,
            segments: vec![vec![0.; fft_packed_size]; input_seg_count],
            segments_ir: vec![vec![0.; fft_packed_size]; seg_count],
            fft: Fft::new(fft_size),
            fft_buffer: vec![0.; fft_size],
            spectrum: vec![Complex::new(0., 0.); fft_complex_size],
            pre_multiplied: vec![0.; fft_packed_size],
            conv: vec![0.; fft_packed_size],
            overlap: vec![0.; partition],
            output_buffer: vec![0.; block_size],
            current: 0,
            input_buffer: vec![0.; block_size],
            input_buffer_fill: 0,
            ir_changed: false,
        };
        engine.load_ir(impulse_response);
        engine.reset();
        engine
    }

    /// Same convolution as [`Convolution::process`], but all of a block's
    /// work happens once the block is complete, and the output lags the input
    /// by `block_size` samples.
    ///
    /// Do not interleave with `process` on the same instance without a
    /// `reset` in between.
    pub fn process_with_added_latency(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());

        let mut processed = 0;
        while processed < output.len() {
            let processing = std::cmp::min(
                output.len() - processed,
                self.block_size - self.input_buffer_fill,
            );
            let pos = self.input_buffer_fill;

            self.input_buffer[pos..pos + processing]
                .copy_from_slice(&input[processed..processed + processing]);
            output[processed..processed + processing]
                .copy_from_slice(&self.output_buffer[pos..pos + processing]);

            processed += processing;
            self.input_buffer_fill += processing;

            if self.input_buffer_fill == self.block_size {
                if self.transform_input_segment().is_err() {
                    output.fill(0.);
                    return;
                }
                self.multiply_tail();
                self.ir_changed = false;
                self.conv.copy_from_slice(&self.pre_multiplied);
                complex_multiply_accumulate(
                    &mut self.conv,
                    &self.segments[self.current],
                    &self.segments_ir[0],
                );
                if self.inverse_conv().is_err() {
                    output.fill(0.);
                    return;
                }

                let block_size = self.block_size;
                add_to_buffer(
                    &mut self.fft_buffer[..block_size],
                    &self.overlap[..block_size],
                );
                self.output_buffer
                    .copy_from_slice(&self.fft_buffer[..block_size]);

                self.input_buffer.fill(0.);
                self.input_buffer_fill = 0;
                self.save_overlap();
                self.advance();
            }
        }
    }

    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn seg_count(&self) -> usize {
        self.seg_count
    }

    pub fn input_seg_count(&self) -> usize {
        self.input_seg_count
    }

    fn partition(&self) -> usize {
        self.fft_size - self.block_size
    }

    fn load_ir(&mut self, response: &[f32]) {
        let partition = self.partition();
        for i in 0..self.seg_count {
            let start = std::cmp::min(i * partition, response.len());
            let size_copy = std::cmp::min(partition, response.len() - start);
            copy_and_pad(&mut self.fft_buffer, &response[start..], size_copy);
            if self
                .fft
                .forward(&mut self.fft_buffer, &mut self.spectrum)
                .is_err()
            {
                debug_assert!(false, "impulse segment transform failed");
                self.segments_ir[i].fill(0.);
                continue;
            }
            pack_spectrum(&self.spectrum, &mut self.segments_ir[i]);
        }
        self.fft_buffer.fill(0.);
    }

    fn transform_input_segment(&mut self) -> Result<(), FftError> {
        copy_and_pad(&mut self.fft_buffer, &self.input_buffer, self.block_size);
        self.fft.forward(&mut self.fft_buffer, &mut self.spectrum)?;
        pack_spectrum(&self.spectrum, &mut self.segments[self.current]);
        Ok(())
    }

    /// Sums the products of the older input segments with impulse segments
    /// `1..seg_count`. Impulse segment `i` pairs with the input segment
    /// `i * step` blocks back.
    fn multiply_tail(&mut self) {
        self.pre_multiplied.fill(0.);
        let mut index = self.current;
        for i in 1..self.seg_count {
            index += self.step;
            if index >= self.input_seg_count {
                index -= self.input_seg_count;
            }
            complex_multiply_accumulate(
                &mut self.pre_multiplied,
                &self.segments[index],
                &self.segments_ir[i],
            );
        }
    }

    fn inverse_conv(&mut self) -> Result<(), FftError> {
        unpack_spectrum(&self.conv, &mut self.spectrum);
        self.fft.inverse(&mut self.spectrum, &mut self.fft_buffer)
    }

    fn save_overlap(&mut self) {
        let block_size = self.block_size;
        let fft_size = self.fft_size;
        // tail beyond the next block is carried forward, not replaced
        add_to_buffer(
            &mut self.fft_buffer[block_size..fft_size - block_size],
            &self.overlap[block_size..fft_size - block_size],
        );
        self.overlap
            .copy_from_slice(&self.fft_buffer[block_size..fft_size]);
    }

    fn advance(&mut self) {
        self.current = if self.current > 0 {
            self.current - 1
        } else {
            self.input_seg_count - 1
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_convolver_passthrough() {
        let mut response = [0.0; 1024];
        response[0] = 1.0;
        let mut convolver = ConvolutionEngine::init(&response, 1024);
        let input = vec![1.0; 1024];
        let mut output = vec![0.0; 1024];
        convolver.process(&input, &mut output);

        for i in 0..1024 {
            assert!((output[i] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn sizes_for_large_blocks() {
        let convolver = ConvolutionEngine::init(&[0.0; 1000], 300);
        assert_eq!(convolver.block_size(), 512);
        assert_eq!(convolver.fft_size(), 1024);
        assert_eq!(convolver.seg_count(), 3);
        assert_eq!(convolver.input_seg_count(), 3);
    }

    #[test]
    fn sizes_for_small_blocks() {
        let convolver = ConvolutionEngine::init(&[0.0; 1000], 64);
        assert_eq!(convolver.block_size(), 64);
        assert_eq!(convolver.fft_size(), 256);
        // partitions of 192 samples
        assert_eq!(convolver.seg_count(), 7);
        assert_eq!(convolver.input_seg_count(), 21);
    }

    #[test]
    fn small_block_factor_is_configurable() {
        let config = PartitionConfig {
            small_block_threshold: 128,
            small_block_fft_factor: 8,
        };
        let convolver = ConvolutionEngine::with_config(&[0.0; 1000], 64, &config);
        assert_eq!(convolver.fft_size(), 512);
        assert_eq!(convolver.seg_count(), 4);
        assert_eq!(convolver.input_seg_count(), 28);
    }

    #[test]
    fn reset_clears_history() {
        let response: Vec<f32> = (0..600).map(|i| 0.99f32.powi(i)).collect();
        let mut convolver = ConvolutionEngine::init(&response, 128);
        let input = vec![1.0; 512];
        let mut output = vec![0.0; 512];
        convolver.process(&input, &mut output);
        convolver.reset();

        let silence = vec![0.0; 512];
        convolver.process(&silence, &mut output);
        assert!(output.iter().all(|x| x.abs() < 1e-6));
    }
}

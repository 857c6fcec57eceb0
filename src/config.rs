use std::time::Duration;

/// Default interval between two background IR rebuild checks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// FIR length used at sample rates up to 48.1 kHz.
pub const DEFAULT_BASE_IR_SIZE: usize = 4096;

/// Partitioning knobs of the convolution engine.
///
/// Blocks of at most `small_block_threshold` samples use an FFT of
/// `small_block_fft_factor` times the block size; larger blocks use twice the
/// block size. With a factor `f` every impulse partition spans `f - 1` blocks,
/// so the engine keeps `f - 1` times as many input segments as impulse
/// segments and staggers the tail multiplications across callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionConfig {
    pub small_block_threshold: usize,
    pub small_block_fft_factor: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            small_block_threshold: 128,
            small_block_fft_factor: 4,
        }
    }
}

impl PartitionConfig {
    pub(crate) fn fft_factor(&self, block_size: usize) -> usize {
        if block_size > self.small_block_threshold {
            2
        } else {
            self.small_block_fft_factor
        }
    }
}

/// Which engine variant the equalizer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyMode {
    /// Zero added latency, FFT work done on every callback.
    #[default]
    Zero,
    /// One block of added latency, FFT work done once per full block.
    AddedBlock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EqConfig {
    pub base_ir_size: usize,
    /// `None` disables the builder thread; ticks are then driven by the caller
    /// through `LinearPhaseEq::run_background_tick`.
    pub tick_interval: Option<Duration>,
    pub latency: LatencyMode,
    pub partition: PartitionConfig,
}

impl Default for EqConfig {
    fn default() -> Self {
        Self {
            base_ir_size: DEFAULT_BASE_IR_SIZE,
            tick_interval: Some(DEFAULT_TICK_INTERVAL),
            latency: LatencyMode::default(),
            partition: PartitionConfig::default(),
        }
    }
}

impl EqConfig {
    /// Config for hosts (and tests) that drive the background tick themselves.
    pub fn manual() -> Self {
        Self {
            tick_interval: None,
            ..Self::default()
        }
    }

    /// FIR length for `sample_rate`: the base length, doubled for every octave
    /// above 48.1 kHz so the linear-phase delay covers the same time span.
    pub fn ir_size(&self, sample_rate: f64) -> usize {
        let mut size = self.base_ir_size;
        let mut limit = 48_100.0;
        while sample_rate > limit {
            size *= 2;
            limit *= 2.0;
        }
        size
    }
}

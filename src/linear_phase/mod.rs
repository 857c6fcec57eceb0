//! Linear-phase equalizer: a background-built FIR convolved on the audio
//! thread, with a three-state handoff between the two.

mod builder;
mod prototype;
mod timer;

pub use builder::IrBuilder;
pub use prototype::{BandKind, EqBand, EqParameters, ParametricEq, PrototypeFilter};
pub use timer::BackgroundTimer;

use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::{EqConfig, LatencyMode};
use crate::error::{Error, Result};
use crate::fft_convolver::ConvolutionEngine;
use crate::handoff::IrHandoff;
use crate::Convolution;

/// Where the resident IR stands relative to the requested parameters.
///
/// `Good -> Needed` on an accepted parameter change, `Needed -> Ready` once
/// the background tick has staged a new IR, `Ready -> Good` once the audio
/// thread has adopted it. No other transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrState {
    Good = 0,
    Needed = 1,
    Ready = 2,
}

impl IrState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IrState::Needed,
            2 => IrState::Ready,
            _ => IrState::Good,
        }
    }
}

#[derive(Debug)]
struct AtomicIrState(AtomicU8);

impl AtomicIrState {
    fn new(state: IrState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> IrState {
        IrState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: IrState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: IrState, to: IrState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct Shared<P: PrototypeFilter> {
    state: AtomicIrState,
    parameters: Mutex<P::Parameters>,
    handoff: Arc<IrHandoff>,
    builder: Mutex<IrBuilder<P>>,
}

impl<P: PrototypeFilter> Shared<P> {
    fn set_parameters(&self, parameters: P::Parameters) -> bool {
        let mut current = self.parameters.lock();
        if *current == parameters {
            return false;
        }
        // one rebuild in flight at most; later changes are dropped, not queued
        if !self.state.transition(IrState::Good, IrState::Needed) {
            debug!(
                "parameter change dropped, IR rebuild pending ({:?})",
                self.state.load()
            );
            return false;
        }
        *current = parameters;
        true
    }

    fn tick(&self) -> Result<bool> {
        if self.state.load() != IrState::Needed {
            return Ok(false);
        }

        let parameters = self.parameters.lock().clone();
        let mut builder = self.builder.lock();
        if !builder.is_prepared() {
            return Ok(false);
        }

        let ir = builder.build(&parameters)?;
        self.handoff.lock().set_new_ir(ir);
        self.state.transition(IrState::Needed, IrState::Ready);
        debug!("new IR staged ({} taps)", ir.len());
        Ok(true)
    }

    fn tick_logged(&self) {
        if let Err(err) = self.tick() {
            error!("IR rebuild failed: {err}");
            self.state.transition(IrState::Needed, IrState::Good);
        }
    }
}

/// Cloneable handle for changing parameters from non-real-time threads.
pub struct EqHandle<P: PrototypeFilter> {
    shared: Arc<Shared<P>>,
}

impl<P: PrototypeFilter> Clone for EqHandle<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: PrototypeFilter> EqHandle<P> {
    /// See [`LinearPhaseEq::set_parameters`].
    pub fn set_parameters(&self, parameters: P::Parameters) -> bool {
        self.shared.set_parameters(parameters)
    }

    pub fn state(&self) -> IrState {
        self.shared.state.load()
    }
}

/// Linear-phase equalizer built from a prototype filter.
///
/// `prepare`, `set_parameters` and `run_background_tick` belong to
/// non-real-time threads; `process_block` is the only audio-thread entry
/// point and never blocks or allocates.
pub struct LinearPhaseEq<P: PrototypeFilter> {
    shared: Arc<Shared<P>>,
    config: EqConfig,
    engines: Vec<ConvolutionEngine>,
    scratch: Vec<f32>,
    ir_size: usize,
    block_size: usize,
    timer: Option<BackgroundTimer>,
}

impl<P: PrototypeFilter> LinearPhaseEq<P> {
    pub fn new(prototype: P, parameters: P::Parameters, config: EqConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicIrState::new(IrState::Good),
                parameters: Mutex::new(parameters),
                handoff: Arc::new(IrHandoff::default()),
                builder: Mutex::new(IrBuilder::new(prototype)),
            }),
            config,
            engines: Vec::new(),
            scratch: Vec::new(),
            ir_size: 0,
            block_size: 0,
            timer: None,
        }
    }

    /// Builds the IR for the current parameters, allocates one engine per
    /// channel and starts the builder timer if one is configured.
    pub fn prepare(
        &mut self,
        sample_rate: f64,
        max_block_size: usize,
        num_channels: usize,
    ) -> Result<()> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        if max_block_size == 0 {
            return Err(Error::InvalidBlockSize);
        }
        if num_channels == 0 {
            return Err(Error::InvalidChannelCount);
        }

        self.timer = None;

        let ir_size = self.config.ir_size(sample_rate);
        {
            let parameters = self.shared.parameters.lock();
            let mut builder = self.shared.builder.lock();
            builder.prepare(sample_rate, ir_size);
            let ir = builder.build(&parameters)?;

            self.shared.handoff.lock().set_new_ir(ir);
            self.engines = (0..num_channels)
                .map(|_| ConvolutionEngine::with_config(ir, max_block_size, &self.config.partition))
                .collect();
            self.shared.state.store(IrState::Good);
        }

        self.scratch = vec![0.; max_block_size];
        self.ir_size = ir_size;
        self.block_size = self.engines[0].block_size();

        if let Some(interval) = self.config.tick_interval {
            let shared = self.shared.clone();
            self.timer = Some(BackgroundTimer::spawn("ir-builder", interval, move || {
                shared.tick_logged()
            })?);
        }

        info!(
            "linear-phase EQ prepared: {sample_rate} Hz, {num_channels} channels, \
             block {}, {ir_size} taps, latency {} samples",
            self.block_size,
            self.latency_samples()
        );
        Ok(())
    }

    /// Requests an IR for `parameters`.
    ///
    /// Ignored when equal to the current request. Also ignored, not queued,
    /// while a rebuild is pending (`Needed` or `Ready`): a change arriving in
    /// that window is lost until a different value is sent again. Returns
    /// whether the change was accepted.
    pub fn set_parameters(&self, parameters: P::Parameters) -> bool {
        self.shared.set_parameters(parameters)
    }

    pub fn handle(&self) -> EqHandle<P> {
        EqHandle {
            shared: self.shared.clone(),
        }
    }

    /// Runs one builder tick on the calling thread. This is what the timer
    /// thread does; hosts without one (`tick_interval: None`) call it from
    /// their own periodic callback. Returns whether a new IR was staged.
    pub fn run_background_tick(&self) -> Result<bool> {
        self.shared.tick()
    }

    /// Convolves every channel in place with the resident IR, adopting a
    /// staged IR first if one is ready and the handoff lock is free.
    pub fn process_block(&mut self, channels: &mut [&mut [f32]]) {
        debug_assert!(!self.engines.is_empty(), "process_block before prepare");
        debug_assert!(channels.len() <= self.engines.len());

        if self.shared.state.load() == IrState::Ready
            && self.shared.handoff.try_transfer(&mut self.engines)
        {
            self.shared.state.transition(IrState::Ready, IrState::Good);
        }

        if self.scratch.is_empty() {
            return;
        }

        let latency = self.config.latency;
        for (engine, channel) in self.engines.iter_mut().zip(channels.iter_mut()) {
            for chunk in channel.chunks_mut(self.scratch.len()) {
                let input = &mut self.scratch[..chunk.len()];
                input.copy_from_slice(chunk);
                match latency {
                    LatencyMode::Zero => engine.process(input, chunk),
                    LatencyMode::AddedBlock => engine.process_with_added_latency(input, chunk),
                }
            }
        }
    }

    /// Clears the convolution history, e.g. after a transport jump.
    pub fn reset(&mut self) {
        for engine in &mut self.engines {
            engine.reset();
        }
    }

    pub fn latency_samples(&self) -> usize {
        match self.config.latency {
            LatencyMode::Zero => self.ir_size / 2,
            LatencyMode::AddedBlock => self.ir_size / 2 + self.block_size,
        }
    }

    pub fn state(&self) -> IrState {
        self.shared.state.load()
    }

    pub fn current_parameters(&self) -> P::Parameters {
        self.shared.parameters.lock().clone()
    }

    pub fn ir_size(&self) -> usize {
        self.ir_size
    }

    pub fn num_channels(&self) -> usize {
        self.engines.len()
    }

    pub fn handoff(&self) -> Arc<IrHandoff> {
        self.shared.handoff.clone()
    }

    pub fn config(&self) -> &EqConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    const SAMPLE_RATE: f64 = 48_000.0;
    const BLOCK: usize = 256;

    fn manual_eq() -> LinearPhaseEq<ParametricEq> {
        let mut config = EqConfig::manual();
        config.base_ir_size = 512;
        let mut eq = LinearPhaseEq::new(ParametricEq::new(), EqParameters::flat(), config);
        eq.prepare(SAMPLE_RATE, BLOCK, 2).unwrap();
        eq
    }

    fn boost() -> EqParameters {
        EqParameters::flat().with_band(EqBand::peaking(1000.0, 6.0, 1.0))
    }

    fn cut() -> EqParameters {
        EqParameters::flat().with_band(EqBand::peaking(1000.0, -6.0, 1.0))
    }

    fn run_block(eq: &mut LinearPhaseEq<ParametricEq>, value: f32) -> Vec<f32> {
        let mut left = vec![value; BLOCK];
        let mut right = vec![value; BLOCK];
        eq.process_block(&mut [&mut left[..], &mut right[..]]);
        left
    }

    #[test]
    fn state_visits_needed_then_ready_then_good() {
        let mut eq = manual_eq();
        assert_eq!(eq.state(), IrState::Good);

        assert!(eq.set_parameters(boost()));
        assert_eq!(eq.state(), IrState::Needed);

        // the audio thread cannot skip from Needed to Good
        run_block(&mut eq, 0.0);
        assert_eq!(eq.state(), IrState::Needed);

        assert!(eq.run_background_tick().unwrap());
        assert_eq!(eq.state(), IrState::Ready);

        run_block(&mut eq, 0.0);
        assert_eq!(eq.state(), IrState::Good);
    }

    #[test]
    fn equal_parameters_are_a_no_op() {
        let eq = manual_eq();
        assert!(!eq.set_parameters(EqParameters::flat()));
        assert_eq!(eq.state(), IrState::Good);
        assert!(!eq.run_background_tick().unwrap());
    }

    #[test]
    fn second_change_while_pending_is_dropped() {
        let mut eq = manual_eq();
        assert!(eq.set_parameters(boost()));
        assert!(!eq.set_parameters(cut()));

        eq.run_background_tick().unwrap();
        assert!(!eq.set_parameters(cut()));
        assert_eq!(eq.state(), IrState::Ready);

        run_block(&mut eq, 0.0);
        assert_eq!(eq.state(), IrState::Good);
        assert_eq!(eq.current_parameters(), boost());

        // only a fresh request after the handoff gets through
        assert!(eq.set_parameters(cut()));
        assert_eq!(eq.state(), IrState::Needed);
    }

    #[test]
    fn held_lock_keeps_previous_ir() {
        let mut eq = manual_eq();
        eq.set_parameters(EqParameters::flat().with_band(EqBand::low_shelf(100.0, -12.0)));
        eq.run_background_tick().unwrap();

        let latency = eq.latency_samples();
        let handoff = eq.handoff();
        let staged = handoff.lock();
        let mut input = vec![0.0; BLOCK * 4];
        input[0] = 1.0;
        let mut output = Vec::new();
        for block in input.chunks(BLOCK) {
            let mut left = block.to_vec();
            let mut right = block.to_vec();
            // handoff busy: the flat IR stays resident
            eq.process_block(&mut [&mut left[..], &mut right[..]]);
            output.extend_from_slice(&left);
        }
        assert_eq!(eq.state(), IrState::Ready);
        for (i, y) in output.iter().enumerate() {
            let expected = if i == latency { 1.0 } else { 0.0 };
            assert!((y - expected).abs() < 1e-5, "sample {i}: {y}");
        }

        drop(staged);
        run_block(&mut eq, 0.0);
        assert_eq!(eq.state(), IrState::Good);
    }

    #[test]
    fn latency_is_half_the_ir() {
        let eq = manual_eq();
        assert_eq!(eq.ir_size(), 512);
        assert_eq!(eq.latency_samples(), 256);

        let mut config = EqConfig::manual();
        config.base_ir_size = 512;
        config.latency = LatencyMode::AddedBlock;
        let mut eq = LinearPhaseEq::new(ParametricEq::new(), EqParameters::flat(), config);
        eq.prepare(96_000.0, BLOCK, 1).unwrap();
        assert_eq!(eq.ir_size(), 1024);
        assert_eq!(eq.latency_samples(), 512 + BLOCK);
    }

    #[test]
    fn added_latency_mode_delays_by_ir_and_block() {
        let mut config = EqConfig::manual();
        config.base_ir_size = 512;
        config.latency = LatencyMode::AddedBlock;
        let mut eq = LinearPhaseEq::new(ParametricEq::new(), EqParameters::flat(), config);
        eq.prepare(SAMPLE_RATE, BLOCK, 1).unwrap();

        let latency = eq.latency_samples();
        let mut signal = vec![0.0; BLOCK * 6];
        signal[3] = 1.0;
        for block in signal.chunks_mut(BLOCK) {
            eq.process_block(&mut [block]);
        }
        for (i, y) in signal.iter().enumerate() {
            let expected = if i == latency + 3 { 1.0 } else { 0.0 };
            assert!((y - expected).abs() < 1e-5, "sample {i}: {y}");
        }
    }

    #[test]
    fn prepare_rejects_bad_arguments() {
        let mut eq = LinearPhaseEq::new(ParametricEq::new(), EqParameters::flat(), EqConfig::manual());
        assert!(matches!(
            eq.prepare(0.0, BLOCK, 2),
            Err(Error::InvalidSampleRate(_))
        ));
        assert!(matches!(
            eq.prepare(SAMPLE_RATE, 0, 2),
            Err(Error::InvalidBlockSize)
        ));
        assert!(matches!(
            eq.prepare(SAMPLE_RATE, BLOCK, 0),
            Err(Error::InvalidChannelCount)
        ));
    }

    #[test]
    fn handle_changes_parameters_from_another_thread() {
        let mut eq = manual_eq();
        let handle = eq.handle();
        std::thread::spawn(move || assert!(handle.set_parameters(boost())))
            .join()
            .unwrap();
        assert_eq!(eq.state(), IrState::Needed);
        eq.run_background_tick().unwrap();
        run_block(&mut eq, 0.0);
        assert_eq!(eq.current_parameters(), boost());
    }

    #[test]
    fn timer_thread_drives_the_rebuild() {
        let mut config = EqConfig::default();
        config.base_ir_size = 512;
        let mut eq = LinearPhaseEq::new(ParametricEq::new(), EqParameters::flat(), config);
        eq.prepare(SAMPLE_RATE, BLOCK, 2).unwrap();
        eq.set_parameters(boost());

        let start = Instant::now();
        while eq.state() != IrState::Good {
            assert!(start.elapsed() < Duration::from_secs(5), "rebuild never adopted");
            std::thread::sleep(Duration::from_millis(2));
            run_block(&mut eq, 0.0);
        }
        assert_eq!(eq.current_parameters(), boost());
    }
}

//! Band-unlimited oscillator

use dasp_graph::{Buffer, Input};
use crate::node::{AudioNode, ProcessContext};

/// Oscillator waveform
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// Parse a waveform name, falling back to sine
    pub fn from_name(name: &str) -> Self {
        match name {
            "square" => Waveform::Square,
            "sawtooth" | "saw" => Waveform::Sawtooth,
            "triangle" => Waveform::Triangle,
            _ => Waveform::Sine,
        }
    }

    #[inline]
    fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * core::f32::consts::TAU).sin(),
            Waveform::Square => if phase < 0.5 { 1.0 } else { -1.0 },
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Messages to control an Oscillator
#[derive(Clone, Copy, Debug)]
pub enum OscillatorMessage {
    SetFrequency(f32),
    /// Detune in cents
    SetDetune(f32),
    SetAmplitude(f32),
    SetWaveform(Waveform),
}

/// A periodic oscillator (mono source)
pub struct Oscillator {
    waveform: Waveform,
    frequency: f32,
    detune: f32,
    phase: f32,
    amplitude: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f32) -> Self {
        Self {
            waveform,
            frequency,
            detune: 0.0,
            phase: 0.0,
            amplitude: 0.25, // -12dB, safe default
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    pub fn with_detune(mut self, cents: f32) -> Self {
        self.detune = cents;
        self
    }

    /// Effective frequency after detune
    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency * (self.detune / 1200.0).exp2()
    }
}

impl AudioNode for Oscillator {
    type Message = OscillatorMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = OscillatorMessage>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                OscillatorMessage::SetFrequency(f) => self.frequency = f.max(0.0),
                OscillatorMessage::SetDetune(c) => self.detune = c,
                OscillatorMessage::SetAmplitude(a) => self.amplitude = a.clamp(0.0, 1.0),
                OscillatorMessage::SetWaveform(w) => self.waveform = w,
            }
        }

        let Some((first, rest)) = outputs.split_first_mut() else {
            return;
        };

        let phase_inc = self.frequency() / ctx.sample_rate as f32;
        let amplitude = self.amplitude;

        for sample in first.iter_mut() {
            *sample = self.waveform.sample(self.phase) * amplitude;
            self.phase += phase_inc;
            self.phase -= self.phase.floor();
        }

        for buffer in rest.iter_mut() {
            buffer.copy_from_slice(first);
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 0 }

    #[inline]
    fn num_outputs(&self) -> usize { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detune_shifts_by_cents() {
        let osc = Oscillator::new(Waveform::Sine, 440.0).with_detune(1200.0);
        assert!((osc.frequency() - 880.0).abs() < 1e-3);
    }

    #[test]
    fn square_stays_in_range() {
        let mut osc = Oscillator::new(Waveform::Square, 1000.0).with_amplitude(1.0);
        let ctx = ProcessContext { sample_rate: 48_000, buffer_size: 64 };
        let mut out = [Buffer::default()];
        osc.process(&ctx, core::iter::empty(), &[], &mut out);
        assert!(out[0].iter().all(|s| s.abs() == 1.0));
    }
}

//! Biquad filter effect (RBJ cookbook)

use alloc::vec::Vec;
use core::f32::consts::PI;

use dasp_graph::{Buffer, Input};
use crate::node::{input_sample, AudioNode, ProcessContext};

/// Filter response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
}

impl FilterMode {
    /// Parse a mode name, falling back to lowpass
    pub fn from_name(name: &str) -> Self {
        match name {
            "highpass" => FilterMode::Highpass,
            "bandpass" => FilterMode::Bandpass,
            "notch" => FilterMode::Notch,
            _ => FilterMode::Lowpass,
        }
    }
}

/// Messages to control a Biquad
#[derive(Clone, Copy, Debug)]
pub enum BiquadMessage {
    SetMode(FilterMode),
    SetFrequency(f32),
    SetQ(f32),
}

#[derive(Clone, Copy, Default)]
struct History {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

/// A second order filter with per-channel state
pub struct Biquad {
    mode: FilterMode,
    frequency: f32,
    q: f32,
    // b0, b1, b2, a1, a2 normalized by a0
    coeffs: [f32; 5],
    dirty: bool,
    history: Vec<History>,
}

impl Biquad {
    pub fn new(mode: FilterMode, frequency: f32, q: f32, channels: usize) -> Self {
        Self {
            mode,
            frequency,
            q,
            coeffs: [1.0, 0.0, 0.0, 0.0, 0.0],
            dirty: true,
            history: vec![History::default(); channels.max(1)],
        }
    }

    fn recalculate(&mut self, sample_rate: u32) {
        let nyquist = sample_rate as f32 * 0.5;
        let frequency = self.frequency.clamp(10.0, nyquist * 0.99);
        let q = self.q.max(0.01);

        let omega = 2.0 * PI * frequency / sample_rate as f32;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);

        let (b0, b1, b2) = match self.mode {
            FilterMode::Lowpass => ((1.0 - cos_omega) / 2.0, 1.0 - cos_omega, (1.0 - cos_omega) / 2.0),
            FilterMode::Highpass => ((1.0 + cos_omega) / 2.0, -(1.0 + cos_omega), (1.0 + cos_omega) / 2.0),
            FilterMode::Bandpass => (alpha, 0.0, -alpha),
            FilterMode::Notch => (1.0, -2.0 * cos_omega, 1.0),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        self.coeffs = [b0 / a0, b1 / a0, b2 / a0, a1 / a0, a2 / a0];
        self.dirty = false;
    }
}

impl AudioNode for Biquad {
    type Message = BiquadMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = BiquadMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                BiquadMessage::SetMode(m) => self.mode = m,
                BiquadMessage::SetFrequency(f) => self.frequency = f,
                BiquadMessage::SetQ(q) => self.q = q,
            }
            self.dirty = true;
        }
        if self.dirty {
            self.recalculate(ctx.sample_rate);
        }

        let [b0, b1, b2, a1, a2] = self.coeffs;
        for (ch, out) in outputs.iter_mut().enumerate() {
            let Some(h) = self.history.get_mut(ch) else {
                break;
            };
            for (i, sample) in out.iter_mut().enumerate() {
                let x = input_sample(inputs, ch, i);
                let y = b0 * x + b1 * h.x1 + b2 * h.x2 - a1 * h.y1 - a2 * h.y2;
                h.x2 = h.x1;
                h.x1 = x;
                h.y2 = h.y1;
                h.y1 = y;
                *sample = y;
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowpass_passes_dc() {
        let mut f = Biquad::new(FilterMode::Lowpass, 1000.0, 0.707, 1);
        f.recalculate(48_000);
        let [b0, b1, b2, a1, a2] = f.coeffs;
        let dc_gain = (b0 + b1 + b2) / (1.0 + a1 + a2);
        assert!((dc_gain - 1.0).abs() < 1e-3);
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut f = Biquad::new(FilterMode::Highpass, 1000.0, 0.707, 1);
        f.recalculate(48_000);
        let [b0, b1, b2, ..] = f.coeffs;
        assert!((b0 + b1 + b2).abs() < 1e-5);
    }
}

//! Gain/volume control effect

use dasp_graph::{Buffer, Input};
use crate::node::{input_sample, AudioNode, ProcessContext};

/// Messages to control gain
#[derive(Clone, Copy, Debug)]
pub enum GainMessage {
    /// Set the gain multiplier (1.0 = unity, 0.0 = silence)
    SetGain(f32),
}

/// A gain (volume) control that passes audio through with amplitude scaling
///
/// All inputs are summed first, so a gain doubles as a small mixer.
pub struct Gain {
    gain: f32,
    /// Smoothing to prevent clicks on rapid gain changes
    smoothed_gain: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
    channels: usize,
}

impl Gain {
    /// Create a new stereo gain node with the specified gain value
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            smoothed_gain: gain,
            smooth_coeff: 0.995, // ~7ms at 48kHz
            channels: 2,
        }
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(mut self) -> Self {
        self.smooth_coeff = 0.0;
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl AudioNode for Gain {
    type Message = GainMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = GainMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                GainMessage::SetGain(g) => self.gain = g,
            }
        }

        let smooth_coeff = self.smooth_coeff;
        let target_gain = self.gain;
        let start_gain = self.smoothed_gain;
        let mut end_gain = start_gain;

        for (ch, out_buffer) in outputs.iter_mut().enumerate() {
            // Every channel follows the same gain curve
            let mut gain = start_gain;
            for (i, out_sample) in out_buffer.iter_mut().enumerate() {
                gain = target_gain + smooth_coeff * (gain - target_gain);
                *out_sample = input_sample(inputs, ch, i) * gain;
            }
            if ch == 0 {
                end_gain = gain;
            }
        }

        self.smoothed_gain = end_gain;
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }
}

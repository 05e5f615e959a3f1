//! Feedback delay effect

use alloc::vec::Vec;

use dasp_graph::{Buffer, Input};
use crate::node::{input_sample, AudioNode, ProcessContext};

/// Longest delay the line can hold
pub const MAX_DELAY_SECS: f32 = 5.0;

/// Messages to control a Delay
#[derive(Clone, Copy, Debug)]
pub enum DelayMessage {
    /// Delay time in seconds
    SetTime(f32),
    /// Feedback amount (0.0 - 0.95)
    SetFeedback(f32),
    /// Dry/wet mix (0.0 = dry, 1.0 = wet)
    SetMix(f32),
}

/// A feedback delay line with one ring per channel
pub struct Delay {
    lines: Vec<Vec<f32>>,
    write: usize,
    time: f32,
    feedback: f32,
    mix: f32,
}

impl Delay {
    /// Allocates `MAX_DELAY_SECS` of memory per channel up front.
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let len = (sample_rate as f32 * MAX_DELAY_SECS) as usize + 1;
        Self {
            lines: vec![vec![0.0; len]; channels.max(1)],
            write: 0,
            time: 0.25,
            feedback: 0.3,
            mix: 0.5,
        }
    }

    pub fn with_params(mut self, time: f32, feedback: f32, mix: f32) -> Self {
        self.time = time.clamp(0.0, MAX_DELAY_SECS);
        self.feedback = feedback.clamp(0.0, 0.95);
        self.mix = mix.clamp(0.0, 1.0);
        self
    }
}

impl AudioNode for Delay {
    type Message = DelayMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = DelayMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                DelayMessage::SetTime(t) => self.time = t.clamp(0.0, MAX_DELAY_SECS),
                DelayMessage::SetFeedback(f) => self.feedback = f.clamp(0.0, 0.95),
                DelayMessage::SetMix(m) => self.mix = m.clamp(0.0, 1.0),
            }
        }

        let Some(len) = self.lines.first().map(Vec::len) else {
            return;
        };
        let offset = ((self.time * ctx.sample_rate as f32) as usize).clamp(1, len - 1);
        let start = self.write;

        for (ch, out) in outputs.iter_mut().enumerate() {
            let Some(line) = self.lines.get_mut(ch) else {
                break;
            };
            let mut write = start;
            for (i, sample) in out.iter_mut().enumerate() {
                let x = input_sample(inputs, ch, i);
                let delayed = line[(write + len - offset) % len];
                line[write] = x + delayed * self.feedback;
                *sample = x * (1.0 - self.mix) + delayed * self.mix;
                write = (write + 1) % len;
            }
        }

        self.write = (start + outputs.first().map_or(0, |b| b.len())) % len;
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.lines.len()
    }
}

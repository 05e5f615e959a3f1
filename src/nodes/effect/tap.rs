//! Pass-through taps that stream audio data back to the orchestration thread

use dasp_graph::{Buffer, Input};
use rtrb::Producer;

use crate::node::{input_sample, AudioNode, ProcessContext};

/// Signal level of one block
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Level {
    pub rms: f32,
    pub peak: f32,
}

#[inline]
fn pass_through(inputs: &[Input], outputs: &mut [Buffer]) {
    for (ch, out) in outputs.iter_mut().enumerate() {
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = input_sample(inputs, ch, i);
        }
    }
}

/// Messages to control a Recorder
#[derive(Clone, Copy, Debug)]
pub enum RecorderMessage {
    /// Start (`true`) or stop (`false`) capturing
    Arm(bool),
}

/// Passes audio through and, while armed, pushes the mono mixdown of each
/// block into a ring buffer.
///
/// Blocks that don't fit are dropped whole.
pub struct Recorder {
    producer: Producer<f32>,
    armed: bool,
    channels: usize,
}

impl Recorder {
    pub fn new(producer: Producer<f32>, channels: usize) -> Self {
        Self {
            producer,
            armed: false,
            channels: channels.max(1),
        }
    }
}

impl AudioNode for Recorder {
    type Message = RecorderMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = RecorderMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for RecorderMessage::Arm(armed) in messages {
            self.armed = armed;
        }

        pass_through(inputs, outputs);

        if !self.armed || outputs.is_empty() {
            return;
        }
        let len = outputs[0].len();
        if self.producer.slots() < len {
            return;
        }
        let scale = 1.0 / outputs.len() as f32;
        for i in 0..len {
            let mono: f32 = outputs.iter().map(|b| b[i]).sum();
            let _ = self.producer.push(mono * scale);
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }
}

/// Passes audio through and reports the [`Level`] of every block
pub struct Analyzer {
    producer: Producer<Level>,
    channels: usize,
}

impl Analyzer {
    pub fn new(producer: Producer<Level>, channels: usize) -> Self {
        Self {
            producer,
            channels: channels.max(1),
        }
    }
}

impl AudioNode for Analyzer {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        pass_through(inputs, outputs);

        let mut sum = 0.0;
        let mut peak: f32 = 0.0;
        let mut count = 0usize;
        for buffer in outputs.iter() {
            for &s in buffer.iter() {
                sum += s * s;
                peak = peak.max(s.abs());
                count += 1;
            }
        }
        if count == 0 {
            return;
        }

        // Full queue: the orchestration side is behind, drop this block's level
        let _ = self.producer.push(Level {
            rms: (sum / count as f32).sqrt(),
            peak,
        });
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;

    #[test]
    fn recorder_only_captures_while_armed() {
        let (producer, mut consumer) = RingBuffer::new(1024);
        let mut rec = Recorder::new(producer, 1);
        let ctx = ProcessContext { sample_rate: 48_000, buffer_size: 64 };
        let mut out = [Buffer::default()];

        rec.process(&ctx, core::iter::empty(), &[], &mut out);
        assert_eq!(consumer.slots(), 0);

        rec.process(&ctx, core::iter::once(RecorderMessage::Arm(true)), &[], &mut out);
        assert_eq!(consumer.slots(), 64);

        rec.process(&ctx, core::iter::once(RecorderMessage::Arm(false)), &[], &mut out);
        assert_eq!(consumer.slots(), 64);
        assert_eq!(consumer.pop(), Ok(0.0));
    }
}

//! Capture source - plays samples arriving from an input device

use dasp_graph::{Buffer, Input};
use rtrb::Consumer;

use crate::node::{AudioNode, ProcessContext};

/// Reads mono samples pushed by a capture stream.
///
/// Underruns produce silence; the source never waits.
pub struct CaptureSource {
    consumer: Consumer<f32>,
    gain: f32,
}

impl CaptureSource {
    pub fn new(consumer: Consumer<f32>) -> Self {
        Self { consumer, gain: 1.0 }
    }
}

impl AudioNode for CaptureSource {
    /// Input gain
    type Message = f32;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = f32>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        if let Some(gain) = messages.last() {
            self.gain = gain.max(0.0);
        }

        let Some((first, rest)) = outputs.split_first_mut() else {
            return;
        };

        for sample in first.iter_mut() {
            *sample = self.consumer.pop().unwrap_or(0.0) * self.gain;
        }
        for buffer in rest.iter_mut() {
            buffer.copy_from_slice(first);
        }
    }

    #[inline]
    fn num_outputs(&self) -> usize { 1 }
}

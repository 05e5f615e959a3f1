//! Mixer effect - sums multiple inputs together

use dasp_graph::{Buffer, Input};
use crate::node::{input_sample, AudioNode, ProcessContext};

/// A mixer that sums multiple inputs together
///
/// Each input is summed with equal weight. The output has `channels` channels.
/// If an input has fewer channels, its last channel is reused (mono→stereo
/// copies to both). If an input has more channels, extra channels are ignored.
///
/// Used for bus nodes and for the engine's destination.
pub struct Mixer {
    channels: usize,
}

impl Mixer {
    /// Create a new mixer with the specified number of output channels
    pub fn new(channels: usize) -> Self {
        Self { channels: channels.max(1) }
    }

    /// Create a stereo mixer
    pub fn stereo() -> Self {
        Self::new(2)
    }

    /// Create a mono mixer
    pub fn mono() -> Self {
        Self::new(1)
    }
}

impl AudioNode for Mixer {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        output: &mut [Buffer],
    ) {
        for (ch, out_buf) in output.iter_mut().enumerate() {
            for (i, out_sample) in out_buf.iter_mut().enumerate() {
                *out_sample = input_sample(inputs, ch, i);
            }
        }
    }

    fn num_inputs(&self) -> usize {
        // Accept any number of inputs
        usize::MAX
    }

    fn num_outputs(&self) -> usize {
        self.channels
    }
}

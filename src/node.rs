//! Core primitive trait and context types.

use dasp_graph::{Buffer, Input};

/// Information available during audio processing.
///
/// Passed to every [`AudioNode::process`] call. Contains the engine's sample
/// rate and the buffer size (always 64 samples, fixed by `dasp_graph`).
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the engine in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of samples per buffer (currently always 64)
    pub buffer_size: usize,
}

/// Identifier of a primitive inside an [`AudioEngine`](crate::AudioEngine).
///
/// Stable for the primitive's whole life, including across
/// [`replace`](crate::AudioEngine::replace): a hot-swapped primitive keeps its
/// id, so anything that recorded the id stays valid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PrimitiveId(pub(crate) u32);

/// The core trait for audio primitives.
///
/// Primitives come in three flavours:
/// - **Sources**: generate audio (0 inputs, 1+ outputs) - oscillators, sample players, capture
/// - **Effects**: process audio (1 input, 1+ outputs) - gain, filters, delays, worklets
/// - **Sinks**: consume audio (1 input, 0 outputs) - device output, ring buffers
///
/// # Message-Based Parameters
///
/// Primitives never share mutable state with the orchestration thread. Units
/// send parameter updates as messages, which are drained at the start of each
/// block:
///
/// ```
/// use klangnetz::{AudioNode, ProcessContext};
/// use dasp_graph::{Buffer, Input};
///
/// enum LevelMessage {
///     SetLevel(f32),
/// }
///
/// struct Level {
///     level: f32,
/// }
///
/// impl AudioNode for Level {
///     type Message = LevelMessage;
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = LevelMessage>,
///         _inputs: &[Input],
///         outputs: &mut [Buffer],
///     ) {
///         for msg in messages {
///             match msg {
///                 LevelMessage::SetLevel(l) => self.level = l,
///             }
///         }
///         for sample in outputs[0].iter_mut() {
///             *sample = self.level;
///         }
///     }
/// }
/// ```
pub trait AudioNode: Send + 'static {
    /// Message type for parameter updates.
    ///
    /// Use a custom enum for primitives with parameters, or `()` for those without.
    type Message: Send + 'static;

    /// Process one block of audio.
    ///
    /// Called once per audio block (64 samples). Your implementation should:
    /// 1. Drain and handle all pending messages
    /// 2. Read from `inputs` (if any)
    /// 3. Write to `outputs`
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    );

    /// Number of audio input channels (0 for sources).
    fn num_inputs(&self) -> usize { 0 }

    /// Number of audio output channels.
    fn num_outputs(&self) -> usize { 1 }
}

/// Sample `index` of `channel`, summed over all inputs. Inputs with fewer
/// channels contribute their last channel.
#[inline]
pub(crate) fn input_sample(inputs: &[Input], channel: usize, index: usize) -> f32 {
    let mut sum = 0.0;
    for input in inputs {
        let buffers = input.buffers();
        if buffers.is_empty() {
            continue;
        }
        let ch = channel.min(buffers.len() - 1);
        sum += buffers[ch][index];
    }
    sum
}

/// Zero every output buffer.
#[inline]
pub(crate) fn silence(outputs: &mut [Buffer]) {
    for buffer in outputs.iter_mut() {
        buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

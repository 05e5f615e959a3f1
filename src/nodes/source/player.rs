//! Segment sample player.

use alloc::sync::Arc;
use alloc::vec::Vec;
use dasp_graph::{Buffer, Input};
use crate::node::{silence, AudioNode, ProcessContext};

/// Decoded audio shared between the orchestration thread and players.
///
/// Samples are interleaved. Cloning is cheap: the data is reference counted.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    channels: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap interleaved samples.
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Interleaved sample data.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in frames.
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Length in seconds.
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Frame index of a time in seconds, clamped to the buffer.
    #[inline]
    pub fn frame_at(&self, secs: f64) -> usize {
        ((secs.max(0.0) * self.sample_rate as f64) as usize).min(self.frames())
    }

    #[inline]
    fn frame_sample(&self, frame: usize, channel: usize) -> f32 {
        let ch = channel % self.channels;
        self.samples.get(frame * self.channels + ch).copied().unwrap_or(0.0)
    }
}

/// Messages to control a [`SamplePlayer`].
#[derive(Clone, Debug)]
pub enum PlayerMessage {
    /// Play frames `start..end` at `rate` source frames per output frame.
    Play { start: usize, end: usize, rate: f64 },
    /// Stop playback.
    Stop,
    /// Set playback volume (0.0 to 2.0, where 1.0 is unity gain).
    SetVolume(f32),
    /// Swap the buffer. Playback stops.
    Load(AudioBuffer),
}

/// Plays regions of a shared [`AudioBuffer`].
///
/// Each [`PlayerMessage::Play`] starts a region from its first frame, at a
/// playback rate that folds in both repitching and the ratio between the
/// buffer's sample rate and the engine's. Reading is linearly interpolated.
pub struct SamplePlayer {
    buffer: Option<AudioBuffer>,
    channels: usize,
    position: f64,
    end: usize,
    rate: f64,
    playing: bool,
    volume: f32,
}

impl SamplePlayer {
    /// Create a stopped player with `channels` outputs.
    pub fn new(buffer: Option<AudioBuffer>, channels: usize) -> Self {
        Self {
            buffer,
            channels: channels.max(1),
            position: 0.0,
            end: 0,
            rate: 1.0,
            playing: false,
            volume: 1.0,
        }
    }

    /// Check if playback is currently active.
    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

impl AudioNode for SamplePlayer {
    type Message = PlayerMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = PlayerMessage>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                PlayerMessage::Play { start, end, rate } => {
                    if let Some(buffer) = &self.buffer {
                        self.end = end.min(buffer.frames());
                        self.position = start.min(self.end) as f64;
                        self.rate = rate.max(0.0);
                        self.playing = true;
                    }
                }
                PlayerMessage::Stop => self.playing = false,
                PlayerMessage::SetVolume(v) => self.volume = v.clamp(0.0, 2.0),
                PlayerMessage::Load(buffer) => {
                    self.buffer = Some(buffer);
                    self.playing = false;
                }
            }
        }

        silence(outputs);

        let Some(buffer) = &self.buffer else {
            return;
        };
        if !self.playing || outputs.is_empty() {
            return;
        }

        let buffer_len = outputs[0].len();
        for i in 0..buffer_len {
            let frame = self.position as usize;
            if frame + 1 >= self.end {
                self.playing = false;
                return;
            }
            let frac = (self.position - frame as f64) as f32;

            for (ch, out) in outputs.iter_mut().enumerate() {
                let a = buffer.frame_sample(frame, ch);
                let b = buffer.frame_sample(frame + 1, ch);
                out[i] = (a + (b - a) * frac) * self.volume;
            }

            self.position += self.rate;
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 0 }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels
    }
}

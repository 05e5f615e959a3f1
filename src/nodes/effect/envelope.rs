//! ADSR envelope applied as a VCA

use dasp_graph::{Buffer, Input};
use crate::node::{input_sample, AudioNode, ProcessContext};

/// Messages to control an Envelope
#[derive(Clone, Copy, Debug)]
pub enum EnvelopeMessage {
    /// Gate on starts the attack, gate off starts the release
    Gate(bool),
    /// Attack, decay and release in milliseconds, sustain level 0.0 - 1.0
    SetAdsr { attack: f32, decay: f32, sustain: f32, release: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Multiplies its input by an ADSR contour
pub struct Envelope {
    stage: Stage,
    level: f32,
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
    channels: usize,
}

impl Envelope {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32, channels: usize) -> Self {
        Self {
            stage: Stage::Idle,
            level: 0.0,
            attack: attack.max(0.0),
            decay: decay.max(0.0),
            sustain: sustain.clamp(0.0, 1.0),
            release: release.max(0.0),
            channels: channels.max(1),
        }
    }

    /// Per-sample step for a linear segment of `ms` milliseconds
    #[inline]
    fn step(ms: f32, sample_rate: u32) -> f32 {
        1.0 / (ms * sample_rate as f32 / 1000.0).max(1.0)
    }

    #[inline]
    fn advance(&mut self, sample_rate: u32) -> f32 {
        match self.stage {
            Stage::Idle => self.level = 0.0,
            Stage::Attack => {
                self.level += Self::step(self.attack, sample_rate);
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                self.level -= Self::step(self.decay, sample_rate) * (1.0 - self.sustain);
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => self.level = self.sustain,
            Stage::Release => {
                self.level -= Self::step(self.release, sample_rate);
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }
        self.level
    }
}

impl AudioNode for Envelope {
    type Message = EnvelopeMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = EnvelopeMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                EnvelopeMessage::Gate(true) => self.stage = Stage::Attack,
                EnvelopeMessage::Gate(false) => {
                    if self.stage != Stage::Idle {
                        self.stage = Stage::Release;
                    }
                }
                EnvelopeMessage::SetAdsr { attack, decay, sustain, release } => {
                    self.attack = attack.max(0.0);
                    self.decay = decay.max(0.0);
                    self.sustain = sustain.clamp(0.0, 1.0);
                    self.release = release.max(0.0);
                }
            }
        }

        let len = outputs.first().map_or(0, |b| b.len());
        for i in 0..len {
            let level = self.advance(ctx.sample_rate);
            for (ch, out) in outputs.iter_mut().enumerate() {
                out[i] = input_sample(inputs, ch, i) * level;
            }
        }
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

    #[test]
    fn gate_cycle_returns_to_idle() {
        let mut env = Envelope::new(1.0, 1.0, 0.5, 1.0, 1);
        env.stage = Stage::Attack;
        for _ in 0..200 {
            env.advance(48_000);
        }
        assert_eq!(env.stage, Stage::Sustain);
        assert_eq!(env.level, 0.5);

        env.stage = Stage::Release;
        for _ in 0..200 {
            env.advance(48_000);
        }
        assert_eq!(env.stage, Stage::Idle);
    }
}

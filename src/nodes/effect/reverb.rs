//! Small Schroeder reverb

use alloc::vec::Vec;

use dasp_graph::{Buffer, Input};
use crate::node::{input_sample, AudioNode, ProcessContext};

// Comb and allpass lengths at 44.1kHz, scaled to the engine rate.
const COMBS: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASSES: [usize; 2] = [556, 441];
// Decorrelates channels
const STEREO_SPREAD: usize = 23;

/// Messages to control a Reverb
#[derive(Clone, Copy, Debug)]
pub enum ReverbMessage {
    /// Tail length (0.0 - 1.0)
    SetDecay(f32),
    /// Dry/wet mix (0.0 = dry, 1.0 = wet)
    SetMix(f32),
}

struct Line {
    buf: Vec<f32>,
    pos: usize,
}

impl Line {
    fn new(len: usize) -> Self {
        Self { buf: vec![0.0; len.max(1)], pos: 0 }
    }

    #[inline]
    fn comb(&mut self, x: f32, feedback: f32) -> f32 {
        let out = self.buf[self.pos];
        self.buf[self.pos] = x + out * feedback;
        self.pos = (self.pos + 1) % self.buf.len();
        out
    }

    #[inline]
    fn allpass(&mut self, x: f32) -> f32 {
        let delayed = self.buf[self.pos];
        let out = delayed - x;
        self.buf[self.pos] = x + delayed * 0.5;
        self.pos = (self.pos + 1) % self.buf.len();
        out
    }
}

struct Channel {
    combs: Vec<Line>,
    allpasses: Vec<Line>,
}

/// Four parallel combs into two series allpasses, per channel
pub struct Reverb {
    channels: Vec<Channel>,
    decay: f32,
    mix: f32,
}

impl Reverb {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let scale = sample_rate as f32 / 44_100.0;
        let sized = |len: usize, ch: usize| ((len + ch * STEREO_SPREAD) as f32 * scale) as usize;
        let channels = (0..channels.max(1))
            .map(|ch| Channel {
                combs: COMBS.iter().map(|&l| Line::new(sized(l, ch))).collect(),
                allpasses: ALLPASSES.iter().map(|&l| Line::new(sized(l, ch))).collect(),
            })
            .collect();
        Self { channels, decay: 0.5, mix: 0.3 }
    }

    pub fn with_params(mut self, decay: f32, mix: f32) -> Self {
        self.decay = decay.clamp(0.0, 1.0);
        self.mix = mix.clamp(0.0, 1.0);
        self
    }
}

impl AudioNode for Reverb {
    type Message = ReverbMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = ReverbMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                ReverbMessage::SetDecay(d) => self.decay = d.clamp(0.0, 1.0),
                ReverbMessage::SetMix(m) => self.mix = m.clamp(0.0, 1.0),
            }
        }

        let feedback = 0.7 + 0.28 * self.decay;
        let mix = self.mix;

        for (ch, out) in outputs.iter_mut().enumerate() {
            let Some(state) = self.channels.get_mut(ch) else {
                break;
            };
            for (i, sample) in out.iter_mut().enumerate() {
                let x = input_sample(inputs, ch, i);
                let mut wet: f32 = state.combs.iter_mut().map(|c| c.comb(x, feedback)).sum::<f32>() * 0.25;
                for ap in state.allpasses.iter_mut() {
                    wet = ap.allpass(wet);
                }
                *sample = x * (1.0 - mix) + wet * mix;
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels.len()
    }
}

//! Equal-power stereo panner

use core::f32::consts::FRAC_PI_4;

use dasp_graph::{Buffer, Input};
use crate::node::{input_sample, AudioNode, ProcessContext};

/// Pan position, -1.0 (left) to 1.0 (right)
#[derive(Clone, Copy, Debug)]
pub struct SetPan(pub f32);

/// Mono in (inputs are summed to mono), stereo out
pub struct Panner {
    pan: f32,
}

impl Panner {
    pub fn new(pan: f32) -> Self {
        Self { pan: pan.clamp(-1.0, 1.0) }
    }

    #[inline]
    fn gains(&self) -> (f32, f32) {
        let angle = (self.pan + 1.0) * FRAC_PI_4;
        (angle.cos(), angle.sin())
    }
}

impl AudioNode for Panner {
    type Message = SetPan;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = SetPan>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        if let Some(SetPan(p)) = messages.last() {
            self.pan = p.clamp(-1.0, 1.0);
        }

        let (left, right) = self.gains();
        let [l, r] = outputs else {
            return;
        };
        for i in 0..l.len() {
            let x = input_sample(inputs, 0, i);
            l[i] = x * left;
            r[i] = x * right;
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 2 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_equal_power() {
        let (l, r) = Panner::new(0.0).gains();
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-5);
    }
}

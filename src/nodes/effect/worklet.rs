//! Worklets - primitives whose per-sample kernel is compiled at runtime.
//!
//! A [`WorkletSource`] describes the processing code: a formula in the
//! sandboxed expression language, a noise generator, or a set of IIR
//! coefficients. Compiling it yields a [`Kernel`] that runs on the audio
//! thread. Kernels are never edited in place; changing the code means
//! compiling a new [`Worklet`] and swapping it in with
//! [`AudioEngine::replace`](crate::AudioEngine::replace).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use dasp_graph::{Buffer, Input};

use crate::error::CompileError;
use crate::expr::Expression;
use crate::node::{input_sample, AudioNode, ProcessContext};

/// Longest IIR accepted, per coefficient list
pub const MAX_IIR_ORDER: usize = 32;

/// Variables every formula can read, in binding order
pub const FORMULA_VARS: [&str; 4] = ["x", "t", "n", "sr"];

/// Noise spectrum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
}

impl NoiseColor {
    /// Parse a color name, falling back to white
    pub fn from_name(name: &str) -> Self {
        match name {
            "pink" => NoiseColor::Pink,
            "brown" | "brownian" | "red" => NoiseColor::Brown,
            _ => NoiseColor::White,
        }
    }
}

/// Processing code for a worklet.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkletSource {
    /// An expression over [`FORMULA_VARS`] plus named controls. Control
    /// values can change without recompiling.
    Formula {
        source: String,
        controls: Vec<(String, f64)>,
    },
    /// A noise generator (no audio input).
    Noise(NoiseColor),
    /// A direct form I filter: `feedforward` (b) and `feedback` (a)
    /// coefficients, `a[0]` normalizing.
    Iir {
        feedforward: Vec<f64>,
        feedback: Vec<f64>,
    },
}

impl WorkletSource {
    /// True if the worklet generates audio instead of processing its input.
    pub fn is_generator(&self) -> bool {
        matches!(self, WorkletSource::Noise(_))
    }

    /// True if both sources compile to the same code. Formula control values
    /// are ignored since they are sent as messages.
    pub fn same_code(&self, other: &WorkletSource) -> bool {
        match (self, other) {
            (
                WorkletSource::Formula { source: a, controls: ca },
                WorkletSource::Formula { source: b, controls: cb },
            ) => a == b && ca.iter().map(|(n, _)| n).eq(cb.iter().map(|(n, _)| n)),
            (a, b) => a == b,
        }
    }

    /// Control values of a formula, in slot order.
    pub fn control_values(&self) -> impl Iterator<Item = f64> + '_ {
        let controls = match self {
            WorkletSource::Formula { controls, .. } => controls.as_slice(),
            _ => &[],
        };
        controls.iter().map(|(_, v)| *v)
    }

    /// Compile a kernel for one channel.
    pub fn compile(&self, sample_rate: u32, channel: usize) -> Result<Box<dyn Kernel + Send>, CompileError> {
        match self {
            WorkletSource::Formula { source, controls } => {
                let mut names: Vec<&str> = FORMULA_VARS.to_vec();
                names.extend(controls.iter().map(|(n, _)| n.as_str()));
                let expr = Expression::compile(source, &names)?;

                let mut values = vec![0.0; names.len()];
                values[3] = sample_rate as f64;
                for (slot, (_, v)) in controls.iter().enumerate() {
                    values[FORMULA_VARS.len() + slot] = *v;
                }
                Ok(Box::new(FormulaKernel { expr, values, n: 0 }))
            }
            WorkletSource::Noise(color) => Ok(Box::new(NoiseKernel::new(*color, channel))),
            WorkletSource::Iir { feedforward, feedback } => {
                Ok(Box::new(IirKernel::new(feedforward, feedback)?))
            }
        }
    }
}

/// Per-sample processing compiled from a [`WorkletSource`].
pub trait Kernel {
    /// Produce one output sample from one input sample.
    fn tick(&mut self, x: f32) -> f32;

    /// Update a control slot. Kernels without controls ignore this.
    fn set(&mut self, _slot: usize, _value: f64) {}
}

struct FormulaKernel {
    expr: Expression,
    values: Vec<f64>,
    n: u64,
}

impl Kernel for FormulaKernel {
    #[inline]
    fn tick(&mut self, x: f32) -> f32 {
        let sr = self.values[3];
        self.values[0] = x as f64;
        self.values[1] = self.n as f64 / sr;
        self.values[2] = self.n as f64;
        self.n += 1;

        let y = self.expr.eval_unchecked(&self.values) as f32;
        if y.is_finite() { y } else { 0.0 }
    }

    fn set(&mut self, slot: usize, value: f64) {
        if let Some(v) = self.values.get_mut(FORMULA_VARS.len() + slot) {
            *v = value;
        }
    }
}

struct NoiseKernel {
    color: NoiseColor,
    state: u32,
    pink: [f32; 3],
    brown: f32,
}

impl NoiseKernel {
    fn new(color: NoiseColor, channel: usize) -> Self {
        Self {
            color,
            state: 0x9E37_79B9 ^ (channel as u32).wrapping_mul(0x85EB_CA6B) | 1,
            pink: [0.0; 3],
            brown: 0.0,
        }
    }

    // xorshift32, mapped to -1.0..1.0
    #[inline]
    fn white(&mut self) -> f32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

impl Kernel for NoiseKernel {
    #[inline]
    fn tick(&mut self, _x: f32) -> f32 {
        let white = self.white();
        match self.color {
            NoiseColor::White => white * 0.5,
            NoiseColor::Pink => {
                // Paul Kellet's economy filter
                let p = &mut self.pink;
                p[0] = 0.99765 * p[0] + white * 0.099_046;
                p[1] = 0.963 * p[1] + white * 0.296_516_4;
                p[2] = 0.57 * p[2] + white * 1.052_691_3;
                (p[0] + p[1] + p[2] + white * 0.1848) * 0.11
            }
            NoiseColor::Brown => {
                self.brown = (self.brown + 0.02 * white) / 1.02;
                self.brown * 3.5
            }
        }
    }
}

struct IirKernel {
    b: Vec<f64>,
    a: Vec<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl IirKernel {
    fn new(feedforward: &[f64], feedback: &[f64]) -> Result<Self, CompileError> {
        if feedforward.is_empty() || feedback.is_empty() {
            return Err(CompileError::Coefficients("both coefficient lists must be non-empty".into()));
        }
        if feedforward.len() > MAX_IIR_ORDER || feedback.len() > MAX_IIR_ORDER {
            return Err(CompileError::Coefficients(format!("at most {MAX_IIR_ORDER} coefficients per list")));
        }
        if feedforward.iter().chain(feedback).any(|c| !c.is_finite()) {
            return Err(CompileError::Coefficients("coefficients must be finite".into()));
        }
        let a0 = feedback[0];
        if a0 == 0.0 {
            return Err(CompileError::Coefficients("a[0] must not be zero".into()));
        }

        Ok(Self {
            b: feedforward.iter().map(|c| c / a0).collect(),
            a: feedback.iter().map(|c| c / a0).collect(),
            x: vec![0.0; feedforward.len()],
            y: vec![0.0; feedback.len()],
        })
    }
}

impl Kernel for IirKernel {
    #[inline]
    fn tick(&mut self, input: f32) -> f32 {
        // x[k] is x[n-k]; y[k] is y[n-1-k] until the output is pushed
        self.x.rotate_right(1);
        self.x[0] = input as f64;

        let forward: f64 = self.b.iter().zip(&self.x).map(|(b, x)| b * x).sum();
        let back: f64 = self.a.iter().skip(1).zip(&self.y).map(|(a, y)| a * y).sum();
        let mut out = forward - back;
        if !out.is_finite() {
            // An unstable filter resets instead of poisoning the graph
            self.x.iter_mut().for_each(|v| *v = 0.0);
            self.y.iter_mut().for_each(|v| *v = 0.0);
            out = 0.0;
        }

        self.y.rotate_right(1);
        self.y[0] = out;
        out as f32
    }
}

/// Messages to control a Worklet
#[derive(Clone, Copy, Debug)]
pub enum WorkletMessage {
    /// Set a formula control slot on every channel
    Set { slot: usize, value: f64 },
}

/// A primitive running one compiled kernel per channel
pub struct Worklet {
    kernels: Vec<Box<dyn Kernel + Send>>,
    generator: bool,
}

impl Worklet {
    /// Compile `source` for `channels` channels.
    pub fn compile(source: &WorkletSource, sample_rate: u32, channels: usize) -> Result<Self, CompileError> {
        let kernels = (0..channels.max(1))
            .map(|ch| source.compile(sample_rate, ch))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kernels,
            generator: source.is_generator(),
        })
    }
}

impl AudioNode for Worklet {
    type Message = WorkletMessage;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = WorkletMessage>,
        inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                WorkletMessage::Set { slot, value } => {
                    self.kernels.iter_mut().for_each(|k| k.set(slot, value));
                }
            }
        }

        for (ch, (out, kernel)) in outputs.iter_mut().zip(self.kernels.iter_mut()).enumerate() {
            for (i, sample) in out.iter_mut().enumerate() {
                let x = if self.generator { 0.0 } else { input_sample(inputs, ch, i) };
                *sample = kernel.tick(x);
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        if self.generator { 0 } else { 1 }
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.kernels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula(source: &str, controls: &[(&str, f64)]) -> WorkletSource {
        WorkletSource::Formula {
            source: source.into(),
            controls: controls.iter().map(|(n, v)| ((*n).into(), *v)).collect(),
        }
    }

    #[test]
    fn formula_reads_controls() {
        let src = formula("tanh(x * drive)", &[("drive", 2.0)]);
        let mut k = src.compile(48_000, 0).unwrap();
        assert!((k.tick(0.5) - 1.0f32.tanh()).abs() < 1e-6);
        k.set(0, 0.0);
        assert_eq!(k.tick(0.5), 0.0);
    }

    #[test]
    fn control_values_do_not_change_code() {
        let a = formula("x * drive", &[("drive", 1.0)]);
        let b = formula("x * drive", &[("drive", 5.0)]);
        let c = formula("x * drive * 2", &[("drive", 1.0)]);
        assert!(a.same_code(&b));
        assert!(!a.same_code(&c));
        assert!(!WorkletSource::Noise(NoiseColor::Pink).same_code(&WorkletSource::Noise(NoiseColor::White)));
    }

    #[test]
    fn bad_code_does_not_compile() {
        assert!(formula("x +", &[]).compile(48_000, 0).is_err());
        let iir = WorkletSource::Iir { feedforward: vec![1.0], feedback: vec![0.0] };
        assert!(matches!(iir.compile(48_000, 0), Err(CompileError::Coefficients(_))));
    }

    #[test]
    fn one_pole_iir_matches_closed_form() {
        // y[n] = x[n] + 0.5 y[n-1], impulse response 0.5^n
        let iir = WorkletSource::Iir { feedforward: vec![1.0], feedback: vec![1.0, -0.5] };
        let mut k = iir.compile(48_000, 0).unwrap();
        let out: Vec<f32> = (0..4).map(|n| k.tick(if n == 0 { 1.0 } else { 0.0 })).collect();
        assert_eq!(out, vec![1.0, 0.5, 0.25, 0.125]);
    }

    #[test]
    fn noise_is_bounded_and_channels_differ() {
        let src = WorkletSource::Noise(NoiseColor::White);
        let mut a = src.compile(48_000, 0).unwrap();
        let mut b = src.compile(48_000, 1).unwrap();
        let xs: Vec<f32> = (0..256).map(|_| a.tick(0.0)).collect();
        let ys: Vec<f32> = (0..256).map(|_| b.tick(0.0)).collect();
        assert!(xs.iter().all(|s| s.abs() <= 0.5));
        assert_ne!(xs, ys);
    }
}

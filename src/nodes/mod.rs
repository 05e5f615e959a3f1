//! Built-in audio primitives.
//!
//! Primitives are organized into three categories:
//!
//! ## Sources ([`source`])
//!
//! Generate audio with no audio inputs:
//! - [`Oscillator`] - Sine/square/saw/triangle with frequency, detune and amplitude
//! - [`SamplePlayer`] - Play regions of a shared [`AudioBuffer`] at any rate
//! - [`CaptureSource`] - Samples from an input device
//!
//! ## Effects ([`effect`])
//!
//! Process audio (inputs → outputs):
//! - [`Gain`], [`Mixer`], [`Panner`], [`SlewLimiter`]
//! - [`Biquad`], [`Delay`], [`Reverb`], [`Envelope`]
//! - [`Worklet`] - Runs a kernel compiled from a [`WorkletSource`]
//! - [`Recorder`], [`Analyzer`] - Pass-through taps feeding ring buffers
//!
//! ## Sinks ([`sink`])
//!
//! Consume audio with no audio outputs:
//! - [`RtrbSink`] - Write to ring buffer (offline rendering, tests)
//! - `CpalSink` - Output to system audio device (requires `cpal_sink` feature)
//!
//! # Message Types
//!
//! Primitives with parameters take messages ([`OscillatorMessage`],
//! [`GainMessage`], [`BiquadMessage`], ...). Those without use `()`.

pub mod effect;
pub mod sink;
pub mod source;

// Re-export common types at the top level for convenience
pub use effect::*;
pub use sink::RtrbSink;
pub use source::*;

#[cfg(feature = "cpal_sink")]
pub use sink::{CpalSink, StreamFault};

//! CPAL audio output sink

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, SupportedStreamConfig};
use dasp_graph::{Buffer, Input};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::node::{input_sample, AudioNode, ProcessContext};

/// First fatal error reported by a device stream.
///
/// Shared between the stream thread and the engine, which stops the graph
/// when a fault shows up.
#[derive(Clone, Default)]
pub struct StreamFault(Arc<Mutex<Option<String>>>);

impl StreamFault {
    pub(crate) fn raise(&self, message: String) {
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(message);
        }
    }

    /// The recorded fault, if any.
    pub fn get(&self) -> Option<String> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }
}

/// A sink that outputs audio to a CPAL device
///
/// The CPAL stream runs on its own thread; this node feeds samples
/// into a ring buffer that the stream consumes.
pub struct CpalSink {
    buffer: Producer<f32>,
    channels: usize,
    /// Tracks how many samples CPAL has consumed
    samples_consumed: Arc<AtomicUsize>,
    /// Tracks underrun state for diagnostics
    had_underrun: Arc<AtomicBool>,
    fault: StreamFault,
}

impl CpalSink {
    /// Create a new sink for the given device and config
    pub fn new(device: &cpal::Device, config: &SupportedStreamConfig) -> Self {
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config = config.config();
        let sample_rate = stream_config.sample_rate.0;

        // Ring buffer sized for ~100ms of audio to handle scheduling jitter
        let buffer_samples = ((sample_rate as f32 * 0.1) as usize) * channels;
        let buffer_size = buffer_samples.next_power_of_two().max(8192);
        let (producer, consumer) = RingBuffer::<f32>::new(buffer_size);

        let samples_consumed = Arc::new(AtomicUsize::new(0));
        let had_underrun = Arc::new(AtomicBool::new(false));
        let fault = StreamFault::default();

        let device = device.clone();
        let counters = (samples_consumed.clone(), had_underrun.clone());
        let thread_fault = fault.clone();
        std::thread::spawn(move || {
            let stream = match build_stream(&device, sample_format, &stream_config, consumer, counters, thread_fault.clone()) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build output stream");
                    thread_fault.raise(e.to_string());
                    return;
                }
            };
            if let Err(e) = stream.play() {
                tracing::error!(error = %e, "failed to start output stream");
                thread_fault.raise(e.to_string());
                return;
            }

            // Keep thread alive - stream lives as long as this thread
            loop {
                std::thread::park();
            }
        });

        Self {
            buffer: producer,
            channels,
            samples_consumed,
            had_underrun,
            fault,
        }
    }

    /// Returns how many samples have been played
    #[inline]
    pub fn samples_consumed(&self) -> usize {
        self.samples_consumed.load(Ordering::Relaxed)
    }

    /// Check and clear the underrun flag
    pub fn check_underrun(&self) -> bool {
        self.had_underrun.swap(false, Ordering::Relaxed)
    }

    /// Handle on this sink's stream fault slot
    pub fn fault(&self) -> StreamFault {
        self.fault.clone()
    }
}

fn build_stream(
    device: &cpal::Device,
    sample_format: SampleFormat,
    stream_config: &cpal::StreamConfig,
    consumer: Consumer<f32>,
    counters: (Arc<AtomicUsize>, Arc<AtomicBool>),
    fault: StreamFault,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    match sample_format {
        SampleFormat::F32 => output_stream(device, stream_config, consumer, counters, fault, |s| s),
        SampleFormat::I16 => output_stream(device, stream_config, consumer, counters, fault, |s| {
            (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
        }),
        SampleFormat::U16 => output_stream(device, stream_config, consumer, counters, fault, |s| {
            ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
        }),
        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
    }
}

fn output_stream<T: SizedSample + Send + 'static>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    mut consumer: Consumer<f32>,
    (samples_consumed, had_underrun): (Arc<AtomicUsize>, Arc<AtomicBool>),
    fault: StreamFault,
    convert: impl Fn(f32) -> T + Send + 'static,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        stream_config,
        move |data: &mut [T], _| {
            let mut underrun = false;
            for sample in data.iter_mut() {
                *sample = convert(consumer.pop().unwrap_or_else(|_| {
                    underrun = true;
                    0.0
                }));
            }
            if underrun {
                had_underrun.store(true, Ordering::Relaxed);
            }
            samples_consumed.fetch_add(data.len(), Ordering::Relaxed);
        },
        move |err| {
            tracing::error!(error = %err, "output stream error");
            fault.raise(err.to_string());
        },
        None,
    )
}

impl AudioNode for CpalSink {
    type Message = (); // No control messages

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
        let buffer_len = Buffer::LEN;
        let samples_needed = buffer_len * self.channels;

        // Check for overrun (generating faster than consuming)
        if self.buffer.slots() < samples_needed {
            // Skip this block rather than partially write
            return;
        }

        // Interleave channels into ring buffer
        for i in 0..buffer_len {
            for ch in 0..self.channels {
                let _ = self.buffer.push(input_sample(inputs, ch, i));
            }
        }
    }

    #[inline]
    fn num_inputs(&self) -> usize { 1 }

    #[inline]
    fn num_outputs(&self) -> usize { 0 }
}

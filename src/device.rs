//! CPAL device discovery.
//!
//! [`CpalDevice`] finds output devices and creates sinks for them;
//! [`CpalCapture`] opens the default input device for microphone units.
//!
//! ```no_run
//! use klangnetz::CpalDevice;
//!
//! for (i, device) in CpalDevice::list_outputs().iter().enumerate() {
//!     println!("[{}] {} ({} Hz, {} ch)", i, device.name(), device.sample_rate(), device.channels());
//! }
//! ```

use alloc::string::String;
use alloc::vec::Vec;

#[cfg(feature = "cpal_sink")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

#[cfg(feature = "cpal_sink")]
use crate::engine::CaptureProvider;
#[cfg(feature = "cpal_sink")]
use crate::error::PermissionError;

/// A discovered audio output device.
///
/// Use [`CpalDevice::default_output`] to get the system default, or
/// [`CpalDevice::list_outputs`] to enumerate all available devices.
pub struct CpalDevice {
    #[cfg(feature = "cpal_sink")]
    device: cpal::Device,
    #[cfg(feature = "cpal_sink")]
    config: cpal::SupportedStreamConfig,

    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalDevice {
    /// Get the system's default output device.
    ///
    /// Returns `None` if no audio device is available.
    #[cfg(feature = "cpal_sink")]
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        let config = device.default_output_config().ok()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());

        Some(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            name,
            device,
            config,
        })
    }

    #[cfg(not(feature = "cpal_sink"))]
    pub fn default_output() -> Option<Self> {
        None
    }

    /// List all available audio output devices.
    ///
    /// Returns an empty list if no devices are found or if enumeration fails.
    #[cfg(feature = "cpal_sink")]
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| {
                devices.filter_map(|device| {
                    let config = device.default_output_config().ok()?;
                    let name = device.name().unwrap_or_else(|_| "Unknown".into());
                    Some(Self {
                        sample_rate: config.sample_rate().0,
                        channels: config.channels(),
                        name,
                        device,
                        config,
                    })
                }).collect()
            })
            .unwrap_or_default()
    }

    #[cfg(not(feature = "cpal_sink"))]
    pub fn list_outputs() -> Vec<Self> {
        Vec::new()
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the device's sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of output channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Create a sink node that outputs audio to this device.
    #[cfg(feature = "cpal_sink")]
    pub fn create_sink(&self) -> crate::nodes::CpalSink {
        crate::nodes::CpalSink::new(&self.device, &self.config)
    }
}

/// Opens the default input device for capture.
///
/// Only `f32` input streams are supported; multi-channel input is mixed down
/// to mono. The stream is not resampled, so opening fails if the device does
/// not run at the engine's rate.
#[cfg(feature = "cpal_sink")]
#[derive(Default)]
pub struct CpalCapture {
    streams: Vec<std::thread::JoinHandle<()>>,
}

#[cfg(feature = "cpal_sink")]
impl CpalCapture {
    /// Number of input streams opened so far.
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(feature = "cpal_sink")]
impl CaptureProvider for CpalCapture {
    fn open(&mut self, sample_rate: u32) -> Result<rtrb::Consumer<f32>, PermissionError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(PermissionError::NoDevice)?;
        let config = device.default_input_config().map_err(|e| {
            tracing::warn!(error = %e, "input device refused configuration");
            PermissionError::Denied
        })?;
        if config.sample_rate().0 != sample_rate || config.sample_format() != cpal::SampleFormat::F32 {
            tracing::warn!(rate = config.sample_rate().0, format = ?config.sample_format(), "unsupported input format");
            return Err(PermissionError::NoDevice);
        }

        let channels = config.channels() as usize;
        let (mut producer, consumer) = rtrb::RingBuffer::new((sample_rate as usize / 5).next_power_of_two());
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let handle = std::thread::spawn(move || {
            let stream = device.build_input_stream(
                &config.config(),
                move |data: &[f32], _| {
                    for frame in data.chunks(channels) {
                        let mono = frame.iter().sum::<f32>() / channels as f32;
                        let _ = producer.push(mono);
                    }
                },
                |err| tracing::error!(error = %err, "input stream error"),
                None,
            );
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));
            loop {
                std::thread::park();
            }
        });

        match ready_rx.recv_timeout(std::time::Duration::from_secs(2)) {
            Ok(Ok(())) => {
                self.streams.push(handle);
                Ok(consumer)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "input stream refused");
                Err(PermissionError::Denied)
            }
            Err(_) => Err(PermissionError::TimedOut(2000)),
        }
    }
}

//! Sound card backend: the chirp loops on the default output device and the
//! first channel of the default input device feeds the correlator.

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, SampleRate, Stream, StreamConfig,
};
use log::{error, info};

use crate::{
    bridge::{AudioBackend, AudioSession, CancelHandle, CaptureSink},
    chirp::Waveform,
    error::BridgeError,
};

fn unavailable<E: std::fmt::Display>(e: E) -> BridgeError {
    BridgeError::DeviceUnavailable(e.to_string())
}

pub struct CpalBackend {
    input: Device,
    output: Device,
}

impl CpalBackend {
    pub fn new() -> Result<Self, BridgeError> {
        let host = cpal::default_host();
        let input = host
            .default_input_device()
            .ok_or_else(|| BridgeError::DeviceUnavailable("no input device".into()))?;
        let output = host
            .default_output_device()
            .ok_or_else(|| BridgeError::DeviceUnavailable("no output device".into()))?;
        info!(
            "audio devices: in = {}, out = {}",
            input.name().unwrap_or_default(),
            output.name().unwrap_or_default()
        );
        Ok(Self { input, output })
    }
}

pub struct CpalSession {
    input: Stream,
    output: Stream,
}

impl AudioSession for CpalSession {
    fn resume(&mut self) -> Result<(), BridgeError> {
        self.output.play().map_err(unavailable)?;
        self.input.play().map_err(unavailable)
    }

    fn suspend(&mut self) -> Result<(), BridgeError> {
        self.input.pause().map_err(unavailable)?;
        self.output.pause().map_err(unavailable)
    }
}

impl AudioBackend for CpalBackend {
    type Session = CpalSession;

    fn sample_rate(&self) -> Result<f32, BridgeError> {
        let config = self.input.default_input_config().map_err(unavailable)?;
        Ok(config.sample_rate().0 as f32)
    }

    fn open(&mut self, waveform: &Waveform, mut sink: CaptureSink, cancel: &CancelHandle) -> Result<CpalSession, BridgeError> {
        let input_config = self.input.default_input_config().map_err(unavailable)?;
        let sample_rate = input_config.sample_rate();
        let input_channels = input_config.channels() as usize;
        let output_channels = self.output.default_output_config().map_err(unavailable)?.channels();

        // playback has to run at the capture rate the chirp was built for
        let output_config = StreamConfig {
            channels: output_channels,
            sample_rate: SampleRate(sample_rate.0),
            buffer_size: BufferSize::Default,
        };

        let mut block = Vec::with_capacity(4096);
        let input = self
            .input
            .build_input_stream(
                &input_config.config(),
                move |data: &[f32], _| {
                    block.clear();
                    block.extend(data.iter().step_by(input_channels));
                    sink.on_block(&block);
                },
                |e| error!("capture stream error: {e}"),
                None,
            )
            .map_err(unavailable)?;

        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let waveform = waveform.clone();
        let mut position = 0;
        let output = self
            .output
            .build_output_stream(
                &output_config,
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(output_channels as usize) {
                        frame.fill(waveform[position]);
                        position = (position + 1) % waveform.len();
                    }
                },
                |e| error!("playback stream error: {e}"),
                None,
            )
            .map_err(unavailable)?;

        let mut session = CpalSession { input, output };
        session.resume()?;
        info!(
            "audio streams open: {} Hz, {} input channels, {} output channels",
            sample_rate.0, input_channels, output_channels
        );
        Ok(session)
    }
}

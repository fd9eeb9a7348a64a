//! Control layer: the only owner of mutable user state.
//!
//! Holds the current [`Controls`], the bridge serving them and the display.
//! Any control change closes the bridge (both device streams are gone before
//! the call returns) and builds a new one, restarting it if the previous one
//! was running.

use std::sync::Arc;

use itertools::Itertools;
use log::{info, warn};

use crate::{
    bridge::{AudioBackend, BridgeState, StreamingBridge},
    config::SonarConfig,
    correlator::CorrelatorFactory,
    error::BridgeError,
    params::{self, Controls, RadarParameters},
    render::RangeDopplerRenderer,
};

/// What the UI shows next to the image after each frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub index: u64,
    /// maximum of the data cube, the value mapped to full intensity
    pub frame_peak: f32,
    /// percent
    pub input_level: u32,
    /// (range m, velocity m/s) of the strongest cell, unless the frame is silent
    pub strongest: Option<(f32, f32)>,
}

pub struct SonarController<B: AudioBackend> {
    config: SonarConfig,
    controls: Controls,
    factory: Arc<dyn CorrelatorFactory>,
    bridge: Option<StreamingBridge<B>>,
    parameters: Option<RadarParameters>,
    renderer: RangeDopplerRenderer,
    started: bool,
}

impl<B: AudioBackend> SonarController<B> {
    pub fn new(backend: B, factory: Arc<dyn CorrelatorFactory>, config: SonarConfig) -> Self {
        let controls = config.controls.clone();
        let parameters = Self::display_parameters(&backend, &controls, &config);
        let bridge = StreamingBridge::new(backend, Arc::clone(&factory), config.clone(), controls.clone());
        Self {
            renderer: RangeDopplerRenderer::with_policy(config.normalization),
            config,
            controls,
            factory,
            bridge: Some(bridge),
            parameters,
            started: false,
        }
    }

    /// Parameters shown before a session exists, derived from the device's
    /// reported rate.
    fn display_parameters(backend: &B, controls: &Controls, config: &SonarConfig) -> Option<RadarParameters> {
        let derived = backend
            .sample_rate()
            .and_then(|fs| params::derive(controls, fs, config).map_err(BridgeError::from));
        match derived {
            Ok(parameters) => Some(parameters),
            Err(e) => {
                warn!("cannot derive radar parameters: {e}");
                None
            }
        }
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn config(&self) -> &SonarConfig {
        &self.config
    }

    pub fn parameters(&self) -> Option<&RadarParameters> {
        self.parameters.as_ref()
    }

    pub fn renderer(&self) -> &RangeDopplerRenderer {
        &self.renderer
    }

    pub fn bridge_mut(&mut self) -> Option<&mut StreamingBridge<B>> {
        self.bridge.as_mut()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Label of the start/stop button
    pub fn button_label(&self) -> &'static str {
        if self.started {
            "stop"
        } else {
            "start"
        }
    }

    pub fn start(&mut self) -> Result<(), BridgeError> {
        let bridge = self.bridge.as_mut().ok_or(BridgeError::Closed)?;
        bridge.start()?;
        if let Some(parameters) = bridge.parameters() {
            self.renderer.set_dimensions(parameters.n_fast(), parameters.n_slow());
            self.parameters = Some(parameters.clone());
        }
        self.started = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), BridgeError> {
        let bridge = self.bridge.as_mut().ok_or(BridgeError::Closed)?;
        let result = bridge.stop();
        self.started = false;
        result
    }

    pub fn toggle(&mut self) -> Result<(), BridgeError> {
        if self.started {
            self.stop()
        } else {
            self.start()
        }
    }

    /// Applies new controls. The previous session is closed before the new
    /// bridge exists, so two sessions never feed correlators at once.
    pub fn update_controls(&mut self, controls: Controls) -> Result<(), BridgeError> {
        let Some(old) = self.bridge.take() else {
            return Err(BridgeError::Closed);
        };
        let was_running = self.started && old.state() == BridgeState::Running;
        let backend = old.close();

        self.parameters = Self::display_parameters(&backend, &controls, &self.config);
        if let Some(parameters) = &self.parameters {
            info!(
                "controls changed: B = {} Hz, fc = {} Hz, L = {}, n_slow = {}",
                parameters.bandwidth,
                parameters.center_frequency,
                parameters.pulse_length,
                parameters.pulses_integrated
            );
        }
        self.bridge = Some(StreamingBridge::new(
            backend,
            Arc::clone(&self.factory),
            self.config.clone(),
            controls.clone(),
        ));
        self.controls = controls;
        self.started = false;

        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Draws the latest frame, if a new one arrived, and hands its buffer back
    /// to the capture side.
    pub fn poll_frame(&mut self) -> Option<FrameSummary> {
        let bridge = self.bridge.as_ref()?;
        let frame = bridge.mailbox().take()?;

        self.renderer.set_dimensions(frame.n_fast, frame.n_slow);
        let summary = self.renderer.draw(&frame.data).map(|frame_peak| {
            let strongest = (frame_peak > 0.0)
                .then(|| frame.data.iter().position_max_by(|a, b| a.total_cmp(b)))
                .flatten()
                .zip(self.parameters.as_ref())
                .map(|(cell, parameters)| {
                    let (slow, fast) = (cell / frame.n_fast, cell % frame.n_fast);
                    (parameters.range_of_bin(fast), parameters.velocity_of_row(slow))
                });
            FrameSummary {
                index: frame.index,
                frame_peak,
                input_level: frame.input_level(),
                strongest,
            }
        });

        bridge.mailbox().recycle(frame);
        summary
    }
}

//! Real-time audio session and its contract with the correlator.
//!
//! ```text
//!   Uninitialized --start--> Initializing --devices acquired--> Running <--stop/start--> Suspended
//!         ^                        |                                  \                   /
//!         +---- failure/cancel ----+                                   +----- close -----+--> Closed
//! ```
//!
//! A bridge serves exactly one parameter set. Changing a control means closing
//! the bridge, which tears the device streams down, and building a new one.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, info, warn};

use crate::{
    chirp::Waveform,
    config::SonarConfig,
    correlator::{Correlator, CorrelatorFactory, CorrelatorInit},
    error::BridgeError,
    mailbox::{DataCubeFrame, FrameMailbox},
    params::{self, Controls, RadarParameters},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Initializing,
    Running,
    Suspended,
    Closed,
}

/// Lets the control layer abandon a start that is waiting on the devices,
/// typically on the microphone permission prompt.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn rearm(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Playback and capture devices.
pub trait AudioBackend {
    type Session: AudioSession;

    /// Native rate of the device pair; the chirp and every derived parameter
    /// depend on it.
    fn sample_rate(&self) -> Result<f32, BridgeError>;

    /// Acquires both devices, loops `waveform` on the speaker and delivers
    /// every captured block to `sink`, in order. May wait on the user; must
    /// give up with [`BridgeError::Cancelled`] once `cancel` fires.
    fn open(&mut self, waveform: &Waveform, sink: CaptureSink, cancel: &CancelHandle) -> Result<Self::Session, BridgeError>;
}

/// Open device streams. Dropping the session closes both of them.
pub trait AudioSession {
    fn resume(&mut self) -> Result<(), BridgeError>;

    fn suspend(&mut self) -> Result<(), BridgeError>;
}

/// Runs on the capture thread: forwards blocks to the correlator, tracks the
/// input peak and publishes a frame every `emit_interval` samples.
pub struct CaptureSink {
    correlator: Box<dyn Correlator>,
    mailbox: Arc<FrameMailbox>,
    peak: f32,
    peak_decay: f32,
    emit_interval: usize,
    samples_since_emit: usize,
    next_index: u64,
}

impl CaptureSink {
    /// Built on the control side; reserves the frame buffers so that
    /// [`CaptureSink::on_block`] never allocates.
    pub fn new(correlator: Box<dyn Correlator>, mailbox: Arc<FrameMailbox>, peak_decay: f32, emit_interval: usize) -> Self {
        mailbox.reserve_buffers(correlator.n_fast() * correlator.n_slow());
        Self {
            correlator,
            mailbox,
            peak: 0.0,
            peak_decay,
            emit_interval: emit_interval.max(1),
            samples_since_emit: 0,
            next_index: 0,
        }
    }

    pub fn on_block(&mut self, samples: &[f32]) {
        self.correlator.push_block(samples);

        let block_peak = samples.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        self.peak = (self.peak * (1.0 - self.peak_decay)).max(block_peak);

        self.samples_since_emit += samples.len();
        if self.samples_since_emit >= self.emit_interval {
            self.samples_since_emit %= self.emit_interval;
            self.emit();
        }
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    fn emit(&mut self) {
        let mut data = self.mailbox.spare_buffer().unwrap_or_default();
        self.correlator.write_data_cube(&mut data);
        self.mailbox.publish(DataCubeFrame {
            index: self.next_index,
            peak: self.peak,
            n_fast: self.correlator.n_fast(),
            n_slow: self.correlator.n_slow(),
            data,
        });
        self.next_index += 1;
    }
}

pub struct StreamingBridge<B: AudioBackend> {
    state: BridgeState,
    backend: B,
    factory: Arc<dyn CorrelatorFactory>,
    config: SonarConfig,
    controls: Controls,
    parameters: Option<RadarParameters>,
    session: Option<B::Session>,
    mailbox: Arc<FrameMailbox>,
    cancel: CancelHandle,
}

impl<B: AudioBackend> StreamingBridge<B> {
    pub fn new(backend: B, factory: Arc<dyn CorrelatorFactory>, config: SonarConfig, controls: Controls) -> Self {
        Self {
            state: BridgeState::Uninitialized,
            backend,
            factory,
            config,
            controls,
            parameters: None,
            session: None,
            mailbox: Arc::new(FrameMailbox::new()),
            cancel: CancelHandle::default(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Parameters of the running session, once started
    pub fn parameters(&self) -> Option<&RadarParameters> {
        self.parameters.as_ref()
    }

    pub fn mailbox(&self) -> &Arc<FrameMailbox> {
        &self.mailbox
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn session_mut(&mut self) -> Option<&mut B::Session> {
        self.session.as_mut()
    }

    pub fn start(&mut self) -> Result<(), BridgeError> {
        match self.state {
            BridgeState::Running => {
                debug!("start() while already running");
                Ok(())
            }
            BridgeState::Suspended => {
                if let Some(session) = self.session.as_mut() {
                    session.resume()?;
                }
                self.state = BridgeState::Running;
                info!("audio session resumed");
                Ok(())
            }
            BridgeState::Uninitialized | BridgeState::Initializing => {
                self.state = BridgeState::Initializing;
                match self.initialize() {
                    Ok(()) => {
                        self.state = BridgeState::Running;
                        Ok(())
                    }
                    Err(e) => {
                        warn!("audio session failed to start: {e}");
                        self.parameters = None;
                        self.cancel.rearm();
                        self.state = BridgeState::Uninitialized;
                        Err(e)
                    }
                }
            }
            BridgeState::Closed => Err(BridgeError::Closed),
        }
    }

    fn initialize(&mut self) -> Result<(), BridgeError> {
        let sample_rate = self.backend.sample_rate()?;
        let parameters = params::derive(&self.controls, sample_rate, &self.config)?;
        let init = CorrelatorInit::from_parameters(&parameters)?;
        info!(
            "starting audio session: fs = {sample_rate} Hz, fc = {} Hz, B = {} Hz, {}x{} cells",
            parameters.center_frequency,
            parameters.bandwidth,
            parameters.n_fast(),
            parameters.n_slow()
        );

        let emit_interval = (sample_rate / self.config.frame_rate.max(f32::EPSILON)).round() as usize;
        let sink = CaptureSink::new(
            self.factory.create(&init),
            Arc::clone(&self.mailbox),
            self.config.peak_decay,
            emit_interval,
        );

        if self.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        let session = self.backend.open(&init.waveform, sink, &self.cancel)?;
        self.session = Some(session);
        self.parameters = Some(parameters);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), BridgeError> {
        match self.state {
            BridgeState::Running => {
                if let Some(session) = self.session.as_mut() {
                    session.suspend()?;
                }
                self.state = BridgeState::Suspended;
                info!("audio session suspended");
                Ok(())
            }
            BridgeState::Suspended => Ok(()),
            BridgeState::Initializing => {
                self.cancel.cancel();
                Ok(())
            }
            BridgeState::Uninitialized => {
                warn!("stop() called before the audio session was started");
                Err(BridgeError::NotStarted)
            }
            BridgeState::Closed => Err(BridgeError::Closed),
        }
    }

    /// Tears down both device streams and hands the backend back for the
    /// next bridge.
    pub fn close(mut self) -> B {
        self.cancel.cancel();
        if self.session.take().is_some() {
            info!("audio session closed");
        }
        self.state = BridgeState::Closed;
        self.backend
    }
}

//! Loopback audio backend: the speaker output reaches the microphone over a
//! set of fixed echo paths. No device is touched, which makes the whole chain
//! runnable in tests and on machines without audio hardware.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, info};

use crate::{
    bridge::{AudioBackend, AudioSession, CancelHandle, CaptureSink},
    chirp::Waveform,
    error::BridgeError,
};

/// Propagation path from speaker to microphone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoPath {
    /// samples
    pub delay: usize,
    pub gain: f32,
}

const DEFAULT_BLOCK_SIZE: usize = 128;

pub struct LoopbackBackend {
    sample_rate: f32,
    block_size: usize,
    paths: Vec<EchoPath>,
    paced: bool,
    deny_permission: bool,
    opened: usize,
    live_sessions: Arc<AtomicUsize>,
}

impl LoopbackBackend {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            block_size: DEFAULT_BLOCK_SIZE,
            paths: vec![EchoPath { delay: 0, gain: 0.5 }],
            paced: false,
            deny_permission: false,
            opened: 0,
            live_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_paths(mut self, paths: Vec<EchoPath>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Deliver blocks from a thread at the pace of the sample rate instead of
    /// on [`LoopbackSession::run_blocks`].
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Behave like a user refusing microphone access.
    pub fn deny_permission(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    /// Sessions opened so far
    pub fn opened(&self) -> usize {
        self.opened
    }

    /// Sessions opened and not yet dropped
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }
}

struct LoopbackEngine {
    waveform: Waveform,
    paths: Vec<EchoPath>,
    position: usize,
    block: Vec<f32>,
    sink: CaptureSink,
}

impl LoopbackEngine {
    fn render_block(&mut self) {
        let n = self.waveform.len();
        for (k, sample) in self.block.iter_mut().enumerate() {
            let t = self.position + k;
            *sample = self
                .paths
                .iter()
                .map(|path| path.gain * self.waveform[(t + n - path.delay % n) % n])
                .sum();
        }
        self.position = (self.position + self.block.len()) % n;
        self.sink.on_block(&self.block);
    }
}

enum Driver {
    Manual {
        engine: LoopbackEngine,
        running: bool,
    },
    Paced {
        running: Arc<AtomicBool>,
        shutdown: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    },
}

pub struct LoopbackSession {
    driver: Driver,
    live_sessions: Arc<AtomicUsize>,
}

impl LoopbackSession {
    /// Captures `blocks` blocks if the session is running and returns how
    /// many were delivered. Paced sessions deliver on their own.
    pub fn run_blocks(&mut self, blocks: usize) -> usize {
        match &mut self.driver {
            Driver::Manual { engine, running: true } => {
                for _ in 0..blocks {
                    engine.render_block();
                }
                blocks
            }
            _ => 0,
        }
    }
}

impl AudioSession for LoopbackSession {
    fn resume(&mut self) -> Result<(), BridgeError> {
        match &mut self.driver {
            Driver::Manual { running, .. } => *running = true,
            Driver::Paced { running, .. } => running.store(true, Ordering::SeqCst),
        }
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), BridgeError> {
        match &mut self.driver {
            Driver::Manual { running, .. } => *running = false,
            Driver::Paced { running, .. } => running.store(false, Ordering::SeqCst),
        }
        Ok(())
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        if let Driver::Paced { shutdown, handle, .. } = &mut self.driver {
            shutdown.store(true, Ordering::SeqCst);
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        self.live_sessions.fetch_sub(1, Ordering::SeqCst);
        debug!("loopback session dropped");
    }
}

impl AudioBackend for LoopbackBackend {
    type Session = LoopbackSession;

    fn sample_rate(&self) -> Result<f32, BridgeError> {
        Ok(self.sample_rate)
    }

    fn open(&mut self, waveform: &Waveform, sink: CaptureSink, cancel: &CancelHandle) -> Result<LoopbackSession, BridgeError> {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        if self.deny_permission {
            return Err(BridgeError::PermissionDenied);
        }

        let engine = LoopbackEngine {
            waveform: waveform.clone(),
            paths: self.paths.clone(),
            position: 0,
            block: vec![0.0; self.block_size],
            sink,
        };

        let driver = if self.paced {
            let running = Arc::new(AtomicBool::new(true));
            let shutdown = Arc::new(AtomicBool::new(false));
            let block_duration = Duration::from_secs_f32(self.block_size as f32 / self.sample_rate);
            let handle = {
                let running = Arc::clone(&running);
                let shutdown = Arc::clone(&shutdown);
                let mut engine = engine;
                thread::spawn(move || {
                    while !shutdown.load(Ordering::SeqCst) {
                        if running.load(Ordering::SeqCst) {
                            engine.render_block();
                        }
                        thread::sleep(block_duration);
                    }
                })
            };
            Driver::Paced {
                running,
                shutdown,
                handle: Some(handle),
            }
        } else {
            Driver::Manual { engine, running: true }
        };

        self.opened += 1;
        self.live_sessions.fetch_add(1, Ordering::SeqCst);
        info!(
            "loopback session opened: {} Hz, {} samples per block, {} echo paths",
            self.sample_rate,
            self.block_size,
            self.paths.len()
        );
        Ok(LoopbackSession {
            driver,
            live_sessions: Arc::clone(&self.live_sessions),
        })
    }
}

//! Error types for the sonar signal chain

use thiserror::Error;

/// Caller errors when building amplitude tapers
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    /// A window needs at least one tap
    #[error("window length must be at least 1")]
    EmptyWindow,

    /// A one-tap Hann window is all zeros; single-pulse processing must use rect
    #[error("Hann window of length 1 is degenerate, use a rectangular window")]
    DegenerateHann,
}

/// Controls that cannot be turned into a valid set of radar parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(f32),

    /// Not even the narrowest chirp fits between DC and Nyquist with its guard band
    #[error("sample rate {sample_rate} Hz is too low for a {min_bandwidth} Hz chirp")]
    SampleRateTooLow { sample_rate: f32, min_bandwidth: f32 },

    /// Even the shortest pulse is longer than the coherent processing interval
    #[error("a {pulse_length}-sample pulse at {sample_rate} Hz exceeds the {max_cpi} s CPI ceiling")]
    PulseExceedsCpi { pulse_length: usize, sample_rate: f32, max_cpi: f32 },

    #[error("unknown clutter filter: {0}")]
    UnknownClutterFilter(String),
}

/// Failures of the audio session lifecycle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// No playback or capture device, or the device refused the stream
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("microphone permission denied")]
    PermissionDenied,

    /// The control layer gave up on a start that was still acquiring devices
    #[error("start cancelled before the audio devices were acquired")]
    Cancelled,

    #[error("stop() called before the audio session was started")]
    NotStarted,

    #[error("audio session is closed")]
    Closed,

    #[error(transparent)]
    Parameters(#[from] ParameterError),

    #[error(transparent)]
    Window(#[from] WindowError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

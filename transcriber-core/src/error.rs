//! # Error Module
//!
//! Only resource and environment failures are errors in this crate. Pitch
//! estimation anomalies (no pitch, low clarity, out-of-band frequency) are
//! absorbed where they happen and never surface here.

use thiserror::Error;

/// Failures raised while acquiring, running or tearing down audio streams.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("no audio input device available")]
    NoInputDevice,
    #[error("no audio output device available")]
    NoOutputDevice,
    #[error("no supported f32 stream configuration found")]
    NoSupportedConfig,
    #[error("failed to query audio device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),
    #[error("failed to query supported stream configurations: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),
    #[error("failed to query default stream configuration: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("failed to pause audio stream: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),
    /// Raised asynchronously by the audio backend while a stream is running,
    /// e.g. the device was unplugged.
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("detector has been destroyed")]
    Destroyed,
}

/// Failures while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

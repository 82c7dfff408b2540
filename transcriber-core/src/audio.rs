//! # Audio Device Module
//!
//! Capture and playback through CPAL (Cross-Platform Audio Library).
//!
//! ## Capture
//! The input callback runs a [`StreamAnalyzer`] directly on each block the
//! device delivers, so ring buffering, pitch estimation and voicing all
//! happen on the audio thread. Only the resulting frames leave it, through
//! the [`bridge`](crate::bridge).
//!
//! ## Playback
//! [`AudioOutput`] owns an output stream whose callback renders a
//! [`VoiceMixer`]. Voices are handed over a channel and the mixer's sample
//! counter is published as the output clock, so scheduled notes start on
//! exact samples.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, Sender};

use crate::analyzer::StreamAnalyzer;
use crate::bridge::AudioPort;
use crate::config::AnalyzerConfig;
use crate::error::DetectorError;
use crate::player::{AudioScheduler, Voice, VoiceMixer};

/// Frames of output rendered per pass when the device does not fix its
/// buffer size.
const OUTPUT_BLOCK_FRAMES: usize = 4096;

/// Rate requested from the input device when it supports a range.
pub const PREFERRED_SAMPLE_RATE: u32 = 44_100;

/// A running input stream feeding an analyzer.
pub struct CaptureStream {
    stream: cpal::Stream,
    sample_rate: u32,
    /// Frames delivered by the device so far.
    clock: Arc<AtomicU64>,
}

impl CaptureStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds of audio captured, on the same clock as frame timestamps.
    pub fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    pub fn pause(&self) -> Result<(), DetectorError> {
        self.stream.pause()?;
        Ok(())
    }

    pub fn resume(&self) -> Result<(), DetectorError> {
        self.stream.play()?;
        Ok(())
    }
}

/// Starts capturing from the default input device.
///
/// # Arguments
/// * `config` - Analyzer settings for the audio thread
/// * `port` - Audio-thread end of the bridge
/// * `errors` - Receives errors the backend raises while the stream runs
///
/// # Returns
/// * `Ok(stream)` - Running capture; dropping it stops the device
/// * `Err(e)` - No device, no usable f32 format, or the stream failed to start
pub fn start_capture(
    config: AnalyzerConfig,
    port: AudioPort,
    errors: Sender<DetectorError>,
) -> Result<CaptureStream, DetectorError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(DetectorError::NoInputDevice)?;
    log::info!("using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let stream_config: cpal::StreamConfig = match find_input_config(configs, PREFERRED_SAMPLE_RATE) {
        Some(range) => {
            let rate = PREFERRED_SAMPLE_RATE.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
            range.with_sample_rate(cpal::SampleRate(rate)).into()
        }
        None => {
            let default = device.default_input_config()?;
            if default.sample_format() != cpal::SampleFormat::F32 {
                return Err(DetectorError::NoSupportedConfig);
            }
            default.into()
        }
    };

    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels as usize;
    log::info!("capturing at {sample_rate} Hz, {channels} channel(s)");

    let clock = Arc::new(AtomicU64::new(0));
    let callback_clock = clock.clone();
    let mut analyzer = StreamAnalyzer::new(config, sample_rate, port);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            analyzer.process_interleaved(data, channels);
            callback_clock.fetch_add((data.len() / channels.max(1)) as u64, Ordering::Relaxed);
        },
        move |err| {
            log::error!("input stream error: {err}");
            let _ = errors.try_send(DetectorError::Stream(err.to_string()));
        },
        None,
    )?;
    stream.play()?;

    Ok(CaptureStream {
        stream,
        sample_rate,
        clock,
    })
}

/// Picks an f32 input format, preferring fewer channels and then the range
/// closest to `target_rate`.
fn find_input_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (c.channels(), distance)
        })
}

/// The default output device, playing whatever voices are scheduled on it.
pub struct AudioOutput {
    _stream: cpal::Stream,
    voices: Sender<Voice>,
    sample_rate: u32,
    /// Samples rendered per channel; the output clock.
    position: Arc<AtomicU64>,
}

impl AudioOutput {
    pub fn open() -> Result<AudioOutput, DetectorError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DetectorError::NoOutputDevice)?;
        log::info!("using audio output device: {}", device.name()?);

        let supported = device.default_output_config()?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;

        let (voices_tx, voices_rx) = crossbeam_channel::unbounded();
        let position = Arc::new(AtomicU64::new(0));

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, voices_rx, position.clone()),
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, voices_rx, position.clone()),
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, voices_rx, position.clone()),
            other => {
                log::error!("unsupported output sample format: {other:?}");
                return Err(DetectorError::NoSupportedConfig);
            }
        }?;
        stream.play()?;
        log::info!("playback at {sample_rate} Hz, {} channel(s)", config.channels);

        Ok(AudioOutput {
            _stream: stream,
            voices: voices_tx,
            sample_rate,
            position,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioScheduler for AudioOutput {
    fn current_time(&self) -> f64 {
        self.position.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, voice: Voice) {
        // Only fails once the stream is gone, and then nothing can play it.
        let _ = self.voices.send(voice);
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    voices: Receiver<Voice>,
    position: Arc<AtomicU64>,
) -> Result<cpal::Stream, DetectorError>
where
    T: Sample + SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut mixer = VoiceMixer::new(config.sample_rate.0);
    let frames = match config.buffer_size {
        cpal::BufferSize::Fixed(n) => (n as usize).max(OUTPUT_BLOCK_FRAMES),
        cpal::BufferSize::Default => OUTPUT_BLOCK_FRAMES,
    };
    // Sized once; larger device blocks are rendered in pieces.
    let mut scratch = vec![0.0_f32; frames * channels];

    let stream = device.build_output_stream(
        config,
        move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
            // Voices beyond the mixer's capacity wait in the channel until
            // earlier ones finish.
            while mixer.has_room() {
                match voices.try_recv() {
                    Ok(voice) => mixer.add(voice),
                    Err(_) => break,
                }
            }
            for chunk in output.chunks_mut(scratch.len()) {
                let block = &mut scratch[..chunk.len()];
                mixer.render_interleaved(block, channels);
                for (out, &sample) in chunk.iter_mut().zip(block.iter()) {
                    *out = T::from_sample(sample);
                }
            }
            position.store(mixer.position(), Ordering::Relaxed);
        },
        |err| log::error!("output stream error: {err}"),
        None,
    )?;
    Ok(stream)
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use transcriber_core::config::RecorderConfig;
use transcriber_core::player::Waveform;
use transcriber_core::tuning::PitchClass;

#[derive(Parser, Debug)]
#[command(name = "transcriber", about = "Monophonic pitch-to-note transcription")]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the detected pitch from the default input device
    Listen {
        /// Stop after this many seconds
        #[arg(long, default_value_t = 30.0)]
        seconds: f64,
    },
    /// Record from the default input device and transcribe the take
    Record {
        /// Length of the take in seconds
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        rhythm: RhythmArgs,
    },
    /// Transcribe a WAV file
    Transcribe {
        /// Input WAV file
        input: PathBuf,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        rhythm: RhythmArgs,
    },
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Print notes as JSON instead of a table
    #[arg(long)]
    pub json: bool,

    /// Print the smoothed notes instead of the quantized ones
    #[arg(long)]
    pub raw: bool,

    /// Play the transcription on the default output device
    #[arg(long)]
    pub play: bool,

    /// Oscillator used for playback (sine or triangle)
    #[arg(long, default_value = "triangle")]
    pub waveform: Waveform,
}

/// Overrides for the quantization settings in the config file.
#[derive(Args, Debug, Default)]
pub struct RhythmArgs {
    /// Tempo in beats per minute (40-240)
    #[arg(long)]
    pub tempo: Option<f64>,

    /// Grid subdivisions per beat
    #[arg(long)]
    pub grid: Option<u32>,

    /// Swing amount (0.0-0.6)
    #[arg(long)]
    pub swing: Option<f64>,

    /// Pitch classes to snap to (comma-separated, e.g. C,D,E,G,A)
    #[arg(long, value_delimiter = ',')]
    pub scale: Vec<PitchClass>,

    /// Input latency to compensate, in milliseconds
    #[arg(long)]
    pub latency_ms: Option<f64>,
}

impl RhythmArgs {
    pub fn apply(&self, config: &mut RecorderConfig) {
        if let Some(tempo) = self.tempo {
            config.tempo = tempo;
        }
        if let Some(grid) = self.grid {
            config.grid = grid;
        }
        if let Some(swing) = self.swing {
            config.swing = swing;
        }
        if !self.scale.is_empty() {
            config.scale = Some(self.scale.clone());
        }
        if let Some(latency) = self.latency_ms {
            config.latency_ms = latency;
        }
        config.sanitize();
    }
}

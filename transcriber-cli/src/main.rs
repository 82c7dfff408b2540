// transcriber-cli/src/main.rs

//! Command-line front end: a live pitch readout, live recording and offline
//! transcription of WAV files.

mod cli;
mod wav;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{after, select, tick};

use transcriber_core::NoteEvent;
use transcriber_core::audio::AudioOutput;
use transcriber_core::config::{self, AnalyzerConfig, RecorderConfig, TranscriberConfig};
use transcriber_core::detector::{self, DetectorEvent, PitchDetector};
use transcriber_core::player::{AudioScheduler, STOP_TAIL_S};
use transcriber_core::recorder::Recorder;

use cli::{Cli, Command, OutputArgs};

/// How often the detector is drained.
const POLL_INTERVAL: Duration = Duration::from_millis(16);
/// Head start given to the output device before the first note.
const PLAYBACK_LEAD_S: f64 = 0.1;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let config = config::load_config(path).with_context(|| format!("loading {}", path.display()))?;
            log::info!("loaded config from {}", path.display());
            config
        }
        None => TranscriberConfig::default(),
    };

    match cli.command {
        Command::Listen { seconds } => listen(&config.analyzer, seconds),
        Command::Record {
            seconds,
            output,
            rhythm,
        } => {
            let mut recorder_config = config.recorder.clone();
            rhythm.apply(&mut recorder_config);
            let recorder = record(&config.analyzer, recorder_config, seconds)?;
            finish(recorder, &output)
        }
        Command::Transcribe { input, output, rhythm } => {
            let mut recorder_config = config.recorder.clone();
            rhythm.apply(&mut recorder_config);
            let audio = wav::read_mono(&input)?;
            let frames = detector::analyze_signal(&audio.samples, audio.sample_rate, &config.analyzer);

            let mut recorder = Recorder::new(recorder_config);
            recorder.start(0.0);
            for frame in &frames {
                recorder.push_frame(frame);
            }
            recorder.stop(audio.duration_s());
            finish(recorder, &output)
        }
    }
}

/// Prints the nearest note to the incoming pitch until `seconds` elapse.
fn listen(analyzer: &AnalyzerConfig, seconds: f64) -> Result<()> {
    let mut detector = PitchDetector::new(analyzer.clone());
    detector.start()?;
    log::info!("listening for {seconds:.0} s");

    let ticker = tick(POLL_INTERVAL);
    let deadline = after(Duration::from_secs_f64(seconds.max(0.0)));
    let mut last_line = String::new();
    loop {
        select! {
            recv(ticker) -> _ => {
                let mut latest = None;
                for event in detector.poll_events() {
                    match event {
                        DetectorEvent::Pitch(pitch) => latest = Some(pitch),
                        DetectorEvent::Level(_) => latest = None,
                        DetectorEvent::Error(e) => return Err(e.into()),
                    }
                }
                let line = match latest {
                    Some(p) => format!(
                        "{:>2}{:<2} {:+6.1} cents  {:8.2} Hz  clarity {:.2}  {:6.1} dB",
                        p.note, p.octave, p.cents, p.frequency, p.clarity, p.rms_db
                    ),
                    None => "--".to_string(),
                };
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
            },
            recv(deadline) -> _ => break,
        }
    }
    detector.destroy();
    Ok(())
}

/// Records one take of `seconds` from the default input device.
fn record(analyzer: &AnalyzerConfig, recorder_config: RecorderConfig, seconds: f64) -> Result<Recorder> {
    let mut detector = PitchDetector::new(analyzer.clone());
    detector.start()?;

    let mut recorder = Recorder::new(recorder_config);
    recorder.start(detector.current_time());
    log::info!("recording for {seconds:.1} s");

    let ticker = tick(POLL_INTERVAL);
    let deadline = after(Duration::from_secs_f64(seconds.max(0.0)));
    loop {
        select! {
            recv(ticker) -> _ => drain_into(&mut detector, &mut recorder)?,
            recv(deadline) -> _ => break,
        }
    }
    drain_into(&mut detector, &mut recorder)?;
    recorder.stop(detector.current_time());
    detector.destroy();
    Ok(recorder)
}

fn drain_into(detector: &mut PitchDetector, recorder: &mut Recorder) -> Result<()> {
    for event in detector.poll_events() {
        match event.frame() {
            Some(frame) => recorder.push_frame(&frame),
            None => {
                if let DetectorEvent::Error(e) = event {
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

fn finish(mut recorder: Recorder, output: &OutputArgs) -> Result<()> {
    let notes = if output.raw {
        recorder.recorded()
    } else {
        recorder.quantized()
    };
    if output.json {
        println!("{}", serde_json::to_string_pretty(notes)?);
    } else {
        print_table(notes);
    }
    if output.play {
        recorder.set_waveform(output.waveform);
        play(&recorder)?;
    }
    Ok(())
}

fn print_table(notes: &[NoteEvent]) {
    if notes.is_empty() {
        println!("no notes");
        return;
    }
    println!("  #  note   start ms     dur ms    freq Hz   cents   vel");
    for (i, n) in notes.iter().enumerate() {
        println!(
            "{:>3}  {:>2}{:<2}  {:>9.1}  {:>9.1}  {:>9.2}  {:>+6.1}  {:.2}",
            i + 1,
            n.note,
            n.octave,
            n.start_ms,
            n.duration_ms,
            n.frequency,
            n.cents,
            n.velocity
        );
    }
}

/// Plays the transcription and blocks until it has finished.
fn play(recorder: &Recorder) -> Result<()> {
    let mut output = AudioOutput::open()?;
    let when = output.current_time() + PLAYBACK_LEAD_S;
    let voices = recorder.play(&mut output, Some(when));

    let notes = if recorder.quantized().is_empty() {
        recorder.recorded()
    } else {
        recorder.quantized()
    };
    let end_s = notes.iter().map(|n| n.end_ms()).fold(0.0, f64::max) / 1000.0;
    log::info!("playing {voices} notes ({end_s:.1} s)");
    std::thread::sleep(Duration::from_secs_f64(PLAYBACK_LEAD_S + end_s + STOP_TAIL_S));
    Ok(())
}

// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use fileplay::audio::decoder::{file_info, FileDecoder, FileInfo, InfoTag};
use fileplay::audio::resampler::SrcQuality;
use fileplay::player::{PlayState, Player, Track};
use fileplay::util::{clock, filename_display};
use fileplay::{audio, config, midi};

/// Control changes queued between the MIDI input and the output callback.
const MIDI_QUEUE_SIZE: usize = 256;

/// How often `play` reports the transport.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A double-buffered audio file player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Prints the format and metadata tags of an audio file.
    Info {
        /// The audio file to inspect.
        path: PathBuf,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Plays an audio file until it ends or Ctrl-C.
    Play {
        /// The audio file to play.
        path: PathBuf,
        /// The path to a player config.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// The audio device to play through. Overrides the config.
        #[arg(short, long)]
        device: Option<String>,
        /// The MIDI input to take control changes from. Overrides the config.
        #[arg(short, long)]
        midi_device: Option<String>,
        /// Loop the file.
        #[arg(short, long = "loop")]
        looping: bool,
        /// Linear output gain, 0.0 to 2.0.
        #[arg(short, long)]
        volume: Option<f32>,
        /// Sample rate conversion quality: best, medium, fastest, zero_order_hold or linear.
        #[arg(short, long)]
        quality: Option<String>,
        /// Position to start from, in seconds.
        #[arg(short, long)]
        start: Option<f64>,
        /// Where each pass of the loop begins, in seconds.
        #[arg(long)]
        loop_start: Option<f64>,
        /// Where each pass of the loop ends, in seconds.
        #[arg(long)]
        loop_end: Option<f64>,
        /// File channel for output A, or "mix" for the left of every stereo pair.
        #[arg(long, allow_hyphen_values = true)]
        track_a: Option<Track>,
        /// File channel for output B, or "mix" for the right of every stereo pair.
        #[arg(long, allow_hyphen_values = true)]
        track_b: Option<Track>,
    },
}

/// Everything `info` knows about a file.
#[derive(Serialize)]
struct FileReport {
    file: String,
    #[serde(flatten)]
    info: FileInfo,
    duration: f64,
    tags: BTreeMap<&'static str, String>,
}

impl FileReport {
    fn read(path: &Path) -> Result<FileReport, Box<dyn Error>> {
        let info = FileDecoder::open(path)?.info().clone();
        let tags = InfoTag::ALL
            .iter()
            .map(|tag| (tag.name(), file_info(path, *tag)))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        Ok(FileReport {
            file: filename_display(path).to_string(),
            duration: info.duration(),
            info,
            tags,
        })
    }
}

impl std::fmt::Display for FileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.file)?;
        writeln!(f, "  format:      {}", self.info.format)?;
        writeln!(f, "  sample rate: {}", self.info.sample_rate)?;
        writeln!(f, "  channels:    {}", self.info.channels)?;
        writeln!(f, "  frames:      {}", self.info.frames)?;
        write!(f, "  duration:    {}", clock(self.duration))?;
        for (name, value) in &self.tags {
            write!(f, "\n  {:<12} {}", format!("{}:", name), value)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Info { path, json } => {
            let report = FileReport::read(&path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }
        Commands::Play {
            path,
            config,
            device,
            midi_device,
            looping,
            volume,
            quality,
            start,
            loop_start,
            loop_end,
            track_a,
            track_b,
        } => {
            let player_config = match config {
                Some(config) => config::Player::load(&config)?,
                None => config::Player::default(),
            };

            let mut settings = player_config.settings()?;
            settings.looping |= looping;
            if let Some(quality) = quality {
                settings.quality = quality.parse::<SrcQuality>()?;
            }

            let mut audio_config = player_config.audio();
            if let Some(device) = device {
                audio_config = audio_config.with_device(&device);
            }
            let device = audio::get_device(&audio_config)?;
            info!(device = %device, "Using audio device.");

            let (player, consumer) = Player::new(device.sample_rate(), settings);
            if let Some(volume) = volume {
                player.set_volume(volume)?;
            }
            let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
            player.watch_notifications(notify_tx);
            std::thread::spawn(move || {
                for notification in notify_rx {
                    debug!(?notification, "Player changed.");
                }
            });

            player.open(&path)?;
            if let Some(loop_end) = loop_end {
                player.set_loop_end(loop_end)?;
            }
            if let Some(loop_start) = loop_start {
                player.set_loop_start(loop_start)?;
            }
            if let Some(track) = track_a {
                player.set_track_a(track)?;
            }
            if let Some(track) = track_b {
                player.set_track_b(track)?;
            }

            let (controls_tx, controls_rx) = crossbeam_channel::bounded(MIDI_QUEUE_SIZE);
            let midi_device = match midi_device.or(player_config.midi_device().map(String::from)) {
                Some(name) => {
                    let midi_device = midi::get_device(&name)?;
                    midi_device.watch_events(controls_tx)?;
                    info!(device = %midi_device, "Watching MIDI input.");
                    Some(midi_device)
                }
                None => None,
            };

            let output = device.start(consumer, controls_rx)?;
            if let Some(start) = start {
                player.set_position(start);
            }
            player.start_playback();

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            let mut ticker = tokio::time::interval(STATUS_INTERVAL);
            loop {
                tokio::select! {
                    result = &mut ctrl_c => {
                        if let Err(e) = result {
                            warn!(err = %e, "Unable to listen for Ctrl-C.");
                        }
                        info!("Interrupted.");
                        break;
                    }
                    _ = ticker.tick() => {
                        let status = player.status();
                        info!(
                            state = %status.play_state,
                            position = clock(status.position),
                            duration = clock(status.duration),
                            volume = status.volume,
                            looping = status.looping,
                            underruns = status.underruns,
                            "Status."
                        );
                        // With a MIDI input attached, playback can be restarted.
                        if status.play_state == PlayState::Stopped && midi_device.is_none() {
                            break;
                        }
                    }
                }
            }

            player.stop_playback();
            output.stop();
            if let Some(midi_device) = midi_device {
                midi_device.stop_watch_events();
            }
            player.close();
        }
    }

    Ok(())
}

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
use std::{path::Path, time::Duration};

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::{Audio, ConfigError};
use crate::audio::resampler::SrcQuality;
use crate::player::{PlayerSettings, DEFAULT_BUFFER_SIZE, DEFAULT_POLL_INTERVAL, MAX_VOLUME};

/// The player configuration file.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Player {
    /// The audio output to use.
    audio: Option<Audio>,
    /// The MIDI input to take control changes from.
    midi_device: Option<String>,
    /// Samples per audio buffer, across all channels.
    buffer_size: Option<usize>,
    /// How long the producer sleeps between checks when not woken.
    poll_interval: Option<String>,
    /// Sample rate conversion quality, by name.
    src_quality: Option<String>,
    volume: Option<f32>,
    #[serde(rename = "loop")]
    looping: Option<bool>,
}

impl Player {
    /// Loads the player configuration from a file.
    pub fn load(path: &Path) -> Result<Player, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Player>()?)
    }

    /// Returns the audio output configuration (default device "default").
    pub fn audio(&self) -> Audio {
        self.audio.clone().unwrap_or_default()
    }

    /// Returns the MIDI input device, if any.
    pub fn midi_device(&self) -> Option<&str> {
        self.midi_device.as_deref()
    }

    /// Returns the producer poll interval (default: 10ms).
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        match &self.poll_interval {
            Some(value) => DurationString::from_string(value.clone())
                .map(Duration::from)
                .map_err(|e| ConfigError::Duration {
                    field: "poll_interval",
                    value: value.clone(),
                    message: e.to_string(),
                }),
            None => Ok(DEFAULT_POLL_INTERVAL),
        }
    }

    /// Returns the sample rate conversion quality (default: fastest).
    pub fn src_quality(&self) -> Result<SrcQuality, ConfigError> {
        match &self.src_quality {
            Some(value) => value
                .parse::<SrcQuality>()
                .map_err(|message| ConfigError::Invalid {
                    field: "src_quality",
                    message,
                }),
            None => Ok(SrcQuality::default()),
        }
    }

    /// Validates the file and converts it into player settings.
    pub fn settings(&self) -> Result<PlayerSettings, ConfigError> {
        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_size",
                message: "must be greater than zero".to_string(),
            });
        }

        let volume = self.volume.unwrap_or(1.0);
        if !(0.0..=MAX_VOLUME).contains(&volume) {
            return Err(ConfigError::Invalid {
                field: "volume",
                message: format!("{} is outside 0.0..={}", volume, MAX_VOLUME),
            });
        }

        Ok(PlayerSettings {
            buffer_size,
            poll_interval: self.poll_interval()?,
            quality: self.src_quality()?,
            volume,
            looping: self.looping.unwrap_or(false),
        })
    }
}

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
use serde::Deserialize;

/// Output rate used when neither the config nor the device says otherwise.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Frames per block for the mock output.
pub const DEFAULT_BLOCK_SIZE: usize = 256;

/// A YAML representation of the audio output configuration.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Audio {
    /// The audio device. Names starting with "mock" select the simulated output.
    device: String,

    /// Output sample rate in Hz. cpal devices use their default rate when unset.
    sample_rate: Option<u32>,

    /// Frames per block for the mock output (default: 256).
    block_size: Option<usize>,
}

impl Default for Audio {
    fn default() -> Self {
        Audio::new("default")
    }
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: device.to_string(),
            sample_rate: None,
            block_size: None,
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns a copy of this configuration for another device.
    pub fn with_device(&self, device: &str) -> Audio {
        Audio {
            device: device.to_string(),
            ..self.clone()
        }
    }

    /// Returns the configured sample rate, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Returns the configured sample rate (default: 44100).
    pub fn sample_rate_or_default(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the mock output block size (default: 256).
    pub fn block_size(&self) -> usize {
        self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE).max(1)
    }
}

#[cfg(test)]
mod tests {
    use config::{Config, File, FileFormat};

    use super::*;

    #[test]
    fn test_audio_defaults() {
        let yaml = r#"
            device: "Scarlett 2i2"
        "#;
        let audio: Audio = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(audio.device(), "Scarlett 2i2");
        assert_eq!(audio.sample_rate(), None);
        assert_eq!(audio.sample_rate_or_default(), DEFAULT_SAMPLE_RATE);
        assert_eq!(audio.block_size(), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_audio_overrides() {
        let yaml = r#"
            device: mock-output
            sample_rate: 48000
            block_size: 128
        "#;
        let audio: Audio = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(audio.sample_rate(), Some(48000));
        assert_eq!(audio.block_size(), 128);

        let other = audio.with_device("Built-in Output");
        assert_eq!(other.device(), "Built-in Output");
        assert_eq!(other.sample_rate(), Some(48000));
    }
}

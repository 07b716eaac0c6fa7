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
use std::{any::Any, error::Error, fmt, io, sync::Arc, thread::JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::config;
use crate::midi::ControlChange;
use crate::player::Consumer;

pub mod buffer;
pub mod cpal;
pub mod decoder;
#[cfg(test)]
pub mod memory;
pub mod mock;
pub mod resampler;
pub mod source;
mod thread_priority;

/// Largest number of frames handed to the consumer in one call. Host
/// callbacks larger than this are rendered in several passes.
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// Control changes collected per host callback. Extra messages wait for the
/// next callback.
pub const MAX_CONTROLS_PER_BLOCK: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no audio device found with name {0}")]
    DeviceNotFound(String),

    #[error("unable to query audio device {device}: {message}")]
    Query { device: String, message: String },

    #[error("unsupported output sample format {0}")]
    UnsupportedFormat(String),

    #[error("unable to build output stream: {0}")]
    BuildStream(#[from] ::cpal::BuildStreamError),

    #[error("unable to start output stream: {0}")]
    PlayStream(#[from] ::cpal::PlayStreamError),

    #[error("unable to spawn output thread")]
    ThreadSpawn(#[source] io::Error),

    #[error("output thread exited before the stream started")]
    OutputExited,
}

/// An audio output that drives a [`Consumer`] from its own clock.
pub trait Device: Any + fmt::Display + Send + Sync {
    /// The rate the device renders at. Players feeding this device must be
    /// created with it.
    fn sample_rate(&self) -> u32;

    /// Starts rendering `consumer`. Control changes received on `controls`
    /// are handed to the consumer with the block they arrived in. Output
    /// runs until the returned handle is stopped or dropped.
    fn start(
        &self,
        consumer: Consumer,
        controls: Receiver<ControlChange>,
    ) -> Result<OutputHandle, AudioError>;
}

/// A running output. Dropping it stops the output and joins its thread.
pub struct OutputHandle {
    shutdown: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl OutputHandle {
    pub(crate) fn new(shutdown: Sender<()>, join: JoinHandle<()>) -> OutputHandle {
        OutputHandle {
            shutdown: Some(shutdown),
            join: Some(join),
        }
    }

    /// Stops the output and waits for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        // Disconnecting the channel is the shutdown signal.
        self.shutdown.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets the device named in the configuration.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Device>, AudioError> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(
            device,
            config.sample_rate_or_default(),
            config.block_size(),
        )));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_mock_device() {
        let config = config::Audio::new("mock-output");
        let device = get_device(&config).expect("mock device should always be available");
        assert_eq!(device.sample_rate(), config::DEFAULT_SAMPLE_RATE);
        assert_eq!(device.to_string(), "mock-output (Mock)");
    }
}

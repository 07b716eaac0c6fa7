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
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, span, Level};

use crate::audio::{AudioError, OutputHandle, MAX_BLOCK_FRAMES, MAX_CONTROLS_PER_BLOCK};
use crate::midi::ControlChange;
use crate::player::Consumer;

/// A simulated output. Renders blocks on a timer and throws them away.
#[derive(Clone)]
pub struct Device {
    name: String,
    sample_rate: u32,
    block_size: usize,
    blocks: Arc<AtomicU64>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str, sample_rate: u32, block_size: usize) -> Device {
        Device {
            name: name.to_string(),
            sample_rate: sample_rate.max(1),
            block_size: block_size.clamp(1, MAX_BLOCK_FRAMES),
            blocks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of blocks rendered so far.
    #[cfg(test)]
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    fn block_period(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }
}

impl crate::audio::Device for Device {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(
        &self,
        mut consumer: Consumer,
        controls: Receiver<ControlChange>,
    ) -> Result<OutputHandle, AudioError> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let period = self.block_period();
        let block_size = self.block_size;
        let blocks = self.blocks.clone();
        let name = self.name.clone();

        let join = thread::Builder::new()
            .name("fileplay-output".into())
            .spawn(move || {
                let span = span!(Level::INFO, "output (mock)");
                let _enter = span.enter();
                info!(device = name, block_size, "Mock output started.");

                let mut out_a = vec![0.0f32; block_size];
                let mut out_b = vec![0.0f32; block_size];
                let mut pending = Vec::with_capacity(MAX_CONTROLS_PER_BLOCK);
                loop {
                    match shutdown_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    pending.clear();
                    pending.extend(controls.try_iter().take(MAX_CONTROLS_PER_BLOCK));
                    consumer.process(&mut out_a, &mut out_b, &pending);
                    blocks.fetch_add(1, Ordering::Relaxed);
                }
                debug!(
                    device = name,
                    blocks = blocks.load(Ordering::Relaxed),
                    "Mock output stopped."
                );
            })
            .map_err(AudioError::ThreadSpawn)?;

        Ok(OutputHandle::new(shutdown_tx, join))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name,)
    }
}

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
use std::{error::Error, fmt, sync::Arc};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::ControlChange;

/// A mock device. Events only arrive through `mock_event`.
#[derive(Clone)]
pub struct Device {
    name: String,
    sender: Arc<Mutex<Option<Sender<ControlChange>>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Delivers a raw MIDI message as if it came from the wire.
    #[cfg(test)]
    pub fn mock_event(&self, raw: &[u8]) {
        let sender = self.sender.lock();
        if let (Some(sender), Some(cc)) = (sender.as_ref(), ControlChange::parse(raw)) {
            let _ = sender.try_send(cc);
        }
    }
}

impl super::Device for Device {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn watch_events(&self, sender: Sender<ControlChange>) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "midi input (mock)");
        let _enter = span.enter();

        let mut watching = self.sender.lock();
        if watching.is_some() {
            return Err("Already watching events.".into());
        }
        info!(device = self.name, "Watching MIDI events.");
        *watching = Some(sender);
        Ok(())
    }

    fn stop_watch_events(&self) {
        self.sender.lock().take();
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

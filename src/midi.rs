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
use midly::{live::LiveEvent, MidiMessage};

mod midir;
mod mock;

/// Controller number that sets the volume.
pub const CC_VOLUME: u8 = 7;
/// Controller number that starts (>= 64) or stops (< 64) playback.
pub const CC_PLAY: u8 = 68;
/// Controller number that enables (>= 64) or disables (< 64) looping.
pub const CC_LOOP: u8 = 69;

/// A control change message on any channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChange {
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

impl ControlChange {
    pub fn new(channel: u8, controller: u8, value: u8) -> ControlChange {
        ControlChange {
            channel,
            controller,
            value,
        }
    }

    /// Parses a raw MIDI message, keeping only control changes.
    pub fn parse(raw: &[u8]) -> Option<ControlChange> {
        match LiveEvent::parse(raw).ok()? {
            LiveEvent::Midi {
                channel,
                message: MidiMessage::Controller { controller, value },
            } => Some(ControlChange::new(
                channel.as_int(),
                controller.as_int(),
                value.as_int(),
            )),
            _ => None,
        }
    }
}

/// What a control change does to the transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    /// Linear gain, at most 1.0 from MIDI.
    Volume(f32),
    Play(bool),
    Loop(bool),
}

impl TransportCommand {
    pub fn from_control(cc: ControlChange) -> Option<TransportCommand> {
        match cc.controller {
            CC_VOLUME => Some(TransportCommand::Volume(
                (cc.value as f32 / 100.0).min(1.0),
            )),
            CC_PLAY => Some(TransportCommand::Play(cc.value >= 64)),
            CC_LOOP => Some(TransportCommand::Loop(cc.value >= 64)),
            _ => None,
        }
    }
}

/// A MIDI input that delivers control changes.
pub trait Device: fmt::Display + Send + Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Watches MIDI input and sends control changes to the given sender.
    /// Messages are dropped if the sender is full.
    fn watch_events(&self, sender: Sender<ControlChange>) -> Result<(), Box<dyn Error>>;

    /// Stops watching events.
    fn stop_watch_events(&self);
}

/// Lists MIDI inputs known to midir.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    midir::list()
}

/// Gets a device with the given name.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(midir::get(name)?))
}

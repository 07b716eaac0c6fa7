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
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;

use crate::audio::resampler::SrcQuality;

use super::state::{PlayState, Track, Transport, LOOP_END_OF_FILE};

/// How far the position moves, in seconds, before it is reported again.
pub const DEFAULT_POSITION_DELTA: f64 = 0.1;

/// A change in a player's state. Sent from the producer thread, never from
/// the audio callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Notification {
    PlayState(PlayState),
    /// Seconds.
    Position(f64),
    Volume(f32),
    Loop(bool),
    /// Seconds.
    LoopStart(f64),
    /// Seconds.
    LoopEnd(f64),
    TrackA(Track),
    TrackB(Track),
    Quality(SrcQuality),
}

/// Where a player's notifications go.
pub(crate) struct Notifier {
    sender: Mutex<Option<Sender<Notification>>>,
    /// f64 bits.
    position_delta: AtomicU64,
}

impl Notifier {
    pub(crate) fn new() -> Notifier {
        Notifier {
            sender: Mutex::new(None),
            position_delta: AtomicU64::new(DEFAULT_POSITION_DELTA.to_bits()),
        }
    }

    pub(crate) fn set_sender(&self, sender: Option<Sender<Notification>>) {
        *self.sender.lock() = sender;
    }

    pub(crate) fn position_delta(&self) -> f64 {
        f64::from_bits(self.position_delta.load(Ordering::Relaxed))
    }

    pub(crate) fn set_position_delta(&self, seconds: f64) {
        self.position_delta
            .store(seconds.to_bits(), Ordering::Relaxed);
    }

    fn is_watched(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Sends one notification. A receiver that went away is forgotten.
    fn send(&self, notification: Notification) {
        let mut sender = self.sender.lock();
        if let Some(tx) = sender.as_ref() {
            if tx.send(notification).is_err() {
                *sender = None;
            }
        }
    }
}

/// The values last reported.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    play_state: PlayState,
    position: f64,
    volume: f32,
    looping: bool,
    loop_start: f64,
    loop_end: f64,
    track_a: Track,
    track_b: Track,
    quality: SrcQuality,
}

impl Snapshot {
    fn take(transport: &Transport, file_rate: u32, duration: f64) -> Snapshot {
        let (start, end) = transport.loop_range();
        let seconds = |frames: u64| {
            if file_rate == 0 {
                0.0
            } else {
                frames as f64 / file_rate as f64
            }
        };
        Snapshot {
            play_state: transport.play_state(),
            position: transport.position(),
            volume: transport.volume(),
            looping: transport.is_loop(),
            loop_start: seconds(start),
            loop_end: if end == LOOP_END_OF_FILE {
                duration
            } else {
                seconds(end)
            },
            track_a: transport.track_a(),
            track_b: transport.track_b(),
            quality: transport.quality(),
        }
    }
}

/// Compares the transport against what was last reported and sends the
/// differences. The first check after a subscription reports everything.
#[derive(Default)]
pub(crate) struct Watcher {
    last: Option<Snapshot>,
}

impl Watcher {
    pub(crate) fn check(
        &mut self,
        transport: &Transport,
        notifier: &Notifier,
        file_rate: u32,
        duration: f64,
    ) {
        if !notifier.is_watched() {
            self.last = None;
            return;
        }

        let now = Snapshot::take(transport, file_rate, duration);
        let last = self.last.get_or_insert(Snapshot {
            // Nothing matches on the first check.
            position: f64::NAN,
            volume: f32::NAN,
            loop_start: f64::NAN,
            loop_end: f64::NAN,
            play_state: now.play_state,
            looping: !now.looping,
            track_a: now.track_a,
            track_b: now.track_b,
            quality: now.quality,
        });
        let first = last.position.is_nan();

        if first || last.play_state != now.play_state {
            notifier.send(Notification::PlayState(now.play_state));
        }
        if first || (now.position - last.position).abs() >= notifier.position_delta() {
            last.position = now.position;
            notifier.send(Notification::Position(now.position));
        }
        if first || (now.volume - last.volume).abs() >= 0.01 {
            last.volume = now.volume;
            notifier.send(Notification::Volume(now.volume));
        }
        if last.looping != now.looping {
            notifier.send(Notification::Loop(now.looping));
        }
        if first || last.loop_start != now.loop_start {
            notifier.send(Notification::LoopStart(now.loop_start));
        }
        if first || last.loop_end != now.loop_end {
            notifier.send(Notification::LoopEnd(now.loop_end));
        }
        if first || last.track_a != now.track_a {
            notifier.send(Notification::TrackA(now.track_a));
        }
        if first || last.track_b != now.track_b {
            notifier.send(Notification::TrackB(now.track_b));
        }
        if first || last.quality != now.quality {
            notifier.send(Notification::Quality(now.quality));
        }

        // Position and volume only move on once reported.
        *last = Snapshot {
            position: last.position,
            volume: last.volume,
            ..now
        };
    }
}

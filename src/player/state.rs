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
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering,
};

use serde::Serialize;

use crate::audio::buffer::BufferPool;
use crate::audio::resampler::SrcQuality;

/// Transport state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PlayState {
    Stopped = 0,
    Starting = 1,
    Playing = 2,
    Stopping = 3,
}

impl PlayState {
    fn from_u8(value: u8) -> PlayState {
        match value {
            1 => PlayState::Starting,
            2 => PlayState::Playing,
            3 => PlayState::Stopping,
            _ => PlayState::Stopped,
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlayState::Stopped => "stopped",
            PlayState::Starting => "starting",
            PlayState::Playing => "playing",
            PlayState::Stopping => "stopping",
        })
    }
}

/// Seek handshake between the controller and the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SeekState {
    /// Normal playback.
    Idle = 0,
    /// A new position was requested and the producer has not picked it up.
    Seeking = 1,
    /// The producer is refilling the buffers from the new position.
    Loading = 2,
}

impl SeekState {
    fn from_u8(value: u8) -> SeekState {
        match value {
            1 => SeekState::Seeking,
            2 => SeekState::Loading,
            _ => SeekState::Idle,
        }
    }
}

/// The file channel sent to one of the two outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// A single channel of the file.
    Channel(usize),
    /// The average of every stereo pair: even channels for output A, odd
    /// channels for output B.
    Mix,
}

impl Track {
    fn to_i32(self) -> i32 {
        match self {
            Track::Channel(channel) => i32::try_from(channel).unwrap_or(i32::MAX),
            Track::Mix => -1,
        }
    }

    fn from_i32(value: i32) -> Track {
        match usize::try_from(value) {
            Ok(channel) => Track::Channel(channel),
            Err(_) => Track::Mix,
        }
    }

    /// Output A's sample for one interleaved frame.
    pub(crate) fn sample_a(self, frame: &[f32]) -> f32 {
        self.sample(frame, 0)
    }

    /// Output B's sample for one interleaved frame.
    pub(crate) fn sample_b(self, frame: &[f32]) -> f32 {
        self.sample(frame, 1)
    }

    fn sample(self, frame: &[f32], parity: usize) -> f32 {
        let channels = frame.len();
        if channels < 2 {
            return frame.first().copied().unwrap_or(0.0);
        }
        match self {
            Track::Channel(channel) => frame[channel.min(channels - 1)],
            Track::Mix => {
                let pairs = (channels / 2) as f32;
                frame.iter().skip(parity).step_by(2).sum::<f32>() / pairs
            }
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::Channel(channel) => write!(f, "{}", channel),
            Track::Mix => f.write_str("mix"),
        }
    }
}

impl FromStr for Track {
    type Err = String;

    /// A channel number, or `mix` (also `-1`) for every stereo pair.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("mix") || s == "-1" {
            return Ok(Track::Mix);
        }
        s.parse::<usize>()
            .map(Track::Channel)
            .map_err(|_| format!("unknown track {:?}, expected a channel number or \"mix\"", s))
    }
}

/// No loop end set: loop at the end of the file.
pub(crate) const LOOP_END_OF_FILE: u64 = u64::MAX;

/// State shared by the controller, the producer and the real-time consumer.
/// Every field is atomic; nothing here blocks.
pub struct Transport {
    pub(crate) buffers: BufferPool,
    play_state: AtomicU8,
    seek_state: AtomicU8,
    /// Bumped by the producer whenever it starts servicing a seek.
    seek_epoch: AtomicU32,
    /// Playback position in output frames.
    position: AtomicU64,
    /// Rate `position` is counted at. Only changes with a seek, so a new
    /// output rate doesn't rescale frames loaded at the old one.
    position_rate: AtomicU32,
    /// Buffer the consumer is reading from.
    active: AtomicUsize,
    output_rate: AtomicU32,
    /// f32 bits.
    volume: AtomicU32,
    looping: AtomicBool,
    /// Cleared once the producer has read the whole file.
    more: AtomicBool,
    /// True while a producer is running.
    open: AtomicBool,
    quality: AtomicU8,
    underruns: AtomicU64,
    /// Loop range in source frames.
    loop_start: AtomicU64,
    loop_end: AtomicU64,
    track_a: AtomicI32,
    track_b: AtomicI32,
}

impl Transport {
    pub fn new(buffer_size: usize, output_rate: u32) -> Transport {
        Transport {
            buffers: BufferPool::new(buffer_size),
            play_state: AtomicU8::new(PlayState::Stopped as u8),
            seek_state: AtomicU8::new(SeekState::Idle as u8),
            seek_epoch: AtomicU32::new(0),
            position: AtomicU64::new(0),
            position_rate: AtomicU32::new(output_rate),
            active: AtomicUsize::new(0),
            output_rate: AtomicU32::new(output_rate),
            volume: AtomicU32::new(1.0f32.to_bits()),
            looping: AtomicBool::new(false),
            more: AtomicBool::new(false),
            open: AtomicBool::new(false),
            quality: AtomicU8::new(SrcQuality::default() as u8),
            underruns: AtomicU64::new(0),
            loop_start: AtomicU64::new(0),
            loop_end: AtomicU64::new(LOOP_END_OF_FILE),
            track_a: AtomicI32::new(0),
            track_b: AtomicI32::new(1),
        }
    }

    pub fn play_state(&self) -> PlayState {
        PlayState::from_u8(self.play_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_play_state(&self, state: PlayState) {
        self.play_state.store(state as u8, Ordering::Release);
    }

    /// Moves from `from` to `to` only if nobody changed the state in between.
    pub(crate) fn transition(&self, from: PlayState, to: PlayState) -> bool {
        self.play_state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Asks the consumer to start playing. Returns false if playback is
    /// already starting or playing.
    pub fn request_start(&self) -> bool {
        self.play_state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                match PlayState::from_u8(state) {
                    PlayState::Stopped | PlayState::Stopping => Some(PlayState::Starting as u8),
                    PlayState::Starting | PlayState::Playing => None,
                }
            })
            .is_ok()
    }

    /// Asks the consumer to stop. Returns false if playback is already
    /// stopping or stopped.
    pub fn request_stop(&self) -> bool {
        self.play_state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                match PlayState::from_u8(state) {
                    PlayState::Starting | PlayState::Playing => Some(PlayState::Stopping as u8),
                    PlayState::Stopped | PlayState::Stopping => None,
                }
            })
            .is_ok()
    }

    pub fn seek_state(&self) -> SeekState {
        SeekState::from_u8(self.seek_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_seek_state(&self, state: SeekState) {
        self.seek_state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn seek_transition(&self, from: SeekState, to: SeekState) -> bool {
        self.seek_state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Records the target frame, counted at the current output rate, and
    /// hands the seek to the producer.
    pub(crate) fn begin_seek(&self, frame: u64) {
        self.position_rate
            .store(self.output_rate(), Ordering::Release);
        self.position.store(frame, Ordering::Release);
        self.set_seek_state(SeekState::Seeking);
    }

    pub(crate) fn seek_epoch(&self) -> u32 {
        self.seek_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn bump_seek_epoch(&self) {
        self.seek_epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Playback position in output frames.
    pub fn position_frames(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn set_position_frames(&self, frame: u64) {
        self.position.store(frame, Ordering::Release);
    }

    /// Advances the position from `from` to `to` unless a seek replaced it.
    pub(crate) fn advance_position(&self, from: u64, to: u64) {
        let _ = self
            .position
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Relaxed);
    }

    /// Playback position in seconds, at the rate the loaded audio was
    /// converted to.
    pub fn position(&self) -> f64 {
        let rate = self.position_rate.load(Ordering::Acquire);
        if rate == 0 {
            return 0.0;
        }
        self.position_frames() as f64 / rate as f64
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, index: usize) {
        self.active.store(index, Ordering::Release);
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate.load(Ordering::Acquire)
    }

    pub(crate) fn set_output_rate(&self, rate: u32) {
        self.output_rate.store(rate, Ordering::Release);
    }

    /// Marks the position as counted at `rate`.
    pub(crate) fn set_position_rate(&self, rate: u32) {
        self.position_rate.store(rate, Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub(crate) fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn is_loop(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }

    /// Sets looping and lets the producer read again, so enabling the loop
    /// after the end of the file picks up from the start.
    pub fn set_loop(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
        self.more.store(true, Ordering::Release);
    }

    pub(crate) fn more(&self) -> bool {
        self.more.load(Ordering::Acquire)
    }

    pub(crate) fn set_more(&self, more: bool) {
        self.more.store(more, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Release);
    }

    pub fn quality(&self) -> SrcQuality {
        SrcQuality::try_from(self.quality.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub(crate) fn set_quality(&self, quality: SrcQuality) {
        self.quality.store(quality as u8, Ordering::Release);
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub(crate) fn count_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Loop range in source frames. The end is [`LOOP_END_OF_FILE`] unless
    /// set.
    pub(crate) fn loop_range(&self) -> (u64, u64) {
        (
            self.loop_start.load(Ordering::Acquire),
            self.loop_end.load(Ordering::Acquire),
        )
    }

    pub(crate) fn set_loop_range(&self, start: u64, end: u64) {
        self.loop_start.store(start, Ordering::Release);
        self.loop_end.store(end, Ordering::Release);
    }

    pub fn track_a(&self) -> Track {
        Track::from_i32(self.track_a.load(Ordering::Relaxed))
    }

    pub fn track_b(&self) -> Track {
        Track::from_i32(self.track_b.load(Ordering::Relaxed))
    }

    pub(crate) fn set_tracks(&self, a: Track, b: Track) {
        self.track_a.store(a.to_i32(), Ordering::Relaxed);
        self.track_b.store(b.to_i32(), Ordering::Relaxed);
    }
}

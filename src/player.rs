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
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, span, Level, Span};

use crate::audio::decoder::FileInfo;
use crate::audio::resampler::SrcQuality;
use crate::util::filename_display;

mod consumer;
mod error;
mod notify;
mod producer;
mod state;

pub use consumer::Consumer;
pub use error::PlayerError;
pub use notify::{Notification, DEFAULT_POSITION_DELTA};
pub use state::{PlayState, SeekState, Track};

use notify::Notifier;
use producer::Producer;
use state::{Transport, LOOP_END_OF_FILE};

/// Samples per audio buffer unless configured otherwise.
pub const DEFAULT_BUFFER_SIZE: usize = 200_000;

/// How long the producer sleeps between iterations unless woken.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Loudest volume the controller accepts.
pub const MAX_VOLUME: f32 = 2.0;

/// Tunables that don't depend on the file being played.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSettings {
    /// Samples per buffer, across all channels.
    pub buffer_size: usize,
    pub poll_interval: Duration,
    pub quality: SrcQuality,
    pub volume: f32,
    pub looping: bool,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        PlayerSettings {
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            quality: SrcQuality::default(),
            volume: 1.0,
            looping: false,
        }
    }
}

/// A point-in-time view of a player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub file: Option<String>,
    pub play_state: PlayState,
    pub seek_state: SeekState,
    /// Seconds.
    pub position: f64,
    /// Seconds.
    pub duration: f64,
    pub volume: f32,
    pub looping: bool,
    /// Seconds.
    pub loop_start: f64,
    /// Seconds.
    pub loop_end: f64,
    pub track_a: Track,
    pub track_b: Track,
    pub underruns: u64,
}

/// An open file and the producer streaming it.
struct Session {
    path: PathBuf,
    info: FileInfo,
    join: JoinHandle<()>,
}

impl Session {
    /// File frame for `seconds`.
    fn frame(&self, seconds: f64) -> u64 {
        (seconds * self.info.sample_rate as f64).round() as u64
    }

    fn seconds(&self, frame: u64) -> f64 {
        if self.info.sample_rate == 0 {
            return 0.0;
        }
        frame as f64 / self.info.sample_rate as f64
    }

    /// Loop start and end in seconds.
    fn loop_seconds(&self, transport: &Transport) -> (f64, f64) {
        let (start, end) = transport.loop_range();
        let end = if end == LOOP_END_OF_FILE {
            self.info.duration()
        } else {
            self.seconds(end)
        };
        (self.seconds(start), end)
    }
}

/// Transport controller for one file player. The matching [`Consumer`] goes
/// to the audio output; everything here may block and must stay off the
/// real-time thread.
pub struct Player {
    transport: Arc<Transport>,
    settings: PlayerSettings,
    session: Mutex<Option<Session>>,
    /// Shared with the consumer so a drained buffer gets refilled at once.
    wake: Sender<()>,
    wake_rx: Receiver<()>,
    notifier: Arc<Notifier>,
    span: Span,
}

impl Player {
    /// Creates a player rendering at `output_rate` and the consumer that
    /// renders it.
    pub fn new(output_rate: u32, settings: PlayerSettings) -> (Player, Consumer) {
        let transport = Arc::new(Transport::new(settings.buffer_size, output_rate));
        transport.set_volume(settings.volume.clamp(0.0, MAX_VOLUME));
        transport.set_loop(settings.looping);
        transport.set_quality(settings.quality);

        let (wake, wake_rx) = crossbeam_channel::bounded(1);
        let consumer = Consumer::new(transport.clone(), wake.clone());
        let player = Player {
            transport,
            settings,
            session: Mutex::new(None),
            wake,
            wake_rx,
            notifier: Arc::new(Notifier::new()),
            span: span!(Level::INFO, "player"),
        };
        (player, consumer)
    }

    fn wake(&self) {
        // A full channel already has a wake-up pending.
        let _ = self.wake.try_send(());
    }

    /// Opens `path`, replacing any open file. Returns once the file has been
    /// decoded far enough to know its format and the first buffers are
    /// loaded. Loop points and track selection go back to their defaults.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<FileInfo, PlayerError> {
        let _enter = self.span.enter();
        self.close();

        let path = path.as_ref().to_path_buf();
        let (report_tx, report_rx) = crossbeam_channel::bounded(1);
        let wake_rx = self.wake_rx.clone();
        let notifier = self.notifier.clone();
        let poll_interval = self.settings.poll_interval;

        self.transport.set_open(true);
        let join = {
            let transport = self.transport.clone();
            let path = path.clone();
            thread::Builder::new()
                .name("fileplay-producer".to_string())
                .spawn(move || match Producer::open(transport, &path) {
                    Ok((mut producer, info)) => {
                        producer.step();
                        let _ = report_tx.send(Ok(info));
                        producer.run(wake_rx, poll_interval, notifier);
                    }
                    Err(e) => {
                        error!(file = %path.display(), err = %e, "Unable to open file");
                        let _ = report_tx.send(Err(e));
                    }
                })
        };
        let join = match join {
            Ok(join) => join,
            Err(e) => {
                self.transport.set_open(false);
                return Err(PlayerError::WorkerSpawn(e));
            }
        };

        let info = match report_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(source)) => {
                self.transport.set_open(false);
                let _ = join.join();
                return Err(PlayerError::Open { path, source });
            }
            Err(_) => {
                self.transport.set_open(false);
                let _ = join.join();
                return Err(PlayerError::WorkerExited(path));
            }
        };

        info!(
            file = filename_display(&path),
            sample_rate = info.sample_rate,
            channels = info.channels,
            frames = info.frames,
            format = info.format,
            "Opened file"
        );
        *self.session.lock() = Some(Session {
            path,
            info: info.clone(),
            join,
        });
        Ok(info)
    }

    /// Stops playback, waits for the producer to exit and forgets the file.
    /// Does nothing if no file is open.
    pub fn close(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        let _enter = self.span.enter();

        self.transport.request_stop();
        self.transport.set_open(false);
        self.wake();
        if session.join.join().is_err() {
            error!("File producer panicked");
        }
        self.transport.set_play_state(PlayState::Stopped);
        info!(file = filename_display(&session.path), "Closed file");
    }

    fn with_session<T>(&self, f: impl FnOnce(&Session) -> T) -> Option<T> {
        self.session.lock().as_ref().map(f)
    }

    /// Duration of the open file in seconds, 0.0 if none is open.
    pub fn duration(&self) -> f64 {
        self.with_session(|session| session.info.duration())
            .unwrap_or(0.0)
    }

    /// Jumps to `seconds`, clamped to the file, or to the loop while looping.
    /// Playback is silent until the producer has loaded the new position.
    pub fn set_position(&self, seconds: f64) {
        let _enter = self.span.enter();
        self.with_session(|session| self.seek(session, seconds));
    }

    fn seek(&self, session: &Session, seconds: f64) {
        let duration = session.info.duration();
        let mut seconds = seconds.max(0.0);
        if duration > 0.0 {
            seconds = seconds.min(duration);
        }
        if self.transport.is_loop() {
            let (start, end) = session.loop_seconds(&self.transport);
            seconds = seconds.clamp(start, end.max(start));
        }
        let frame = (seconds * self.transport.output_rate() as f64).round() as u64;
        debug!(seconds, frame, "Seek requested");
        self.transport.begin_seek(frame);
        self.wake();
    }

    /// Seeks to the loop start if looping and the position is outside the
    /// loop.
    fn enter_loop(&self, session: &Session) {
        if !self.transport.is_loop() {
            return;
        }
        let (start, end) = session.loop_seconds(&self.transport);
        let position = self.transport.position();
        if position < start || position > end {
            self.seek(session, start);
        }
    }

    /// Playback position in seconds.
    pub fn position(&self) -> f64 {
        self.transport.position()
    }

    /// Starts playing from the current position. After the end of the file
    /// this is the start of the file again.
    pub fn start_playback(&self) {
        self.with_session(|_| {
            if self.transport.request_start() {
                self.wake();
            }
        });
    }

    pub fn stop_playback(&self) {
        self.transport.request_stop();
    }

    pub fn play_state(&self) -> PlayState {
        self.transport.play_state()
    }

    /// Turns looping on or off. Turning it on moves the position into the
    /// loop if it is outside.
    pub fn set_loop(&self, looping: bool) {
        self.transport.set_loop(looping);
        self.with_session(|session| self.enter_loop(session));
        self.wake();
    }

    pub fn is_loop(&self) -> bool {
        self.transport.is_loop()
    }

    /// Sets where each pass of the loop begins, in seconds. It must come
    /// before the loop end.
    pub fn set_loop_start(&self, seconds: f64) -> Result<(), PlayerError> {
        let _enter = self.span.enter();
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(PlayerError::NotOpen)?;

        let (_, end) = self.transport.loop_range();
        let limit = if end == LOOP_END_OF_FILE {
            session.info.frames
        } else {
            end
        };
        let start = session.frame(seconds);
        if !seconds.is_finite() || seconds < 0.0 || (limit > 0 && start >= limit) {
            return Err(PlayerError::InvalidLoopPoint(seconds));
        }

        self.transport.set_loop_range(start, end);
        debug!(seconds, frame = start, "Loop start set");
        self.enter_loop(session);
        self.wake();
        Ok(())
    }

    /// Sets where each pass of the loop ends, in seconds. It must come after
    /// the loop start and no later than the end of the file.
    pub fn set_loop_end(&self, seconds: f64) -> Result<(), PlayerError> {
        let _enter = self.span.enter();
        let guard = self.session.lock();
        let session = guard.as_ref().ok_or(PlayerError::NotOpen)?;

        let (start, _) = self.transport.loop_range();
        let frames = session.info.frames;
        let end = session.frame(seconds);
        if !seconds.is_finite() || end <= start || (frames > 0 && end > frames) {
            return Err(PlayerError::InvalidLoopPoint(seconds));
        }

        let end = if end == frames { LOOP_END_OF_FILE } else { end };
        self.transport.set_loop_range(start, end);
        debug!(seconds, frame = end, "Loop end set");
        self.enter_loop(session);
        self.wake();
        Ok(())
    }

    /// Loop start in seconds, 0.0 if no file is open.
    pub fn loop_start(&self) -> f64 {
        self.with_session(|session| session.loop_seconds(&self.transport).0)
            .unwrap_or(0.0)
    }

    /// Loop end in seconds, the duration unless set.
    pub fn loop_end(&self) -> f64 {
        self.with_session(|session| session.loop_seconds(&self.transport).1)
            .unwrap_or(0.0)
    }

    /// Checks `track` against the open file. Mono files only have track 0.
    fn validate_track(&self, track: Track) -> Result<Track, PlayerError> {
        let channels = self
            .with_session(|session| session.info.channels)
            .ok_or(PlayerError::NotOpen)?;
        match track {
            _ if channels < 2 => Ok(Track::Channel(0)),
            Track::Channel(channel) if channel >= channels => {
                Err(PlayerError::InvalidTrack { track: channel, channels })
            }
            track => Ok(track),
        }
    }

    /// Selects the file channel played on output A.
    pub fn set_track_a(&self, track: Track) -> Result<(), PlayerError> {
        let track = self.validate_track(track)?;
        self.transport.set_tracks(track, self.transport.track_b());
        Ok(())
    }

    /// Selects the file channel played on output B.
    pub fn set_track_b(&self, track: Track) -> Result<(), PlayerError> {
        let track = self.validate_track(track)?;
        self.transport.set_tracks(self.transport.track_a(), track);
        Ok(())
    }

    pub fn track_a(&self) -> Track {
        self.transport.track_a()
    }

    pub fn track_b(&self) -> Track {
        self.transport.track_b()
    }

    /// Sets the output gain. Values outside 0.0..=2.0 are rejected.
    pub fn set_volume(&self, volume: f32) -> Result<(), PlayerError> {
        if !(0.0..=MAX_VOLUME).contains(&volume) {
            return Err(PlayerError::InvalidVolume(volume));
        }
        self.transport.set_volume(volume);
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        self.transport.volume()
    }

    /// Sets the conversion quality used from the next seek or open.
    pub fn set_src_quality(&self, quality: SrcQuality) {
        self.transport.set_quality(quality);
    }

    /// Sets the conversion quality by index, see [`SrcQuality`].
    pub fn set_src_quality_index(&self, index: u8) -> Result<(), PlayerError> {
        self.set_src_quality(SrcQuality::try_from(index)?);
        Ok(())
    }

    pub fn src_quality(&self) -> SrcQuality {
        self.transport.quality()
    }

    /// Sends every change in this player's state to `sender` from the
    /// producer thread, starting with the full current state. Replaces any
    /// earlier watcher. Nothing is sent while no file is open.
    pub fn watch_notifications(&self, sender: Sender<Notification>) {
        self.notifier.set_sender(Some(sender));
        self.wake();
    }

    pub fn unwatch_notifications(&self) {
        self.notifier.set_sender(None);
    }

    /// How far the position has to move, in seconds, before it is reported
    /// again.
    pub fn set_position_notify_delta(&self, seconds: f64) {
        self.notifier.set_position_delta(seconds.max(0.0));
    }

    pub fn position_notify_delta(&self) -> f64 {
        self.notifier.position_delta()
    }

    /// Sample rate of the open file, 0 if none is open.
    pub fn samplerate(&self) -> u32 {
        self.with_session(|session| session.info.sample_rate)
            .unwrap_or(0)
    }

    pub fn channels(&self) -> usize {
        self.with_session(|session| session.info.channels)
            .unwrap_or(0)
    }

    pub fn frames(&self) -> u64 {
        self.with_session(|session| session.info.frames)
            .unwrap_or(0)
    }

    pub fn format(&self) -> String {
        self.with_session(|session| session.info.format.clone())
            .unwrap_or_default()
    }

    pub fn filename(&self) -> Option<PathBuf> {
        self.with_session(|session| session.path.clone())
    }

    /// Records a new host sample rate. Loaded buffers keep the old rate; the
    /// producer converts to the new one from the next seek.
    pub fn set_output_samplerate(&self, rate: u32) {
        let _enter = self.span.enter();
        info!(rate, "Output sample rate changed");
        self.transport.set_output_rate(rate);
    }

    pub fn output_samplerate(&self) -> u32 {
        self.transport.output_rate()
    }

    /// Number of times playback stopped because the producer fell behind.
    pub fn underruns(&self) -> u64 {
        self.transport.underruns()
    }

    pub fn status(&self) -> Status {
        Status {
            file: self
                .filename()
                .map(|path| filename_display(&path).to_string()),
            play_state: self.transport.play_state(),
            seek_state: self.transport.seek_state(),
            position: self.position(),
            duration: self.duration(),
            volume: self.volume(),
            looping: self.is_loop(),
            loop_start: self.loop_start(),
            loop_end: self.loop_end(),
            track_a: self.track_a(),
            track_b: self.track_b(),
            underruns: self.underruns(),
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}

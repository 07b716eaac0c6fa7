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
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, span, warn, Level};

use crate::audio::buffer::{FillGuard, BUFFER_COUNT};
use crate::audio::decoder::{FileDecoder, FileInfo};
use crate::audio::resampler::ResamplingAdapter;
use crate::audio::source::{DecodeError, FrameSource};

use super::notify::{Notifier, Watcher};
use super::state::{SeekState, Track, Transport, LOOP_END_OF_FILE};

/// Background worker that reads the open file, converts it to the output
/// rate and keeps the buffer pool full. It may block; the consumer never
/// waits on it.
pub struct Producer {
    transport: Arc<Transport>,
    source: Box<dyn FrameSource>,
    adapter: ResamplingAdapter,
    channels: usize,
    /// Next source frame the file will return.
    source_frame: u64,
    /// Output frame at which the next filled buffer starts.
    stream_frame: u64,
    /// The last read stopped at the loop end rather than the end of the file.
    capped: bool,
    /// Seconds, 0.0 if unknown.
    duration: f64,
}

/// Reads from the file without going past `end`.
struct LoopWindow<'a> {
    source: &'a mut dyn FrameSource,
    position: &'a mut u64,
    end: u64,
    capped: bool,
}

impl FrameSource for LoopWindow<'_> {
    fn read_frames(&mut self, out: &mut [f32]) -> Result<usize, DecodeError> {
        let channels = self.source.channel_count();
        let wanted = out.len() / channels;
        let left = usize::try_from(self.end.saturating_sub(*self.position)).unwrap_or(usize::MAX);
        if left < wanted {
            self.capped = true;
        }
        let frames = wanted.min(left);
        let read = self.source.read_frames(&mut out[..frames * channels])?;
        *self.position += read as u64;
        Ok(read)
    }

    fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        self.source.seek(frame)?;
        *self.position = frame;
        Ok(())
    }

    fn channel_count(&self) -> usize {
        self.source.channel_count()
    }

    fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }
}

impl Producer {
    /// Opens `path` and prepares to stream it into `transport`.
    pub fn open<P: AsRef<Path>>(
        transport: Arc<Transport>,
        path: P,
    ) -> Result<(Producer, FileInfo), DecodeError> {
        let decoder = FileDecoder::open(path)?;
        let info = decoder.info().clone();
        let mut producer = Producer::new(transport, Box::new(decoder))?;
        producer.duration = info.duration();
        Ok((producer, info))
    }

    /// Starts a fresh session on `source` from frame 0.
    pub fn new(
        transport: Arc<Transport>,
        source: Box<dyn FrameSource>,
    ) -> Result<Producer, DecodeError> {
        let channels = source.channel_count();
        let adapter = ResamplingAdapter::new(
            source.sample_rate(),
            transport.output_rate(),
            channels,
            transport.buffers.capacity(),
            transport.quality(),
        )?;

        // Anything the consumer still holds belongs to a previous session.
        transport.bump_seek_epoch();
        transport.buffers.flush();
        transport.set_active(0);
        transport.set_position_frames(0);
        transport.set_position_rate(adapter.target_rate());
        transport.set_seek_state(SeekState::Idle);
        transport.set_more(true);
        transport.set_loop_range(0, LOOP_END_OF_FILE);
        transport.set_tracks(Track::Channel(0), Track::Channel(1));

        Ok(Producer {
            transport,
            source,
            adapter,
            channels,
            source_frame: 0,
            stream_frame: 0,
            capped: false,
            duration: 0.0,
        })
    }

    /// Runs one iteration: services a pending seek, then fills every empty
    /// buffer starting from the one the consumer is on.
    pub fn step(&mut self) {
        let transport = self.transport.clone();

        if transport.seek_transition(SeekState::Seeking, SeekState::Loading) {
            transport.bump_seek_epoch();
            transport.buffers.flush();
            transport.set_active(0);
            if let Err(e) = self.seek(transport.position_frames()) {
                error!(err = %e, "Seek failed");
                transport.set_more(false);
                transport.seek_transition(SeekState::Loading, SeekState::Idle);
                return;
            }
        }

        let mut loading = transport.seek_state() == SeekState::Loading;
        if !loading && !transport.more() {
            return;
        }

        let start = transport.active();
        for offset in 0..BUFFER_COUNT {
            let slot = transport.buffers.slot(start + offset);
            let Some(mut guard) = slot.try_fill() else {
                continue;
            };

            let Some((start_frame, frames)) = self.fill(&mut guard) else {
                debug!(frame = self.stream_frame, "End of file");
                transport.set_more(false);
                break;
            };
            guard.mark_filled(frames * self.channels, start_frame, self.channels);

            if loading {
                transport.seek_transition(SeekState::Loading, SeekState::Idle);
                loading = false;
            }
        }

        // Nothing could be loaded at the new position; let the consumer go on.
        if loading {
            transport.seek_transition(SeekState::Loading, SeekState::Idle);
        }
    }

    /// Steps until the session is closed, sleeping between iterations until
    /// woken or `poll_interval` elapses. Changes are reported to `notifier`
    /// after every iteration.
    pub(crate) fn run(mut self, wake: Receiver<()>, poll_interval: Duration, notifier: Arc<Notifier>) {
        let span = span!(Level::INFO, "producer");
        let _enter = span.enter();

        info!(
            channels = self.channels,
            ratio = self.adapter.ratio(),
            "File producer started"
        );
        let mut watcher = Watcher::default();
        while self.transport.is_open() {
            self.step();
            watcher.check(
                &self.transport,
                &notifier,
                self.source.sample_rate(),
                self.duration,
            );
            match wake.recv_timeout(poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let transport = &self.transport;
        transport.buffers.flush();
        transport.set_active(0);
        transport.set_position_frames(0);
        transport.set_seek_state(SeekState::Idle);
        transport.set_more(false);
        info!("File producer stopped");
    }

    /// Fills one slot. When looping and the loop end comes part way through,
    /// the rest of the slot continues from the loop start. Returns the stream
    /// frame of the first frame and the frame count, or None if nothing is
    /// left to read.
    fn fill(&mut self, guard: &mut FillGuard<'_>) -> Option<(u64, usize)> {
        let capacity = guard.data_mut().len() / self.channels;
        let mut start_frame = self.stream_frame;
        let mut frames = self.read(guard.data_mut());

        if frames < capacity && self.transport.is_loop() && self.rewind() {
            let offset = frames * self.channels;
            if frames == 0 {
                start_frame = self.stream_frame;
            } else {
                guard.mark_wrap(offset, self.stream_frame);
            }
            frames += self.read(&mut guard.data_mut()[offset..]);
        }

        (frames > 0).then_some((start_frame, frames))
    }

    /// Fills `out` from the adapter and advances the stream frame. Read
    /// errors end the file.
    fn read(&mut self, out: &mut [f32]) -> usize {
        let (loop_start, loop_end) = self.transport.loop_range();
        let end = if self.transport.is_loop() {
            loop_end
        } else {
            LOOP_END_OF_FILE
        };

        // A read held back by a loop end that no longer applies can go on.
        if self.capped && self.source_frame < end {
            debug!(frame = self.source_frame, loop_start, "Reading past the loop end");
            self.adapter.reset();
            self.capped = false;
        }

        let mut window = LoopWindow {
            source: self.source.as_mut(),
            position: &mut self.source_frame,
            end,
            capped: false,
        };
        let result = self.adapter.fill(&mut window, out);
        self.capped |= window.capped;

        match result {
            Ok(frames) => {
                self.stream_frame += frames as u64;
                frames
            }
            Err(e) => {
                error!(err = %e, "Error reading file");
                0
            }
        }
    }

    /// Positions the source at output frame `target`.
    fn seek(&mut self, target: u64) -> Result<(), DecodeError> {
        let output_rate = self.transport.output_rate();
        let quality = self.transport.quality();
        if !self.adapter.matches(output_rate, quality) {
            match ResamplingAdapter::new(
                self.source.sample_rate(),
                output_rate,
                self.channels,
                self.transport.buffers.capacity(),
                quality,
            ) {
                Ok(adapter) => {
                    info!(output_rate, %quality, "Rebuilt resampler");
                    self.adapter = adapter;
                }
                Err(e) => warn!(err = %e, "Keeping previous resampler"),
            }
        }
        self.transport.set_position_rate(self.adapter.target_rate());

        let source_frame = (target as f64 / self.adapter.ratio()).round() as u64;
        debug!(target, source_frame, "Seeking");
        self.source.seek(source_frame)?;
        self.source_frame = source_frame;
        self.capped = false;
        self.adapter.reset();
        self.stream_frame = target;
        self.transport.set_more(true);
        Ok(())
    }

    /// Moves back to the loop start. Returns false if the file can't seek.
    fn rewind(&mut self) -> bool {
        let (loop_start, _) = self.transport.loop_range();
        if let Err(e) = self.source.seek(loop_start) {
            error!(err = %e, "Unable to rewind");
            return false;
        }
        debug!(frame = loop_start, "Looping");
        self.source_frame = loop_start;
        self.capped = false;
        self.adapter.reset();
        self.stream_frame = (loop_start as f64 * self.adapter.ratio()).round() as u64;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::SlotState;
    use crate::audio::memory::MemorySource;

    fn producer(frames: usize, source_rate: u32, capacity: usize) -> (Arc<Transport>, Producer) {
        let transport = Arc::new(Transport::new(capacity, 44100));
        transport.set_open(true);
        let source = Box::new(MemorySource::ramp(frames, source_rate));
        let producer = Producer::new(transport.clone(), source).unwrap();
        (transport, producer)
    }

    /// Takes the contents of a ready slot and empties it.
    fn take(transport: &Transport, index: usize) -> (u64, Vec<f32>) {
        let guard = transport.buffers.slot(index).try_read().unwrap();
        let contents = (guard.start_frame(), guard.data().to_vec());
        guard.mark_drained();
        contents
    }

    #[test]
    fn test_fills_both_buffers_in_order() {
        let (transport, mut producer) = producer(100, 44100, 40);
        producer.step();

        let (start, first) = take(&transport, 0);
        assert_eq!(start, 0);
        assert_eq!(first.len(), 40);
        assert_eq!(first[0], 0.01);

        let (start, second) = take(&transport, 1);
        assert_eq!(start, 40);
        assert_eq!(second[0], 0.41);
        assert!(transport.more());
    }

    #[test]
    fn test_fill_starts_at_active_buffer() {
        let (transport, mut producer) = producer(100, 44100, 40);
        transport.set_active(1);
        producer.step();

        assert_eq!(take(&transport, 1).0, 0);
        assert_eq!(take(&transport, 0).0, 40);
    }

    #[test]
    fn test_end_of_file_clears_more() {
        let (transport, mut producer) = producer(50, 44100, 40);
        producer.step();
        let (_, first) = take(&transport, 0);
        let (_, second) = take(&transport, 1);
        assert_eq!(first.len() + second.len(), 50);
        assert!(transport.more());

        producer.step();
        assert!(!transport.more());
        assert!(transport.buffers.both_empty());

        // Nothing more is read until something re-arms the producer.
        producer.step();
        assert!(transport.buffers.both_empty());
    }

    #[test]
    fn test_loop_rewinds_to_frame_zero() {
        let (transport, mut producer) = producer(50, 44100, 40);
        transport.set_loop(true);
        producer.step();
        take(&transport, 0);

        // The tail of the file and the start of the next pass share a slot.
        let guard = transport.buffers.slot(1).try_read().unwrap();
        assert_eq!(guard.start_frame(), 40);
        assert_eq!(guard.end(), 40);
        assert_eq!(guard.wrap(), Some((10, 0)));
        assert_eq!(guard.data()[9], 1.0);
        assert_eq!(guard.data()[10], 0.02);
        guard.mark_drained();

        producer.step();
        let (start, data) = take(&transport, 0);
        assert_eq!(start, 30);
        assert_eq!(data[0], 0.62);
        assert!(transport.more());
    }

    #[test]
    fn test_loop_points_bound_reads() {
        let (transport, mut producer) = producer(100, 44100, 40);
        transport.set_loop(true);
        transport.set_loop_range(10, 30);
        producer.step();

        let guard = transport.buffers.slot(0).try_read().unwrap();
        assert_eq!(guard.wrap(), Some((30, 10)));
        assert_eq!(guard.data()[29], 0.30);
        assert_eq!(guard.data()[30], 0.11);
        guard.mark_drained();

        let guard = transport.buffers.slot(1).try_read().unwrap();
        assert_eq!(guard.start_frame(), 20);
        assert_eq!(guard.end(), 30);
        assert_eq!(guard.wrap(), Some((10, 10)));
        assert_eq!(guard.data()[0], 0.21);
        assert_eq!(guard.data()[10], 0.11);
        guard.mark_drained();

        // Turning the loop off carries on past the old loop end.
        transport.set_loop(false);
        producer.step();
        let (start, data) = take(&transport, 0);
        assert_eq!(start, 30);
        assert_eq!(data.len(), 40);
        assert_eq!(data[0], 0.31);
        assert_eq!(data[39], 0.70);
    }

    #[test]
    fn test_loop_end_with_resampling() {
        let (transport, mut producer) = producer(22050, 22050, 4096);
        transport.set_quality(crate::audio::resampler::SrcQuality::Linear);
        transport.set_loop(true);
        transport.set_loop_range(0, 11025);
        transport.begin_seek(0);
        producer.step();

        // Half a second of source is a second of output; the pass starts over
        // near the bottom of the ramp.
        let mut frames = 0;
        let mut wrapped = None;
        for index in [0, 1] {
            let guard = transport.buffers.slot(index).try_read().unwrap();
            frames += guard.end();
            if let Some((at, frame)) = guard.wrap() {
                wrapped = Some((guard.data()[at], frame));
            }
            guard.mark_drained();
        }
        assert_eq!(frames, 8192);
        assert!(wrapped.is_none());

        for _ in 0..20 {
            if wrapped.is_some() {
                break;
            }
            producer.step();
            for index in [0, 1] {
                let Some(guard) = transport.buffers.slot(index).try_read() else {
                    continue;
                };
                if let Some((at, frame)) = guard.wrap() {
                    wrapped = Some((guard.data()[at], frame));
                }
                guard.mark_drained();
            }
        }
        let (sample, frame) = wrapped.expect("loop never wrapped");
        assert_eq!(frame, 0);
        assert!(sample < 0.01, "{}", sample);
    }

    #[test]
    fn test_seek_refills_from_target() {
        let (transport, mut producer) = producer(1000, 44100, 100);
        producer.step();
        transport.set_active(1);
        let epoch = transport.seek_epoch();

        transport.begin_seek(500);
        producer.step();

        assert_eq!(transport.seek_state(), SeekState::Idle);
        assert_eq!(transport.seek_epoch(), epoch + 1);
        assert_eq!(transport.active(), 0);
        let (start, data) = take(&transport, 0);
        assert_eq!(start, 500);
        assert_eq!(data[0], 0.501);
        assert_eq!(take(&transport, 1).0, 600);
    }

    #[test]
    fn test_seek_translates_through_ratio() {
        let (transport, mut producer) = producer(22050, 22050, 4096);
        transport.set_quality(crate::audio::resampler::SrcQuality::Linear);
        transport.begin_seek(22050);
        producer.step();

        // Half a second at 44100 Hz is frame 11025 of the 22050 Hz source.
        let (start, data) = take(&transport, 0);
        assert_eq!(start, 22050);
        assert!((data[100] - 0.5).abs() < 0.01, "{}", data[100]);
    }

    #[test]
    fn test_seek_past_end_releases_consumer() {
        let (transport, mut producer) = producer(100, 44100, 40);
        transport.begin_seek(1000);
        producer.step();

        assert_eq!(transport.seek_state(), SeekState::Idle);
        assert!(!transport.more());
        assert!(transport.buffers.both_empty());
    }

    #[test]
    fn test_output_rate_change_applies_on_seek() {
        let (transport, mut producer) = producer(44100, 44100, 4096);
        producer.step();
        assert_eq!(take(&transport, 0).1.len(), 4096);

        transport.set_output_rate(88200);
        producer.step();
        // Buffers already loaded keep the old rate.
        assert_eq!(producer.adapter.ratio(), 1.0);

        transport.begin_seek(0);
        producer.step();
        assert_eq!(producer.adapter.ratio(), 2.0);
        assert_eq!(transport.buffers.slot(0).state(), SlotState::Ready);
    }

    #[test]
    fn test_run_exits_and_resets_on_close() {
        let (transport, producer) = producer(100, 44100, 40);
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let notifier = Arc::new(Notifier::new());
        let handle = std::thread::spawn(move || {
            producer.run(wake_rx, Duration::from_millis(5), notifier)
        });

        crate::testutil::eventually(
            || !transport.buffers.both_empty(),
            "producer never filled a buffer",
        );
        transport.set_position_frames(42);
        transport.set_open(false);
        let _ = wake_tx.try_send(());
        handle.join().unwrap();

        assert!(transport.buffers.both_empty());
        assert_eq!(transport.position_frames(), 0);
        assert!(!transport.more());
    }
}

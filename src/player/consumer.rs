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
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::audio::buffer::BUFFER_COUNT;
use crate::midi::{ControlChange, TransportCommand};

use super::state::{PlayState, SeekState, Transport};

/// The real-time half of a player. Call [`Consumer::process`] once per audio
/// block from the output callback; it never blocks, allocates or logs.
pub struct Consumer {
    transport: Arc<Transport>,
    /// Wakes the producer when a buffer is handed back.
    wake: Sender<()>,
    read: ReadState,
}

/// Where the consumer is in the buffer pool.
struct ReadState {
    /// Buffer being read.
    active: usize,
    /// Next sample to read in the active buffer.
    cursor: usize,
    /// Seek epoch the read position belongs to.
    epoch: u32,
}

impl ReadState {
    fn restart(&mut self, epoch: u32) {
        self.epoch = epoch;
        self.active = 0;
        self.cursor = 0;
    }

    /// Stops playback because no data is ready. At the end of the file the
    /// position goes back to the start and the producer reloads from there.
    /// Returns true if the position was replaced.
    fn end_of_stream(&mut self, transport: &Transport, wake: &Sender<()>) -> bool {
        // A seek started under us; its buffers are on their way.
        let epoch = transport.seek_epoch();
        if epoch != self.epoch {
            self.restart(epoch);
            return false;
        }

        let finished = !transport.more();
        if !finished {
            transport.count_underrun();
        }
        transport.buffers.drain_ready();
        self.restart(epoch);
        transport.set_active(0);
        transport.set_play_state(PlayState::Stopped);
        if finished {
            transport.begin_seek(0);
            let _ = wake.try_send(());
        }
        finished
    }
}

impl Consumer {
    pub(crate) fn new(transport: Arc<Transport>, wake: Sender<()>) -> Consumer {
        let epoch = transport.seek_epoch();
        Consumer {
            transport,
            wake,
            read: ReadState {
                active: 0,
                cursor: 0,
                epoch,
            },
        }
    }

    /// Renders one block into the two outputs and then applies the control
    /// changes received for it, in order. Anything not produced is silence.
    pub fn process(&mut self, out_a: &mut [f32], out_b: &mut [f32], controls: &[ControlChange]) {
        out_a.fill(0.0);
        out_b.fill(0.0);
        let frames = out_a.len().min(out_b.len());
        self.render(&mut out_a[..frames], &mut out_b[..frames]);

        for cc in controls {
            self.apply_control(*cc);
        }
    }

    /// Applies a single MIDI control change to the transport.
    pub fn apply_control(&self, cc: ControlChange) {
        match TransportCommand::from_control(cc) {
            Some(TransportCommand::Volume(volume)) => self.transport.set_volume(volume),
            Some(TransportCommand::Play(true)) => {
                self.transport.request_start();
            }
            Some(TransportCommand::Play(false)) => {
                self.transport.request_stop();
            }
            Some(TransportCommand::Loop(looping)) => self.transport.set_loop(looping),
            None => {}
        }
    }

    fn render(&mut self, out_a: &mut [f32], out_b: &mut [f32]) {
        let transport = &self.transport;
        let read = &mut self.read;

        let epoch = transport.seek_epoch();
        if epoch != read.epoch {
            read.restart(epoch);
        }

        // The producer owns the buffers until the seek completes.
        if transport.seek_state() != SeekState::Idle {
            return;
        }

        transport.transition(PlayState::Starting, PlayState::Playing);
        match transport.play_state() {
            PlayState::Playing => {}
            PlayState::Stopping => {
                transport.transition(PlayState::Stopping, PlayState::Stopped);
                return;
            }
            PlayState::Stopped | PlayState::Starting => return,
        }

        let volume = transport.volume();
        let track_a = transport.track_a();
        let track_b = transport.track_b();
        let block_start = transport.position_frames();
        let mut position = block_start;
        let mut written = 0;

        while written < out_a.len() {
            if transport.buffers.both_empty() {
                if read.end_of_stream(transport, &self.wake) {
                    return;
                }
                break;
            }

            let Some(guard) = transport.buffers.slot(read.active).try_read() else {
                // The buffer after the one just finished never arrived.
                if read.end_of_stream(transport, &self.wake) {
                    return;
                }
                break;
            };
            let epoch = transport.seek_epoch();
            if epoch != read.epoch {
                drop(guard);
                read.restart(epoch);
                break;
            }

            if read.cursor == 0 {
                position = guard.start_frame();
            }

            // Past the wrap point the buffer holds the next pass of the loop.
            let limit = match guard.wrap() {
                Some((at, frame)) if read.cursor == at => {
                    position = frame;
                    guard.end()
                }
                Some((at, _)) if read.cursor < at => at,
                _ => guard.end(),
            };

            let channels = guard.channels();
            let data = &guard.data()[..limit];
            let available = data.len().saturating_sub(read.cursor) / channels;
            let count = available.min(out_a.len() - written);
            for (a, b) in out_a[written..written + count]
                .iter_mut()
                .zip(out_b[written..written + count].iter_mut())
            {
                let frame = &data[read.cursor..read.cursor + channels];
                *a = volume * track_a.sample_a(frame);
                *b = volume * track_b.sample_b(frame);
                read.cursor += channels;
            }
            written += count;
            position += count as u64;

            if read.cursor + channels > guard.end() {
                guard.mark_drained();
                let _ = self.wake.try_send(());
                read.active = (read.active + 1) % BUFFER_COUNT;
                read.cursor = 0;
                transport.set_active(read.active);
            }
        }

        if position != block_start {
            transport.advance_position(block_start, position);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::audio::memory::MemorySource;
    use crate::audio::source::FrameSource;
    use crate::player::producer::Producer;
    use crate::player::state::Track;

    const BLOCK: usize = 64;

    struct Session {
        transport: Arc<Transport>,
        producer: Producer,
        consumer: Consumer,
        wake: crossbeam_channel::Receiver<()>,
    }

    impl Session {
        fn new(source: impl FrameSource + 'static, capacity: usize) -> Session {
            let transport = Arc::new(Transport::new(capacity, 44100));
            transport.set_open(true);
            let (wake_tx, wake) = crossbeam_channel::bounded(1);
            let consumer = Consumer::new(transport.clone(), wake_tx);
            let mut producer = Producer::new(transport.clone(), Box::new(source)).unwrap();
            producer.step();
            Session {
                transport,
                producer,
                consumer,
                wake,
            }
        }

        fn ramp(frames: usize, capacity: usize) -> Session {
            Session::new(MemorySource::ramp(frames, 44100), capacity)
        }

        /// Renders one block and returns both outputs.
        fn block(&mut self, frames: usize, controls: &[ControlChange]) -> (Vec<f32>, Vec<f32>) {
            let mut a = vec![1.0; frames];
            let mut b = vec![1.0; frames];
            self.consumer.process(&mut a, &mut b, controls);
            (a, b)
        }

        /// Steps the producer, then renders a block of output A.
        fn tick(&mut self) -> Vec<f32> {
            self.producer.step();
            self.block(BLOCK, &[]).0
        }
    }

    /// Frame index of a ramp sample.
    fn frame_of(sample: f32, frames: usize) -> usize {
        (sample * frames as f32).round() as usize - 1
    }

    #[test]
    fn test_silence_while_stopped() {
        let mut session = Session::ramp(1000, 256);
        let (a, b) = session.block(BLOCK, &[]);
        assert!(a.iter().chain(b.iter()).all(|s| *s == 0.0));
        assert_eq!(session.transport.position_frames(), 0);
    }

    #[test]
    fn test_plays_every_frame_once() {
        let frames = 1000;
        let mut session = Session::ramp(frames, 300);
        session.transport.request_start();

        let mut output = Vec::new();
        while session.transport.play_state() != PlayState::Stopped || output.is_empty() {
            output.extend(session.tick());
            assert!(output.len() < frames * 2, "playback never stopped");
        }

        let expected: Vec<f32> = (0..frames).map(|n| (n + 1) as f32 / frames as f32).collect();
        assert_eq!(output[..frames], expected[..]);
        assert!(output[frames..].iter().all(|s| *s == 0.0));
        assert_eq!(session.transport.position_frames(), 0);
        assert_eq!(session.transport.seek_state(), SeekState::Seeking);
        assert_eq!(session.transport.underruns(), 0);
        assert!(session.transport.buffers.both_empty());
        assert_eq!(session.transport.active(), 0);
    }

    #[test]
    fn test_restart_after_end() {
        let frames = 1000;
        let mut session = Session::ramp(frames, 300);
        session.transport.request_start();
        while session.transport.play_state() != PlayState::Stopped {
            session.tick();
        }

        // Starting again plays from the top.
        session.transport.request_start();
        let a = session.tick();
        assert_eq!(session.transport.seek_state(), SeekState::Idle);
        assert_eq!(frame_of(a[0], frames), 0);
        assert!(a.iter().all(|s| *s != 0.0));
        assert_eq!(session.transport.position_frames(), BLOCK as u64);
    }

    #[test]
    fn test_drained_buffer_wakes_producer() {
        let mut session = Session::ramp(1000, 64);
        session.transport.request_start();
        assert!(session.wake.try_recv().is_err());

        session.block(BLOCK, &[]);
        assert!(session.wake.try_recv().is_ok());
        assert!(session.transport.buffers.slot(0).is_empty());
    }

    #[test]
    fn test_loop_wrap_inside_buffer() {
        let frames = 50;
        let mut session = Session::ramp(frames, 40);
        session.transport.set_loop(true);
        session.transport.begin_seek(0);
        session.producer.step();
        session.transport.request_start();

        let (a, _) = session.block(BLOCK, &[]);
        let played: Vec<usize> = a.iter().map(|s| frame_of(*s, frames)).collect();
        let expected: Vec<usize> = (0..frames).chain(0..BLOCK - frames).collect();
        assert_eq!(played, expected);
        assert_eq!(
            session.transport.position_frames(),
            (BLOCK - frames) as u64
        );
    }

    #[test]
    fn test_seek_is_silent_then_converges() {
        let frames = 5000;
        let mut session = Session::ramp(frames, 512);
        session.transport.request_start();
        session.block(BLOCK, &[]);
        assert_eq!(session.transport.position_frames(), BLOCK as u64);

        session.transport.begin_seek(3000);
        for _ in 0..3 {
            let (a, b) = session.block(BLOCK, &[]);
            assert!(a.iter().chain(b.iter()).all(|s| *s == 0.0));
            assert_eq!(session.transport.position_frames(), 3000);
        }

        let a = session.tick();
        assert_eq!(frame_of(a[0], frames), 3000);
        assert_eq!(session.transport.position_frames(), 3000 + BLOCK as u64);
        assert_eq!(session.transport.play_state(), PlayState::Playing);
    }

    #[test]
    fn test_seek_while_stopped_keeps_state() {
        let frames = 5000;
        let mut session = Session::ramp(frames, 512);
        session.transport.begin_seek(1234);
        session.tick();
        assert_eq!(session.transport.play_state(), PlayState::Stopped);
        assert_eq!(session.transport.position_frames(), 1234);

        session.transport.request_start();
        let a = session.tick();
        assert_eq!(frame_of(a[0], frames), 1234);
    }

    #[test]
    fn test_loop_never_stops() {
        let frames = 200;
        let mut session = Session::ramp(frames, 128);
        session.transport.set_loop(true);
        session.transport.request_start();

        let mut wrapped = false;
        let mut last_position = 0;
        for _ in 0..50 {
            let a = session.tick();
            assert!(a.iter().all(|s| *s != 0.0));
            assert_eq!(session.transport.play_state(), PlayState::Playing);

            let position = session.transport.position_frames();
            if position < last_position {
                wrapped = true;
            }
            last_position = position;
        }
        assert!(wrapped);
        assert_eq!(session.transport.underruns(), 0);
    }

    #[test]
    fn test_volume_and_channel_b() {
        let mut stereo = Vec::new();
        for _ in 0..500 {
            stereo.extend_from_slice(&[0.25, -0.5]);
        }
        let mut session = Session::new(MemorySource::new(stereo, 2, 44100), 256);
        session.transport.set_volume(2.0);
        session.transport.request_start();
        let (a, b) = session.block(BLOCK, &[]);
        assert!(a.iter().all(|s| *s == 0.5));
        assert!(b.iter().all(|s| *s == -1.0));

        let mut session = Session::ramp(500, 256);
        session.transport.request_start();
        let (a, b) = session.block(BLOCK, &[]);
        assert_eq!(a, b);
        assert!(a.iter().all(|s| *s != 0.0));
    }

    #[test]
    fn test_track_selection() {
        let mut quad = Vec::new();
        for _ in 0..500 {
            quad.extend_from_slice(&[0.25, 0.5, 0.75, 1.0]);
        }
        let mut session = Session::new(MemorySource::new(quad, 4, 44100), 1024);
        session.transport.request_start();
        let (a, b) = session.block(BLOCK, &[]);
        assert!(a.iter().all(|s| *s == 0.25));
        assert!(b.iter().all(|s| *s == 0.5));

        session.transport.set_tracks(Track::Channel(3), Track::Channel(2));
        let (a, b) = session.block(BLOCK, &[]);
        assert!(a.iter().all(|s| *s == 1.0));
        assert!(b.iter().all(|s| *s == 0.75));

        session.transport.set_tracks(Track::Mix, Track::Mix);
        let (a, b) = session.block(BLOCK, &[]);
        assert!(a.iter().all(|s| *s == 0.5));
        assert!(b.iter().all(|s| *s == 0.75));
    }

    #[test]
    fn test_control_changes_apply_after_block() {
        let mut session = Session::ramp(1000, 256);

        let (a, _) = session.block(BLOCK, &[ControlChange::new(0, 68, 127)]);
        assert!(a.iter().all(|s| *s == 0.0));
        assert_eq!(session.transport.play_state(), PlayState::Starting);

        let (a, _) = session.block(BLOCK, &[ControlChange::new(0, 7, 50)]);
        assert_eq!(a[0], 0.001);
        assert_eq!(session.transport.volume(), 0.5);
        assert_eq!(session.transport.play_state(), PlayState::Playing);

        session.block(BLOCK, &[ControlChange::new(0, 69, 100)]);
        assert!(session.transport.is_loop());

        // Later messages in the same block win.
        session.block(
            BLOCK,
            &[
                ControlChange::new(0, 68, 0),
                ControlChange::new(0, 7, 127),
                ControlChange::new(0, 69, 0),
            ],
        );
        assert_eq!(session.transport.play_state(), PlayState::Stopping);
        assert_eq!(session.transport.volume(), 1.0);
        assert!(!session.transport.is_loop());

        let position = session.transport.position_frames();
        let (a, _) = session.block(BLOCK, &[]);
        assert!(a.iter().all(|s| *s == 0.0));
        assert_eq!(session.transport.play_state(), PlayState::Stopped);
        assert_eq!(session.transport.position_frames(), position);
    }

    #[test]
    fn test_starvation_counts_underrun() {
        let mut session = Session::ramp(10000, 100);
        session.transport.request_start();

        // Without producer steps the two loaded buffers run out.
        for _ in 0..4 {
            session.block(BLOCK, &[]);
        }
        assert_eq!(session.transport.play_state(), PlayState::Stopped);
        assert_eq!(session.transport.underruns(), 1);
        assert_eq!(session.transport.position_frames(), 200);
    }

    #[test]
    fn test_fuzzed_interleavings() {
        let frames = 4000;
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..20 {
            let capacity = rng.gen_range(16..400);
            let mut session = Session::ramp(frames, capacity);
            session.transport.request_start();

            for _ in 0..300 {
                match rng.gen_range(0..10) {
                    0..=3 => session.producer.step(),
                    4 => session
                        .transport
                        .begin_seek(rng.gen_range(0..frames as u64 + 100)),
                    5 => {
                        session.transport.request_start();
                    }
                    6 => {
                        session.transport.request_stop();
                    }
                    _ => {
                        let block = rng.gen_range(1..200);
                        let seeking = session.transport.seek_state() != SeekState::Idle;
                        let (a, b) = session.block(block, &[]);
                        assert_eq!(a, b);

                        let played = a.iter().take_while(|s| **s != 0.0).count();
                        assert!(a[played..].iter().all(|s| *s == 0.0));
                        if seeking {
                            assert_eq!(played, 0);
                        }
                        if played == 0 {
                            continue;
                        }

                        // No frame is skipped or repeated inside a block.
                        let first = frame_of(a[0], frames);
                        for (n, sample) in a[..played].iter().enumerate() {
                            assert_eq!(frame_of(*sample, frames), first + n);
                        }
                        if session.transport.seek_state() == SeekState::Seeking {
                            // Ran off the end of the file and rewound.
                            assert_eq!(first + played, frames);
                            assert_eq!(session.transport.position_frames(), 0);
                        } else {
                            assert_eq!(
                                session.transport.position_frames(),
                                (first + played) as u64
                            );
                        }
                    }
                }
            }
        }
    }
}

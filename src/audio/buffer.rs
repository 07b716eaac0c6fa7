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
// Double buffer used to hand decoded audio from the file producer to the
// real-time consumer. Each slot moves through
//
//   Empty -> Filling -> Ready -> Reading -> (Ready | Empty)
//
// The producer only touches sample data while it holds a slot in Filling and
// the consumer only while it holds it in Reading. Ready is published with
// Release and claimed with Acquire, so a consumer never sees a filled slot
// before its sample writes.
//

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

/// Number of slots in the pool.
pub const BUFFER_COUNT: usize = 2;

const EMPTY: u8 = 0;
const FILLING: u8 = 1;
const READY: u8 = 2;
const READING: u8 = 3;

/// How long the producer backs off while the consumer holds a slot it wants to flush.
const FLUSH_BACKOFF: Duration = Duration::from_micros(200);

/// Ownership state of a buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No valid data; the producer may claim it.
    Empty,
    /// The producer is writing into it.
    Filling,
    /// Holds valid data; the consumer may claim it.
    Ready,
    /// The consumer is reading from it.
    Reading,
}

impl SlotState {
    fn from_u8(value: u8) -> SlotState {
        match value {
            FILLING => SlotState::Filling,
            READY => SlotState::Ready,
            READING => SlotState::Reading,
            _ => SlotState::Empty,
        }
    }
}

struct Contents {
    /// Interleaved samples.
    data: Box<[f32]>,
    /// Number of valid samples in `data`.
    end: usize,
    /// Stream frame (at the output rate) of the first frame in this buffer.
    start_frame: u64,
    /// Interleave stride of `data`.
    channels: usize,
    /// Sample index at which the data jumps back to a loop start, and the
    /// stream frame it jumps to.
    wrap: Option<(usize, u64)>,
}

/// A fixed-capacity block of interleaved samples plus its fill metadata.
pub struct AudioBuffer {
    state: AtomicU8,
    capacity: usize,
    contents: UnsafeCell<Contents>,
}

// SAFETY: `contents` is only accessed through a FillGuard or a ReadGuard. Each
// guard is created by a successful compare-exchange into FILLING or READING,
// so at most one guard exists per buffer at any time, and guards are released
// with Release stores that pair with the Acquire of the next claim.
unsafe impl Sync for AudioBuffer {}

impl AudioBuffer {
    /// Creates an empty buffer holding up to `capacity` samples.
    pub fn new(capacity: usize) -> AudioBuffer {
        AudioBuffer {
            state: AtomicU8::new(EMPTY),
            capacity,
            contents: UnsafeCell::new(Contents {
                data: vec![0.0; capacity].into_boxed_slice(),
                end: 0,
                start_frame: 0,
                channels: 1,
                wrap: None,
            }),
        }
    }

    /// Capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True if the slot holds no data the consumer could read.
    pub fn is_empty(&self) -> bool {
        matches!(self.state(), SlotState::Empty | SlotState::Filling)
    }

    /// Claims an empty slot for writing.
    pub fn try_fill(&self) -> Option<FillGuard<'_>> {
        self.state
            .compare_exchange(EMPTY, FILLING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FillGuard {
                buffer: self,
                wrap: None,
                committed: false,
            })
    }

    /// Claims a ready slot for reading.
    pub fn try_read(&self) -> Option<ReadGuard<'_>> {
        self.state
            .compare_exchange(READY, READING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReadGuard {
                buffer: self,
                drained: false,
            })
    }

    /// Discards a ready slot. Returns true if the slot is empty afterwards.
    pub fn try_mark_drained(&self) -> bool {
        match self
            .state
            .compare_exchange(READY, EMPTY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == EMPTY,
        }
    }
}

/// Write access to a slot in the Filling state. Dropping the guard without
/// calling `mark_filled` returns the slot to Empty.
pub struct FillGuard<'a> {
    buffer: &'a AudioBuffer,
    wrap: Option<(usize, u64)>,
    committed: bool,
}

impl FillGuard<'_> {
    /// The whole sample storage of the slot.
    pub fn data_mut(&mut self) -> &mut [f32] {
        // SAFETY: the slot is in FILLING and this guard is its only owner.
        let contents = unsafe { &mut *self.buffer.contents.get() };
        &mut contents.data[..]
    }

    /// Records that the samples from index `at` on restart the stream at
    /// `frame`. Only the last call before `mark_filled` counts.
    pub fn mark_wrap(&mut self, at: usize, frame: u64) {
        self.wrap = Some((at, frame));
    }

    /// Publishes `end` samples of `channels`-interleaved audio whose first frame
    /// is stream frame `start_frame`.
    pub fn mark_filled(mut self, end: usize, start_frame: u64, channels: usize) {
        {
            // SAFETY: the slot is in FILLING and this guard is its only owner.
            let contents = unsafe { &mut *self.buffer.contents.get() };
            contents.end = end.min(contents.data.len());
            contents.start_frame = start_frame;
            contents.channels = channels.max(1);
            contents.wrap = self.wrap.filter(|(at, _)| *at > 0 && *at < contents.end);
        }
        self.committed = true;
        self.buffer.state.store(READY, Ordering::Release);
    }
}

impl Drop for FillGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.buffer.state.store(EMPTY, Ordering::Release);
        }
    }
}

/// Read access to a slot in the Reading state. Dropping the guard returns the
/// slot to Ready; `mark_drained` returns it to Empty.
pub struct ReadGuard<'a> {
    buffer: &'a AudioBuffer,
    drained: bool,
}

impl ReadGuard<'_> {
    fn contents(&self) -> &Contents {
        // SAFETY: the slot is in READING and this guard is its only owner.
        unsafe { &*self.buffer.contents.get() }
    }

    /// The valid samples of the slot.
    pub fn data(&self) -> &[f32] {
        let contents = self.contents();
        &contents.data[..contents.end]
    }

    /// Number of valid samples.
    pub fn end(&self) -> usize {
        self.contents().end
    }

    pub fn start_frame(&self) -> u64 {
        self.contents().start_frame
    }

    pub fn channels(&self) -> usize {
        self.contents().channels
    }

    /// Where the data jumps back to a loop start, if it does.
    pub fn wrap(&self) -> Option<(usize, u64)> {
        self.contents().wrap
    }

    /// Hands the slot back to the producer for refilling.
    pub fn mark_drained(mut self) {
        self.drained = true;
        self.buffer.state.store(EMPTY, Ordering::Release);
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if !self.drained {
            self.buffer.state.store(READY, Ordering::Release);
        }
    }
}

/// The two slots shared between producer and consumer.
pub struct BufferPool {
    buffers: [AudioBuffer; BUFFER_COUNT],
}

impl BufferPool {
    /// Creates a pool whose slots each hold `capacity` samples.
    pub fn new(capacity: usize) -> BufferPool {
        BufferPool {
            buffers: [AudioBuffer::new(capacity), AudioBuffer::new(capacity)],
        }
    }

    /// The slot at `index` (taken modulo the pool size).
    pub fn slot(&self, index: usize) -> &AudioBuffer {
        &self.buffers[index % BUFFER_COUNT]
    }

    pub fn capacity(&self) -> usize {
        self.buffers[0].capacity()
    }

    /// True when neither slot holds readable data.
    pub fn both_empty(&self) -> bool {
        self.buffers.iter().all(AudioBuffer::is_empty)
    }

    /// Discards whatever is ready without waiting. Used by the consumer.
    pub fn drain_ready(&self) {
        for buffer in &self.buffers {
            buffer.try_mark_drained();
        }
    }

    /// Empties both slots, waiting for the consumer to release a slot it is
    /// reading. Only the producer may call this, and never while it holds a
    /// FillGuard.
    pub fn flush(&self) {
        for buffer in &self.buffers {
            while !buffer.try_mark_drained() {
                thread::sleep(FLUSH_BACKOFF);
            }
        }
    }
}

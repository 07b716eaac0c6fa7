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
use super::source::{DecodeError, FrameSource};

/// A frame source backed by an interleaved sample vector.
pub struct MemorySource {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    /// Current position in frames.
    position: usize,
}

impl MemorySource {
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> MemorySource {
        let channels = channels.max(1);
        MemorySource {
            samples,
            channels,
            sample_rate,
            position: 0,
        }
    }

    /// A mono source whose sample `n` is `(n + 1) / frames`, so every frame is
    /// distinct and non-zero.
    pub fn ramp(frames: usize, sample_rate: u32) -> MemorySource {
        MemorySource::new(crate::testutil::ramp(frames), 1, sample_rate)
    }

    pub fn total_frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

impl FrameSource for MemorySource {
    fn read_frames(&mut self, out: &mut [f32]) -> Result<usize, DecodeError> {
        let wanted = out.len() / self.channels;
        let available = self.total_frames().saturating_sub(self.position);
        let frames = wanted.min(available);

        let start = self.position * self.channels;
        let len = frames * self.channels;
        out[..len].copy_from_slice(&self.samples[start..start + len]);
        self.position += frames;
        Ok(frames)
    }

    fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        self.position = (frame as usize).min(self.total_frames());
        Ok(())
    }

    fn channel_count(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_interleaved_frames() {
        let mut source = MemorySource::new(vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2, 48000);
        assert_eq!(source.total_frames(), 3);

        let mut out = [0.0; 4];
        assert_eq!(source.read_frames(&mut out).unwrap(), 2);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0]);

        // Short read at the end, then nothing.
        assert_eq!(source.read_frames(&mut out).unwrap(), 1);
        assert_eq!(&out[..2], &[3.0, -3.0]);
        assert_eq!(source.read_frames(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_seek() {
        let mut source = MemorySource::ramp(10, 44100);
        let mut out = [0.0; 2];

        source.seek(8).unwrap();
        assert_eq!(source.read_frames(&mut out).unwrap(), 2);
        assert_eq!(out, [0.9, 1.0]);

        source.seek(100).unwrap();
        assert_eq!(source.read_frames(&mut out).unwrap(), 0);

        source.seek(0).unwrap();
        assert_eq!(source.read_frames(&mut out).unwrap(), 2);
        assert_eq!(out[0], 0.1);
    }
}

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
use symphonia::core::errors::Error as SymphoniaError;

/// Errors raised while decoding or resampling a file.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio file error: {0}")]
    Format(#[from] SymphoniaError),

    #[error("No audio track found in {0}")]
    NoTrack(String),

    #[error("Sample rate not specified in {0}")]
    UnknownSampleRate(String),

    #[error("Channels not specified in {0}")]
    UnknownChannels(String),

    #[error("Unable to build resampler: {0}Hz -> {1}Hz")]
    ResamplerSetup(u32, u32),

    #[error("Resampling failed: {0}Hz -> {1}Hz")]
    Resampling(u32, u32),
}

/// A seekable reader of interleaved f32 frames.
pub trait FrameSource: Send {
    /// Reads up to `out.len() / channel_count()` frames of interleaved samples
    /// into `out`. Returns the number of frames written; a value smaller than
    /// requested means the end of the source was reached, and 0 means nothing
    /// is left.
    fn read_frames(&mut self, out: &mut [f32]) -> Result<usize, DecodeError>;

    /// Moves the read position to `frame`. Seeking at or past the end leaves
    /// the source exhausted.
    fn seek(&mut self, frame: u64) -> Result<(), DecodeError>;

    fn channel_count(&self) -> usize;

    fn sample_rate(&self) -> u32;
}

impl FrameSource for Box<dyn FrameSource> {
    fn read_frames(&mut self, out: &mut [f32]) -> Result<usize, DecodeError> {
        (**self).read_frames(out)
    }

    fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        (**self).seek(frame)
    }

    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }
}

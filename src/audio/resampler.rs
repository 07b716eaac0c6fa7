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

use rubato::{
    FastFixedIn, PolynomialDegree, ResampleResult, Resampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};

use super::source::{DecodeError, FrameSource};

/// Input chunk size handed to the converter.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Read offset at which the output FIFO is compacted.
const FIFO_COMPACT_THRESHOLD: usize = 4096;

/// Sample rate conversion quality, cheapest last. The discriminants are the
/// indices accepted by [`SrcQuality::try_from`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SrcQuality {
    Best = 0,
    Medium = 1,
    #[default]
    Fastest = 2,
    ZeroOrderHold = 3,
    Linear = 4,
}

/// Raised for a quality index outside the known set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid sample rate conversion quality {0}")]
pub struct InvalidQuality(pub u8);

impl TryFrom<u8> for SrcQuality {
    type Error = InvalidQuality;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SrcQuality::Best),
            1 => Ok(SrcQuality::Medium),
            2 => Ok(SrcQuality::Fastest),
            3 => Ok(SrcQuality::ZeroOrderHold),
            4 => Ok(SrcQuality::Linear),
            other => Err(InvalidQuality(other)),
        }
    }
}

impl SrcQuality {
    pub fn name(self) -> &'static str {
        match self {
            SrcQuality::Best => "best",
            SrcQuality::Medium => "medium",
            SrcQuality::Fastest => "fastest",
            SrcQuality::ZeroOrderHold => "zero_order_hold",
            SrcQuality::Linear => "linear",
        }
    }

    fn build(
        self,
        ratio: f64,
        channels: usize,
    ) -> Result<Engine, rubato::ResamplerConstructionError> {
        let sinc = |sinc_len, oversampling_factor, interpolation, window, f_cutoff| {
            SincInterpolationParameters {
                sinc_len,
                f_cutoff,
                oversampling_factor,
                interpolation,
                window,
            }
        };
        let params = match self {
            SrcQuality::Best => sinc(
                256,
                256,
                SincInterpolationType::Cubic,
                WindowFunction::BlackmanHarris2,
                0.95,
            ),
            SrcQuality::Medium => sinc(
                256,
                128,
                SincInterpolationType::Linear,
                WindowFunction::BlackmanHarris2,
                0.95,
            ),
            SrcQuality::Fastest => sinc(
                64,
                64,
                SincInterpolationType::Linear,
                WindowFunction::Hann2,
                0.9,
            ),
            SrcQuality::ZeroOrderHold => {
                return Ok(Engine::Fast(FastFixedIn::<f32>::new(
                    ratio,
                    1.0,
                    PolynomialDegree::Nearest,
                    INPUT_BLOCK_SIZE,
                    channels,
                )?));
            }
            SrcQuality::Linear => {
                return Ok(Engine::Fast(FastFixedIn::<f32>::new(
                    ratio,
                    1.0,
                    PolynomialDegree::Linear,
                    INPUT_BLOCK_SIZE,
                    channels,
                )?));
            }
        };
        Ok(Engine::Sinc(SincFixedIn::<f32>::new(
            ratio,
            1.0,
            params,
            INPUT_BLOCK_SIZE,
            channels,
        )?))
    }
}

/// The rubato resampler behind a quality level.
enum Engine {
    Sinc(SincFixedIn<f32>),
    Fast(FastFixedIn<f32>),
}

impl Engine {
    fn input_frames_next(&self) -> usize {
        match self {
            Engine::Sinc(r) => r.input_frames_next(),
            Engine::Fast(r) => r.input_frames_next(),
        }
    }

    fn output_delay(&self) -> usize {
        match self {
            Engine::Sinc(r) => r.output_delay(),
            Engine::Fast(r) => r.output_delay(),
        }
    }

    fn output_buffer_allocate(&self) -> Vec<Vec<f32>> {
        match self {
            Engine::Sinc(r) => r.output_buffer_allocate(true),
            Engine::Fast(r) => r.output_buffer_allocate(true),
        }
    }

    fn process_into_buffer(
        &mut self,
        input: &[Vec<f32>],
        output: &mut [Vec<f32>],
    ) -> ResampleResult<(usize, usize)> {
        match self {
            Engine::Sinc(r) => r.process_into_buffer(input, output, None),
            Engine::Fast(r) => r.process_into_buffer(input, output, None),
        }
    }

    fn process_partial_into_buffer(
        &mut self,
        input: Option<&[Vec<f32>]>,
        output: &mut [Vec<f32>],
    ) -> ResampleResult<(usize, usize)> {
        match self {
            Engine::Sinc(r) => r.process_partial_into_buffer(input, output, None),
            Engine::Fast(r) => r.process_partial_into_buffer(input, output, None),
        }
    }

    /// Clears the filter history.
    fn reset(&mut self) {
        match self {
            Engine::Sinc(r) => r.reset(),
            Engine::Fast(r) => r.reset(),
        }
    }
}

impl fmt::Display for SrcQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SrcQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        (0..=4)
            .filter_map(|index| SrcQuality::try_from(index).ok())
            .find(|quality| quality.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown quality {s}"))
    }
}

/// Converts frames from a source rate to the output rate, one buffer at a
/// time. Equal rates are copied straight through.
pub struct ResamplingAdapter {
    source_rate: u32,
    target_rate: u32,
    channels: usize,
    quality: SrcQuality,
    ratio: f64,
    max_read: usize,
    end_of_input: bool,
    converter: Option<Converter>,
}

impl ResamplingAdapter {
    /// Builds an adapter that fills buffers of `capacity` interleaved samples.
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
        capacity: usize,
        quality: SrcQuality,
    ) -> Result<ResamplingAdapter, DecodeError> {
        let channels = channels.max(1);
        let ratio = target_rate as f64 / source_rate as f64;
        let max_read = if ratio > 1.0 {
            (capacity as f64 / ratio) as usize / channels
        } else {
            capacity / channels
        };

        let converter = if source_rate == target_rate {
            None
        } else {
            let resampler = quality
                .build(ratio, channels)
                .map_err(|_e| DecodeError::ResamplerSetup(source_rate, target_rate))?;
            Some(Converter::new(resampler, channels))
        };

        Ok(ResamplingAdapter {
            source_rate,
            target_rate,
            channels,
            quality,
            ratio,
            max_read,
            end_of_input: false,
            converter,
        })
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Output rate divided by source rate.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn is_passthrough(&self) -> bool {
        self.converter.is_none()
    }

    /// Most source frames whose converted output still fits one buffer.
    pub fn max_read_frames(&self) -> usize {
        self.max_read
    }

    pub fn end_of_input(&self) -> bool {
        self.end_of_input
    }

    /// True if this adapter already converts to `target_rate` at `quality`.
    pub fn matches(&self, target_rate: u32, quality: SrcQuality) -> bool {
        self.target_rate == target_rate && (self.is_passthrough() || self.quality == quality)
    }

    /// Drops all conversion state. Required after any jump in the source.
    pub fn reset(&mut self) {
        self.end_of_input = false;
        if let Some(converter) = self.converter.as_mut() {
            converter.reset();
        }
    }

    /// Fills `out` with interleaved frames at the output rate and returns how
    /// many frames were written. Fewer frames than fit means the source ran
    /// out; 0 means there is nothing left until the next reset.
    pub fn fill(
        &mut self,
        source: &mut dyn FrameSource,
        out: &mut [f32],
    ) -> Result<usize, DecodeError> {
        let wanted = out.len() / self.channels;
        match self.converter.as_mut() {
            None => {
                if self.end_of_input {
                    return Ok(0);
                }
                let frames = wanted.min(self.max_read);
                let read = source.read_frames(&mut out[..frames * self.channels])?;
                if read < frames {
                    self.end_of_input = true;
                }
                Ok(read)
            }
            Some(converter) => {
                let mut written = 0;
                while written < wanted {
                    written += converter
                        .drain_into(&mut out[written * self.channels..], wanted - written);
                    if written == wanted {
                        break;
                    }
                    let produced = converter
                        .produce(source, self.ratio, &mut self.end_of_input)
                        .map_err(|e| match e {
                            ProduceError::Source(e) => e,
                            ProduceError::Convert => {
                                DecodeError::Resampling(self.source_rate, self.target_rate)
                            }
                        })?;
                    if !produced {
                        break;
                    }
                }
                Ok(written)
            }
        }
    }
}

/// Resampler state for the conversion path. Input and output are planar.
struct Converter {
    resampler: Engine,
    channels: usize,
    /// Interleaved frames read from the source.
    read_scratch: Vec<f32>,
    /// Source frames waiting to be converted.
    input: Vec<Vec<f32>>,
    /// Converter output for one chunk.
    output_scratch: Vec<Vec<f32>>,
    /// Converted frames waiting to be handed out.
    fifo: Vec<Vec<f32>>,
    fifo_pos: usize,
    /// Leading output frames still to drop to cancel the converter delay.
    delay_remaining: usize,
    input_total: u64,
    output_total: u64,
    flushed: bool,
}

/// Either the source failed or the converter did.
enum ProduceError {
    Source(DecodeError),
    Convert,
}

impl Converter {
    fn new(resampler: Engine, channels: usize) -> Converter {
        let output_scratch = resampler.output_buffer_allocate();
        let delay_remaining = resampler.output_delay();
        Converter {
            resampler,
            channels,
            read_scratch: Vec::with_capacity(INPUT_BLOCK_SIZE * channels),
            input: vec![Vec::with_capacity(INPUT_BLOCK_SIZE * 2); channels],
            output_scratch,
            fifo: vec![Vec::new(); channels],
            fifo_pos: 0,
            delay_remaining,
            input_total: 0,
            output_total: 0,
            flushed: false,
        }
    }

    fn reset(&mut self) {
        self.resampler.reset();
        for ch in self.input.iter_mut().chain(self.fifo.iter_mut()) {
            ch.clear();
        }
        self.fifo_pos = 0;
        self.delay_remaining = self.resampler.output_delay();
        self.input_total = 0;
        self.output_total = 0;
        self.flushed = false;
    }

    fn input_len(&self) -> usize {
        self.input.first().map(Vec::len).unwrap_or(0)
    }

    fn fifo_len(&self) -> usize {
        self.fifo
            .first()
            .map(|ch| ch.len() - self.fifo_pos)
            .unwrap_or(0)
    }

    /// Copies up to `max_frames` converted frames into `out`, interleaving them.
    fn drain_into(&mut self, out: &mut [f32], max_frames: usize) -> usize {
        let frames = self.fifo_len().min(max_frames);
        for (c, ch) in self.fifo.iter().enumerate() {
            for (n, sample) in ch[self.fifo_pos..self.fifo_pos + frames].iter().enumerate() {
                out[n * self.channels + c] = *sample;
            }
        }
        self.fifo_pos += frames;

        if self.fifo_pos > FIFO_COMPACT_THRESHOLD {
            for ch in self.fifo.iter_mut() {
                ch.drain(..self.fifo_pos);
            }
            self.fifo_pos = 0;
        }
        frames
    }

    /// Reads up to `frames` source frames into the input window.
    fn read_source(
        &mut self,
        source: &mut dyn FrameSource,
        frames: usize,
    ) -> Result<usize, DecodeError> {
        self.read_scratch.resize(frames * self.channels, 0.0);
        let read = source.read_frames(&mut self.read_scratch)?;
        for frame in self.read_scratch[..read * self.channels].chunks_exact(self.channels) {
            for (ch, sample) in self.input.iter_mut().zip(frame) {
                ch.push(*sample);
            }
        }
        self.input_total += read as u64;
        Ok(read)
    }

    /// Moves `frames` frames of converter output into the FIFO, dropping the
    /// converter's leading delay.
    fn push_output(&mut self, frames: usize) {
        let skip = self.delay_remaining.min(frames);
        self.delay_remaining -= skip;
        for (ch, out) in self.fifo.iter_mut().zip(self.output_scratch.iter()) {
            ch.extend_from_slice(&out[skip..frames]);
        }
        self.output_total += (frames - skip) as u64;
    }

    /// Runs one conversion step. Returns false once the source and the
    /// converter tail are both exhausted.
    fn produce(
        &mut self,
        source: &mut dyn FrameSource,
        ratio: f64,
        end_of_input: &mut bool,
    ) -> Result<bool, ProduceError> {
        if self.flushed {
            return Ok(false);
        }

        let needed = self.resampler.input_frames_next();
        while !*end_of_input && self.input_len() < needed {
            let want = needed - self.input_len();
            let read = self.read_source(source, want).map_err(ProduceError::Source)?;
            if read < want {
                *end_of_input = true;
            }
        }

        if self.input_len() >= needed {
            let (used, produced) = self
                .resampler
                .process_into_buffer(&self.input, &mut self.output_scratch)
                .map_err(|_e| ProduceError::Convert)?;
            for ch in self.input.iter_mut() {
                ch.drain(..used.min(ch.len()));
            }
            self.push_output(produced);
            return Ok(true);
        }

        // End of input: convert what is left, then flush the tail until the
        // output covers the whole input.
        let expected = (self.input_total as f64 * ratio).round() as u64;
        if self.input_len() > 0 {
            let (_, produced) = self
                .resampler
                .process_partial_into_buffer(Some(self.input.as_slice()), &mut self.output_scratch)
                .map_err(|_e| ProduceError::Convert)?;
            for ch in self.input.iter_mut() {
                ch.clear();
            }
            self.push_output(produced);
        }
        while self.output_total < expected {
            let (_, produced) = self
                .resampler
                .process_partial_into_buffer(None, &mut self.output_scratch)
                .map_err(|_e| ProduceError::Convert)?;
            if produced == 0 {
                break;
            }
            self.push_output(produced);
        }

        let excess = self.output_total.saturating_sub(expected) as usize;
        let excess = excess.min(self.fifo_len());
        for ch in self.fifo.iter_mut() {
            let len = ch.len() - excess;
            ch.truncate(len);
        }
        self.output_total -= excess as u64;
        self.flushed = true;
        Ok(true)
    }
}

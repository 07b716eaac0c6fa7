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
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::IntoSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::{Hint, ProbeResult};
use symphonia::core::sample::Sample;
use symphonia::default::{get_codecs, get_probe};
use tracing::warn;

use super::source::{DecodeError, FrameSource};

/// What is known about an open file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileInfo {
    pub sample_rate: u32,
    pub channels: usize,
    /// Total frames, 0 if the container does not say.
    pub frames: u64,
    /// Short codec name, e.g. `pcm_s16le` or `flac`.
    pub format: String,
}

impl FileInfo {
    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Reads frames out of any file symphonia can probe (WAV, FLAC, MP3, Ogg...).
pub struct FileDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: FileInfo,
    /// Decoded samples not yet handed out.
    pending: Vec<f32>,
    pending_pos: usize,
    /// Frames still to drop after an inexact seek.
    discard: u64,
    finished: bool,
}

impl FileDecoder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileDecoder, DecodeError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let ProbeResult { format, .. } = probe(path)?;
        let mut reader = format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::NoTrack(display.clone()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| DecodeError::UnknownSampleRate(display.clone()))?;
        let format = get_codecs()
            .get_codec(params.codec)
            .map(|descriptor| descriptor.short_name.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let mut decoder = get_codecs().make(&params, &DecoderOptions::default())?;

        let mut pending = Vec::new();
        let channels = match params.channels.map(|c| c.count()) {
            Some(channels) if channels > 0 => channels,
            // Some containers leave the layout to the codec, so decode the
            // first packet to find it and keep its samples.
            _ => next_packet_for_track(reader.as_mut(), decoder.as_mut(), track_id, &mut pending)?
                .ok_or_else(|| DecodeError::UnknownChannels(display.clone()))?,
        };

        Ok(FileDecoder {
            reader,
            decoder,
            track_id,
            info: FileInfo {
                sample_rate,
                channels,
                frames: params.n_frames.unwrap_or(0),
                format,
            },
            pending,
            pending_pos: 0,
            discard: 0,
            finished: false,
        })
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Decodes the next packet into `pending`. Returns false at end of file.
    fn refill(&mut self) -> Result<bool, DecodeError> {
        self.pending_pos = 0;
        loop {
            let decoded = next_packet_for_track(
                self.reader.as_mut(),
                self.decoder.as_mut(),
                self.track_id,
                &mut self.pending,
            )?;
            if decoded.is_none() {
                return Ok(false);
            }
            if self.discard == 0 {
                return Ok(true);
            }

            let frames = (self.pending.len() / self.info.channels) as u64;
            let skip = self.discard.min(frames);
            self.discard -= skip;
            self.pending_pos = skip as usize * self.info.channels;
            if self.pending_pos < self.pending.len() {
                return Ok(true);
            }
        }
    }
}

impl FrameSource for FileDecoder {
    fn read_frames(&mut self, out: &mut [f32]) -> Result<usize, DecodeError> {
        let channels = self.info.channels;
        let wanted = out.len() / channels * channels;
        let mut written = 0;

        while written < wanted && !self.finished {
            if self.pending_pos >= self.pending.len() && !self.refill()? {
                self.finished = true;
                break;
            }
            let available = &self.pending[self.pending_pos..];
            let count = available.len().min(wanted - written);
            out[written..written + count].copy_from_slice(&available[..count]);
            written += count;
            self.pending_pos += count;
        }

        Ok(written / channels)
    }

    fn seek(&mut self, frame: u64) -> Result<(), DecodeError> {
        self.pending.clear();
        self.pending_pos = 0;
        self.discard = 0;

        if self.info.frames > 0 && frame >= self.info.frames {
            self.finished = true;
            return Ok(());
        }

        // Track timestamps count frames for the formats we play.
        let seeked = self.reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: frame,
                track_id: self.track_id,
            },
        )?;
        self.decoder.reset();
        self.discard = seeked.required_ts.saturating_sub(seeked.actual_ts);
        self.finished = false;
        Ok(())
    }

    fn channel_count(&self) -> usize {
        self.info.channels
    }

    fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }
}

fn probe(path: &Path) -> Result<ProbeResult, DecodeError> {
    let file = File::open(path).map_err(|e| {
        DecodeError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    Ok(get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?)
}

/// Reads packets until one for `track_id` decodes, replacing the contents of
/// `samples` with its interleaved samples. Returns the decoded channel count,
/// or None at end of file.
fn next_packet_for_track(
    reader: &mut dyn FormatReader,
    decoder: &mut dyn Decoder,
    track_id: u32,
    samples: &mut Vec<f32>,
) -> Result<Option<usize>, DecodeError> {
    loop {
        let packet = match next_packet(reader) {
            Ok(Some(packet)) => packet,
            Ok(None) => return Ok(None),
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(err = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        samples.clear();
        let channels = append_interleaved(decoded, samples);
        if channels > 0 && !samples.is_empty() {
            return Ok(Some(channels));
        }
    }
}

fn next_packet(reader: &mut dyn FormatReader) -> Result<Option<Packet>, SymphoniaError> {
    match reader.next_packet() {
        Ok(packet) => Ok(Some(packet)),
        Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Ok(None)
        }
        // Some demuxers report a decode error at the end of the stream.
        Err(SymphoniaError::DecodeError(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn append_interleaved(decoded: AudioBufferRef, out: &mut Vec<f32>) -> usize {
    match decoded {
        AudioBufferRef::F32(buf) => interleave(&buf, out),
        AudioBufferRef::F64(buf) => interleave(&buf, out),
        AudioBufferRef::S8(buf) => interleave(&buf, out),
        AudioBufferRef::S16(buf) => interleave(&buf, out),
        AudioBufferRef::S24(buf) => interleave(&buf, out),
        AudioBufferRef::S32(buf) => interleave(&buf, out),
        AudioBufferRef::U8(buf) => interleave(&buf, out),
        AudioBufferRef::U16(buf) => interleave(&buf, out),
        AudioBufferRef::U24(buf) => interleave(&buf, out),
        AudioBufferRef::U32(buf) => interleave(&buf, out),
    }
}

fn interleave<T>(buf: &AudioBuffer<T>, out: &mut Vec<f32>) -> usize
where
    T: Sample + IntoSample<f32>,
{
    let frames = buf.frames();
    let channels = buf.spec().channels.count();
    let planes = buf.planes();
    let planes = planes.planes();
    out.reserve(frames * channels);
    for frame in 0..frames {
        for plane in planes.iter() {
            out.push(plane[frame].into_sample());
        }
    }
    channels
}

/// Duration of the file at `path` in seconds, 0.0 if it cannot be read.
pub fn file_duration<P: AsRef<Path>>(path: P) -> f64 {
    FileDecoder::open(path)
        .map(|decoder| decoder.info().duration())
        .unwrap_or(0.0)
}

/// Metadata fields that can be looked up with [`file_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoTag {
    Title,
    Copyright,
    Software,
    Artist,
    Comment,
    Date,
    Album,
    License,
    TrackNumber,
    Genre,
}

impl InfoTag {
    pub const ALL: [InfoTag; 10] = [
        InfoTag::Title,
        InfoTag::Copyright,
        InfoTag::Software,
        InfoTag::Artist,
        InfoTag::Comment,
        InfoTag::Date,
        InfoTag::Album,
        InfoTag::License,
        InfoTag::TrackNumber,
        InfoTag::Genre,
    ];

    fn standard_key(self) -> StandardTagKey {
        match self {
            InfoTag::Title => StandardTagKey::TrackTitle,
            InfoTag::Copyright => StandardTagKey::Copyright,
            InfoTag::Software => StandardTagKey::Encoder,
            InfoTag::Artist => StandardTagKey::Artist,
            InfoTag::Comment => StandardTagKey::Comment,
            InfoTag::Date => StandardTagKey::Date,
            InfoTag::Album => StandardTagKey::Album,
            InfoTag::License => StandardTagKey::License,
            InfoTag::TrackNumber => StandardTagKey::TrackNumber,
            InfoTag::Genre => StandardTagKey::Genre,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InfoTag::Title => "title",
            InfoTag::Copyright => "copyright",
            InfoTag::Software => "software",
            InfoTag::Artist => "artist",
            InfoTag::Comment => "comment",
            InfoTag::Date => "date",
            InfoTag::Album => "album",
            InfoTag::License => "license",
            InfoTag::TrackNumber => "tracknumber",
            InfoTag::Genre => "genre",
        }
    }
}

impl fmt::Display for InfoTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InfoTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InfoTag::ALL
            .into_iter()
            .find(|tag| tag.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tag {s}"))
    }
}

/// Value of `tag` in the file at `path`, empty if the file has no such tag or
/// cannot be read.
pub fn file_info<P: AsRef<Path>>(path: P, tag: InfoTag) -> String {
    let Ok(mut probed) = probe(path.as_ref()) else {
        return String::new();
    };

    let key = tag.standard_key();
    let find = |revision: &MetadataRevision| {
        revision
            .tags()
            .iter()
            .find(|t| t.std_key == Some(key))
            .map(|t| t.value.to_string())
    };

    // Tags found while probing (e.g. ID3) come first, then the container's own.
    if let Some(value) = probed
        .metadata
        .get()
        .as_ref()
        .and_then(|m| m.current())
        .and_then(find)
    {
        return value;
    }
    let value = probed
        .format
        .metadata()
        .current()
        .and_then(find)
        .unwrap_or_default();
    value
}

#[cfg(test)]
mod tests {
    use hound::{SampleFormat, WavSpec, WavWriter};

    use super::*;
    use crate::testutil::write_wav;

    #[test]
    fn test_open_reports_file_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, &[vec![0.25; 4410], vec![-0.25; 4410]], 44100).unwrap();

        let decoder = FileDecoder::open(&path).unwrap();
        let info = decoder.info();
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.frames, 4410);
        assert_eq!(info.format, "pcm_f32le");
        assert!((info.duration() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_reads_all_frames_interleaved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let left: Vec<f32> = (0..1000).map(|n| n as f32 / 1000.0).collect();
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        write_wav(&path, &[left.clone(), right], 22050).unwrap();

        let mut decoder = FileDecoder::open(&path).unwrap();
        let mut out = vec![0.0; 2 * 300];
        let mut frames = Vec::new();
        loop {
            let read = decoder.read_frames(&mut out).unwrap();
            frames.extend_from_slice(&out[..read * 2]);
            if read < 300 {
                break;
            }
        }

        assert_eq!(frames.len(), 2000);
        for (n, frame) in frames.chunks(2).enumerate() {
            assert_eq!(frame[0], left[n]);
            assert_eq!(frame[1], -left[n]);
        }
        assert_eq!(decoder.read_frames(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let samples: Vec<f32> = (0..5000).map(|n| n as f32 / 5000.0).collect();
        write_wav(&path, &[samples.clone()], 44100).unwrap();

        let mut decoder = FileDecoder::open(&path).unwrap();
        let mut out = [0.0; 4];

        decoder.seek(2500).unwrap();
        assert_eq!(decoder.read_frames(&mut out).unwrap(), 4);
        assert_eq!(out, samples[2500..2504]);

        decoder.seek(0).unwrap();
        assert_eq!(decoder.read_frames(&mut out).unwrap(), 4);
        assert_eq!(out, samples[..4]);

        // Past the end leaves nothing to read until the next seek.
        decoder.seek(5000).unwrap();
        assert_eq!(decoder.read_frames(&mut out).unwrap(), 0);
        decoder.seek(4998).unwrap();
        assert_eq!(decoder.read_frames(&mut out).unwrap(), 2);
    }

    #[test]
    fn test_integer_samples_are_scaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("int.wav");
        let mut writer = WavWriter::create(
            &path,
            WavSpec {
                channels: 1,
                sample_rate: 8000,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
        )
        .unwrap();
        for sample in [i16::MIN, 0, 16384] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let mut decoder = FileDecoder::open(&path).unwrap();
        assert_eq!(decoder.info().format, "pcm_s16le");
        let mut out = [9.0; 3];
        assert_eq!(decoder.read_frames(&mut out).unwrap(), 3);
        assert_eq!(out, [-1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_file_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, &[vec![0.0; 22050 * 2]], 22050).unwrap();

        assert!((file_duration(&path) - 2.0).abs() < 1e-9);
        assert_eq!(file_duration(dir.path().join("missing.wav")), 0.0);

        let garbage = dir.path().join("garbage.wav");
        std::fs::write(&garbage, b"not audio at all").unwrap();
        assert_eq!(file_duration(&garbage), 0.0);
    }

    #[test]
    fn test_file_info_without_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, &[vec![0.0; 100]], 22050).unwrap();

        assert_eq!(file_info(&path, InfoTag::Title), "");
        assert_eq!(file_info(dir.path().join("missing.wav"), InfoTag::Artist), "");
    }

    /// A 16-bit mono WAV with a LIST/INFO chunk ahead of the samples.
    fn tagged_wav(tags: &[(&[u8; 4], &str)]) -> Vec<u8> {
        let mut info = b"INFO".to_vec();
        for (id, value) in tags {
            info.extend_from_slice(*id);
            info.extend_from_slice(&(value.len() as u32).to_le_bytes());
            info.extend_from_slice(value.as_bytes());
            if value.len() % 2 == 1 {
                info.push(0);
            }
        }

        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_le_bytes());
        fmt.extend_from_slice(&1u16.to_le_bytes());
        fmt.extend_from_slice(&8000u32.to_le_bytes());
        fmt.extend_from_slice(&16000u32.to_le_bytes());
        fmt.extend_from_slice(&2u16.to_le_bytes());
        fmt.extend_from_slice(&16u16.to_le_bytes());

        let mut body = b"WAVE".to_vec();
        for (id, chunk) in [
            (b"fmt ", fmt),
            (b"LIST", info),
            (b"data", vec![0u8; 200]),
        ] {
            body.extend_from_slice(id);
            body.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            body.extend_from_slice(&chunk);
        }

        let mut wav = b"RIFF".to_vec();
        wav.extend_from_slice(&(body.len() as u32).to_le_bytes());
        wav.extend_from_slice(&body);
        wav
    }

    #[test]
    fn test_file_info_reads_riff_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagged.wav");
        std::fs::write(
            &path,
            tagged_wav(&[(b"INAM", "Sea Shanty"), (b"IART", "The Crew")]),
        )
        .unwrap();

        assert_eq!(file_info(&path, InfoTag::Title), "Sea Shanty");
        assert_eq!(file_info(&path, InfoTag::Artist), "The Crew");
        assert_eq!(file_info(&path, InfoTag::Album), "");
        assert_eq!(file_duration(&path), 100.0 / 8000.0);
    }

    #[test]
    fn test_info_tag_names() {
        for tag in InfoTag::ALL {
            assert_eq!(tag.to_string().parse::<InfoTag>().unwrap(), tag);
        }
        assert_eq!("Artist".parse::<InfoTag>().unwrap(), InfoTag::Artist);
        assert!("composer".parse::<InfoTag>().is_err());
    }
}

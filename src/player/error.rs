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
use std::path::PathBuf;

use crate::audio::resampler::InvalidQuality;
use crate::audio::source::DecodeError;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("unable to start the file producer: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("unable to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("file producer exited before opening {}", .0.display())]
    WorkerExited(PathBuf),

    #[error("volume {0} is outside 0.0..=2.0")]
    InvalidVolume(f32),

    #[error(transparent)]
    InvalidQuality(#[from] InvalidQuality),

    #[error("no file is open")]
    NotOpen,

    #[error("track {track} is outside the {channels} channels of the file")]
    InvalidTrack { track: usize, channels: usize },

    #[error("loop point {0}s is outside the file or the other loop point")]
    InvalidLoopPoint(f64),
}

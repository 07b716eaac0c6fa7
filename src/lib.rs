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
//! Double-buffered audio file playback with live MIDI transport control.
//!
//! A [`player::Player`] streams one file from a background producer thread
//! into a pair of buffers. Its [`player::Consumer`] renders them from the
//! audio callback of an [`audio::Device`].

pub mod audio;
pub mod config;
pub mod midi;
pub mod player;
pub mod util;

#[cfg(test)]
mod testutil;

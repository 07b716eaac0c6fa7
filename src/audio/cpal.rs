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
use std::{error::Error, fmt, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Receiver;
use tracing::{error, info, span, Level};

use super::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
};
use crate::audio::{
    AudioError, Device as AudioDevice, OutputHandle, MAX_BLOCK_FRAMES, MAX_CONTROLS_PER_BLOCK,
};
use crate::config;
use crate::midi::ControlChange;
use crate::player::Consumer;

/// A cpal output device. Channel A goes to the first device channel and
/// channel B to the second; any further channels are silent.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of output channels the device supports.
    max_channels: u16,
    host_id: cpal::HostId,
    device: cpal::Device,
    /// The rate the stream is opened at.
    sample_rate: u32,
    sample_format: cpal::SampleFormat,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// Builds the stream callback for sample type `T`. Everything the callback
/// touches is allocated here, up front.
fn output_callback<T>(
    mut consumer: Consumer,
    controls: Receiver<ControlChange>,
    channels: usize,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut out_a = vec![0.0f32; MAX_BLOCK_FRAMES];
    let mut out_b = vec![0.0f32; MAX_BLOCK_FRAMES];
    let mut pending: Vec<ControlChange> = Vec::with_capacity(MAX_CONTROLS_PER_BLOCK);
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;

    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);

        pending.clear();
        while pending.len() < MAX_CONTROLS_PER_BLOCK {
            match controls.try_recv() {
                Ok(cc) => pending.push(cc),
                Err(_) => break,
            }
        }

        let chunk_len = MAX_BLOCK_FRAMES * channels;
        let chunk_count = data.len().div_ceil(chunk_len);
        for (index, chunk) in data.chunks_mut(chunk_len).enumerate() {
            let frames = chunk.len() / channels;
            // Controls belong after the last frame of the callback.
            let block_controls: &[ControlChange] = if index + 1 == chunk_count {
                &pending
            } else {
                &[]
            };
            consumer.process(&mut out_a[..frames], &mut out_b[..frames], block_controls);

            for (i, frame) in chunk.chunks_mut(channels).enumerate() {
                for (channel, sample) in frame.iter_mut().enumerate() {
                    *sample = match channel {
                        0 => T::from_sample(out_a[i]),
                        1 => T::from_sample(out_b[i]),
                        _ => T::EQUILIBRIUM,
                    };
                }
            }
        }
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices that have at least one output channel.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|output_config| output_config.channels())
                    .max()
                    .unwrap_or(0);
                if max_channels == 0 {
                    continue;
                }

                let Ok(default_config) = device.default_output_config() else {
                    continue;
                };

                devices.push(Device {
                    name: device.name()?,
                    max_channels,
                    host_id,
                    sample_rate: default_config.sample_rate(),
                    sample_format: default_config.sample_format(),
                    device,
                })
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the cpal device named in the configuration. The configured
    /// sample rate overrides the device default.
    pub fn get(config: &config::Audio) -> Result<Device, AudioError> {
        let name = config.device();
        let devices = Device::list_cpal_devices().map_err(|e| AudioError::Query {
            device: name.to_string(),
            message: e.to_string(),
        })?;
        match devices
            .into_iter()
            .find(|device| device.name.trim() == name)
        {
            Some(mut device) => {
                if let Some(sample_rate) = config.sample_rate() {
                    device.sample_rate = sample_rate;
                }
                Ok(device)
            }
            None => Err(AudioError::DeviceNotFound(name.to_string())),
        }
    }

    fn build_stream(
        &self,
        consumer: Consumer,
        controls: Receiver<ControlChange>,
    ) -> Result<cpal::Stream, AudioError> {
        let channels = self.max_channels.min(2);
        let config = cpal::StreamConfig {
            channels,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let channels = usize::from(channels);
        let on_error = |err: cpal::StreamError| error!("cpal output stream error: {}", err);

        let stream = match self.sample_format {
            cpal::SampleFormat::F32 => self.device.build_output_stream(
                &config,
                output_callback::<f32>(consumer, controls, channels),
                on_error,
                None,
            )?,
            cpal::SampleFormat::I16 => self.device.build_output_stream(
                &config,
                output_callback::<i16>(consumer, controls, channels),
                on_error,
                None,
            )?,
            cpal::SampleFormat::I32 => self.device.build_output_stream(
                &config,
                output_callback::<i32>(consumer, controls, channels),
                on_error,
                None,
            )?,
            other => return Err(AudioError::UnsupportedFormat(other.to_string())),
        };
        stream.play()?;
        Ok(stream)
    }
}

impl AudioDevice for Device {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Opens the output stream on its own thread, which owns the stream for
    /// as long as the returned handle lives.
    fn start(
        &self,
        consumer: Consumer,
        controls: Receiver<ControlChange>,
    ) -> Result<OutputHandle, AudioError> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);

        let device = Device {
            name: self.name.clone(),
            max_channels: self.max_channels,
            host_id: self.host_id,
            device: self.device.clone(),
            sample_rate: self.sample_rate,
            sample_format: self.sample_format,
        };
        let join = thread::Builder::new()
            .name("fileplay-output".into())
            .spawn(move || {
                let span = span!(Level::INFO, "output (cpal)");
                let _enter = span.enter();

                let stream = match device.build_stream(consumer, controls) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = started_tx.send(Err(e));
                        return;
                    }
                };
                info!(
                    device = device.name,
                    sample_rate = device.sample_rate,
                    format = %device.sample_format,
                    "Output stream started."
                );
                let _ = started_tx.send(Ok(()));

                // Runs until the handle disconnects the shutdown channel.
                let _ = shutdown_rx.recv();
                drop(stream);
                info!(device = device.name, "Output stream stopped.");
            })
            .map_err(AudioError::ThreadSpawn)?;

        match started_rx.recv() {
            Ok(Ok(())) => Ok(OutputHandle::new(shutdown_tx, join)),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                let _ = join.join();
                Err(AudioError::OutputExited)
            }
        }
    }
}

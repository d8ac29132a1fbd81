//! CPAL-backed audio sink.
//!
//! The engine writes interleaved `i16` into a bounded local buffer; the
//! CPAL callback drains it without blocking, applying mono/stereo mapping
//! and converting to the device sample format. The blocking `write` is
//! what paces the whole playback pipeline at the device rate.
//!
//! There is no resampling stage: the device is asked for the stream's
//! rate and a mismatch is logged, not corrected.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use stream_engine::sink::{AudioSink, SinkFactory};

use crate::device;

/// Opens a [`CpalSink`] on the player thread (CPAL streams stay on the
/// thread that builds them).
pub struct CpalSinkFactory {
    pub device_needle: Option<String>,
}

impl SinkFactory for CpalSinkFactory {
    fn open(&self) -> Result<Box<dyn AudioSink>> {
        let host = cpal::default_host();
        let dev = device::pick_device(&host, self.device_needle.as_deref())?;
        tracing::info!(device = %dev.description()?, "output device");
        Ok(Box::new(CpalSink {
            device: dev,
            stream: None,
            shared: None,
            src_channels: 0,
            max_buffered: 0,
        }))
    }
}

struct SinkShared {
    buf: Mutex<VecDeque<i16>>,
    cv: Condvar,
}

pub struct CpalSink {
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    shared: Option<Arc<SinkShared>>,
    src_channels: usize,
    max_buffered: usize,
}

impl CpalSink {
    /// Wait for the current buffer to drain so no already-written audio is
    /// lost across a format change. Bounded in case the device stalls.
    fn drain_current(&self) {
        let Some(shared) = &self.shared else { return };
        let deadline = Duration::from_secs(2);
        let buf = shared.buf.lock().unwrap();
        let _ = shared
            .cv
            .wait_timeout_while(buf, deadline, |b| !b.is_empty());
    }
}

impl AudioSink for CpalSink {
    fn reconfigure(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        self.drain_current();
        self.stream.take();

        let config = device::pick_output_config(&self.device, sample_rate)?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = device::pick_buffer_size(&config) {
            stream_config.buffer_size = buf;
        }
        if stream_config.sample_rate != sample_rate {
            tracing::warn!(
                stream_rate_hz = sample_rate,
                device_rate_hz = stream_config.sample_rate,
                "device does not support the stream rate; playback speed will be off"
            );
        }
        tracing::debug!(
            rate_hz = stream_config.sample_rate,
            channels_out = stream_config.channels,
            buffer_size = ?stream_config.buffer_size,
            "device output config"
        );

        // Half a second of audio; the engine blocks in write() beyond this.
        let shared = Arc::new(SinkShared {
            buf: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        });
        self.max_buffered = (sample_rate as usize * channels as usize) / 2;
        self.src_channels = channels as usize;

        let stream = build_output_stream(
            &self.device,
            &stream_config,
            config.sample_format(),
            shared.clone(),
            self.src_channels,
        )?;
        stream.play()?;

        self.stream = Some(stream);
        self.shared = Some(shared);
        Ok(())
    }

    fn write(&mut self, pcm: &[i16]) -> Result<usize> {
        let shared = self
            .shared
            .as_ref()
            .ok_or_else(|| anyhow!("sink not configured"))?;

        let mut buf = shared.buf.lock().unwrap();
        while buf.len() >= self.max_buffered {
            buf = shared.cv.wait(buf).unwrap();
        }
        buf.extend(pcm.iter().copied());
        Ok(pcm.len())
    }
}

/// Build the device stream for whatever sample format the config selected.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: Arc<SinkShared>,
    src_channels: usize,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared, src_channels),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared, src_channels),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared, src_channels),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared, src_channels),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<SinkShared>,
    src_channels: usize,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = config.channels as usize;
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<i16>(0);
            let mut buf = shared.buf.lock().unwrap();
            let frames = data.len() / channels_out;

            for frame in 0..frames {
                if buf.len() < src_channels {
                    // Underrun; fill the rest with silence.
                    for idx in (frame * channels_out)..data.len() {
                        data[idx] = silence;
                    }
                    break;
                }
                let mut src = [0i16; 2];
                for s in src.iter_mut().take(src_channels) {
                    *s = buf.pop_front().unwrap_or(0);
                }
                for ch in 0..channels_out {
                    let mapped = map_sample(&src[..src_channels], ch, channels_out);
                    data[frame * channels_out + ch] =
                        <T as cpal::Sample>::from_sample::<i16>(mapped);
                }
            }

            drop(buf);
            shared.cv.notify_all();
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Map one source frame onto an output channel.
///
/// - mono -> any layout: duplicate channel 0
/// - stereo -> mono: average L/R
/// - stereo -> stereo and wider: pass through, clamp extra channels to R
fn map_sample(src: &[i16], dst_ch: usize, dst_channels: usize) -> i16 {
    match (src.len(), dst_channels) {
        (1, _) => src[0],
        (2, 1) => ((i32::from(src[0]) + i32::from(src[1])) / 2) as i16,
        (2, _) => src[dst_ch.min(1)],
        _ => src[dst_ch.min(src.len().saturating_sub(1))],
    }
}

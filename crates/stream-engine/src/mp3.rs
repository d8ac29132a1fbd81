//! MPEG Layer III frame codec.
//!
//! Frame boundaries are recovered by hand (sync word plus header sanity
//! checks, which is what makes bounded resync possible on a raw stream);
//! the actual audio decode of each complete frame is delegated to
//! Symphonia's MP3 decoder, one packet per frame.

use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;

use crate::decode::{FrameCodec, FrameFormat, PcmFrame};
use crate::error::EngineError;

/// Creates one codec instance per playback session.
pub trait CodecFactory: Send + Sync {
    fn create(&self) -> Box<dyn FrameCodec>;
}

/// Factory for [`Mp3Codec`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Mp3CodecFactory;

impl CodecFactory for Mp3CodecFactory {
    fn create(&self) -> Box<dyn FrameCodec> {
        Box::new(Mp3Codec::new())
    }
}

const HEADER_LEN: usize = 4;

// Layer III bitrates in kbit/s, indexed by the header's bitrate field.
const BITRATES_V1_L3: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];
const BITRATES_V2_L3: [u32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0,
];

const SAMPLE_RATES_V1: [u32; 3] = [44_100, 48_000, 32_000];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MpegVersion {
    V1,
    V2,
    V25,
}

/// Fields extracted from a 4-byte frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FrameHeader {
    version: MpegVersion,
    bitrate: u32,
    sample_rate: u32,
    channels: u16,
    padding: bool,
}

impl FrameHeader {
    /// Parse a Layer III header, rejecting reserved and free-format values.
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0x03 {
            0 => MpegVersion::V25,
            2 => MpegVersion::V2,
            3 => MpegVersion::V1,
            _ => return None, // reserved
        };

        // Layer III only.
        if (bytes[1] >> 1) & 0x03 != 0x01 {
            return None;
        }

        let bitrate_index = (bytes[2] >> 4) as usize;
        let table = match version {
            MpegVersion::V1 => &BITRATES_V1_L3,
            MpegVersion::V2 | MpegVersion::V25 => &BITRATES_V2_L3,
        };
        let bitrate = table[bitrate_index];
        if bitrate == 0 {
            return None; // free format or invalid
        }

        let rate_index = ((bytes[2] >> 2) & 0x03) as usize;
        if rate_index == 3 {
            return None;
        }
        let sample_rate = match version {
            MpegVersion::V1 => SAMPLE_RATES_V1[rate_index],
            MpegVersion::V2 => SAMPLE_RATES_V1[rate_index] / 2,
            MpegVersion::V25 => SAMPLE_RATES_V1[rate_index] / 4,
        };

        let channels = if (bytes[3] >> 6) & 0x03 == 0x03 { 1 } else { 2 };

        Some(Self {
            version,
            bitrate,
            sample_rate,
            channels,
            padding: (bytes[2] >> 1) & 0x01 == 1,
        })
    }

    /// Total frame size in bytes, header included.
    fn frame_len(&self) -> usize {
        let coeff: u32 = match self.version {
            MpegVersion::V1 => 144,
            MpegVersion::V2 | MpegVersion::V25 => 72,
        };
        let len = coeff * self.bitrate * 1_000 / self.sample_rate + u32::from(self.padding);
        len as usize
    }

    /// PCM frames produced per MP3 frame.
    fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::V1 => 1_152,
            MpegVersion::V2 | MpegVersion::V25 => 576,
        }
    }
}

/// Layer III implementation of [`FrameCodec`].
pub struct Mp3Codec {
    decoder: Option<Box<dyn Decoder>>,
    /// Format the current decoder was created for.
    format: Option<FrameFormat>,
}

impl Mp3Codec {
    pub fn new() -> Self {
        Self {
            decoder: None,
            format: None,
        }
    }

    fn ensure_decoder(&mut self, format: FrameFormat) -> Result<(), EngineError> {
        if self.decoder.is_some() && self.format == Some(format) {
            return Ok(());
        }

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_MP3)
            .with_sample_rate(format.sample_rate);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| EngineError::Decode(format!("create mp3 decoder: {e}")))?;

        self.decoder = Some(decoder);
        self.format = Some(format);
        Ok(())
    }
}

impl Default for Mp3Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec for Mp3Codec {
    fn header_len(&self) -> usize {
        HEADER_LEN
    }

    fn find_sync(&self, window: &[u8]) -> Option<usize> {
        window
            .windows(HEADER_LEN)
            .position(|w| FrameHeader::parse(w).is_some())
    }

    fn frame_len(&self, window: &[u8]) -> Option<usize> {
        FrameHeader::parse(window).map(|h| h.frame_len())
    }

    fn decode_frame(&mut self, frame: &[u8]) -> Result<PcmFrame, EngineError> {
        let header = FrameHeader::parse(frame)
            .ok_or_else(|| EngineError::Decode("invalid frame header".into()))?;
        let format = FrameFormat {
            sample_rate: header.sample_rate,
            channels: header.channels,
        };
        self.ensure_decoder(format)?;

        let decoder = self.decoder.as_mut().ok_or_else(|| {
            EngineError::Decode("mp3 decoder unavailable".into())
        })?;

        let packet = Packet::new_from_slice(0, 0, 0, frame);
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| EngineError::Decode(format!("mp3 frame decode: {e}")))?;

        let mut sample_buf = SampleBuffer::<i16>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);

        let samples = u64::from(header.samples_per_frame());
        Ok(PcmFrame {
            pcm: sample_buf.samples().to_vec(),
            format,
            duration: Duration::from_nanos(
                samples * 1_000_000_000 / u64::from(header.sample_rate),
            ),
        })
    }

    fn reset(&mut self) {
        // The bit reservoir may reference bytes we skipped; start clean.
        self.decoder = None;
        self.format = None;
    }
}

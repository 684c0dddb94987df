use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::AudioError;

/// Data path of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Playback: the application writes, the hardware reads.
    Source,
    /// Capture: the hardware writes, the application reads.
    Target,
}

impl Direction {
    pub fn from_is_source(is_source: bool) -> Self {
        if is_source {
            Self::Source
        } else {
            Self::Target
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Target => "target",
        }
    }
}

/// Sample encoding. Only linear PCM is carried by direct lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Pcm,
}

/// Fixed stream format of a line, chosen at open time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub encoding: Encoding,
    pub sample_rate: f32,
    pub sample_size_bits: u16,
    /// Bytes per frame (one sample for every channel).
    pub frame_size: u16,
    pub channels: u16,
    pub signed: bool,
    pub big_endian: bool,
}

impl StreamFormat {
    /// Signed 16-bit PCM in native byte order.
    pub fn pcm16(sample_rate: f32, channels: u16) -> Self {
        Self {
            encoding: Encoding::Pcm,
            sample_rate,
            sample_size_bits: 16,
            frame_size: channels * 2,
            channels,
            signed: true,
            big_endian: cfg!(target_endian = "big"),
        }
    }

    pub fn validate(&self) -> Result<(), AudioError> {
        if !(self.sample_rate > 0.0) {
            return Err(AudioError::FormatNotSupported(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.channels == 0 {
            return Err(AudioError::FormatNotSupported("channel count must be positive".into()));
        }
        if self.sample_size_bits == 0 || self.sample_size_bits % 8 != 0 {
            return Err(AudioError::FormatNotSupported(format!(
                "unsupported sample size: {} bits",
                self.sample_size_bits
            )));
        }
        let expected = u32::from(self.channels) * u32::from(self.sample_size_bits / 8);
        if u32::from(self.frame_size) != expected {
            return Err(AudioError::FormatNotSupported(format!(
                "frame size {} does not match {} channels of {} bits",
                self.frame_size, self.channels, self.sample_size_bits
            )));
        }
        Ok(())
    }

    pub fn frame_size(&self) -> usize {
        usize::from(self.frame_size)
    }

    pub fn bytes_per_second(&self) -> f64 {
        f64::from(self.sample_rate) * f64::from(self.frame_size)
    }

    /// Whole frames contained in `bytes`; a trailing partial frame is dropped.
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.frame_size()
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_size()
    }

    pub fn bytes_to_millis(&self, bytes: usize) -> f64 {
        bytes as f64 * 1000.0 / self.bytes_per_second()
    }

    /// Byte count covering `millis` of audio, rounded down to whole frames.
    pub fn millis_to_bytes(&self, millis: u32) -> usize {
        let frames = (f64::from(self.sample_rate) * f64::from(millis) / 1000.0) as usize;
        self.frames_to_bytes(frames)
    }
}

/// A format a device accepts, as reported by format negotiation.
///
/// `None` fields are wildcards: any sample rate, or a frame size derived
/// from channels and sample size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub sample_size_bits: u16,
    pub frame_size: Option<u16>,
    pub channels: u16,
    pub sample_rate: Option<f32>,
    pub encoding: Encoding,
    pub signed: bool,
    pub big_endian: bool,
}

impl FormatDescriptor {
    pub fn matches(&self, format: &StreamFormat) -> bool {
        self.encoding == format.encoding
            && self.sample_size_bits == format.sample_size_bits
            && self.channels == format.channels
            && self.signed == format.signed
            && self.big_endian == format.big_endian
            && self.frame_size.map_or(true, |size| size == format.frame_size)
            && self.sample_rate.map_or(true, |rate| rate == format.sample_rate)
    }
}

/// An audio device as reported by a host's enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub description: String,
    pub input_stream_count: u32,
    pub output_stream_count: u32,
    /// May actually differ between streams of the same device.
    pub channel_count: u16,
}

impl DeviceDescriptor {
    pub fn max_simultaneous_lines(&self) -> u32 {
        self.input_stream_count + self.output_stream_count
    }

    pub fn stream_count(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Source => self.output_stream_count,
            Direction::Target => self.input_stream_count,
        }
    }
}

/// Point-in-time counters for a line, for debugging glitches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineDiagnostics {
    pub session_id: Uuid,
    pub direction: Direction,
    pub opened_at: DateTime<Utc>,
    pub callback_count: u64,
    /// Playback bytes replaced by silence because the buffer ran dry.
    pub underrun_bytes: u64,
    /// Capture bytes overwritten before the application read them.
    pub overrun_bytes: u64,
    pub pull_failures: u64,
    pub flush_count: u64,
    pub buffered_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pcm16_is_valid() {
        let format = StreamFormat::pcm16(44100.0, 2);
        assert_eq!(format.frame_size(), 4);
        assert!(format.validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_frame_size() {
        let mut format = StreamFormat::pcm16(48000.0, 2);
        format.frame_size = 3;
        assert!(matches!(format.validate(), Err(AudioError::FormatNotSupported(_))));
    }

    #[test]
    fn rejects_partial_byte_samples() {
        let mut format = StreamFormat::pcm16(48000.0, 1);
        format.sample_size_bits = 12;
        assert!(format.validate().is_err());
    }

    #[test]
    fn byte_time_conversions() {
        let format = StreamFormat::pcm16(48000.0, 2);
        assert_eq!(format.millis_to_bytes(10), 480 * 4);
        assert_relative_eq!(format.bytes_to_millis(192_000), 1000.0);
        assert_eq!(format.bytes_to_frames(10), 2);
    }

    #[test]
    fn wildcard_descriptor_matches_any_rate() {
        let descriptor = FormatDescriptor {
            sample_size_bits: 16,
            frame_size: None,
            channels: 2,
            sample_rate: None,
            encoding: Encoding::Pcm,
            signed: true,
            big_endian: cfg!(target_endian = "big"),
        };
        assert!(descriptor.matches(&StreamFormat::pcm16(8000.0, 2)));
        assert!(descriptor.matches(&StreamFormat::pcm16(96000.0, 2)));
        assert!(!descriptor.matches(&StreamFormat::pcm16(96000.0, 1)));
    }

    #[test]
    fn direction_from_flag() {
        assert_eq!(Direction::from_is_source(true), Direction::Source);
        assert_eq!(Direction::from_is_source(false), Direction::Target);
        assert!(Direction::Source.is_source());
        assert_eq!(Direction::Target.label(), "target");
    }

    #[test]
    fn stream_count_follows_direction() {
        let device = DeviceDescriptor {
            id: "d".into(),
            name: "Speakers".into(),
            vendor: "Acme".into(),
            description: "Speakers".into(),
            input_stream_count: 0,
            output_stream_count: 2,
            channel_count: 2,
        };
        assert_eq!(device.stream_count(Direction::Source), 2);
        assert_eq!(device.stream_count(Direction::Target), 0);
        assert_eq!(device.max_simultaneous_lines(), 2);
    }
}

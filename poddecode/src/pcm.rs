/// Raw PCM layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
}

/// The single PCM layout produced by the decoder and accepted by playback:
/// interleaved stereo, signed 16-bit little-endian, 44.1 kHz.
pub const PCM_FORMAT: PcmFormat = PcmFormat {
    sample_rate: 44_100,
    channels: 2,
    bits_per_sample: 16,
};

impl PcmFormat {
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8).max(1)
    }

    /// Bytes for one sample on every channel.
    pub fn frame_bytes(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }

    /// Number of frames covering `duration_ms`, never zero.
    pub fn frames_for_ms(&self, duration_ms: u64) -> usize {
        ((u64::from(self.sample_rate) * duration_ms) / 1000).max(1) as usize
    }
}

/// Describes a decoded MP3 stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Layout of the PCM output, always [`PCM_FORMAT`].
    pub format: PcmFormat,
    /// Channel count of the compressed source before upmixing.
    pub source_channels: u8,
    /// Bitrate of the first frame in kbit/s.
    pub bitrate_kbps: u32,
}

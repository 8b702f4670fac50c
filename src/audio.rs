use crate::error::{ClipreelError, ClipreelResult};

/// Sample rate of speech payloads produced upstream (raw PCM at 24 kHz).
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

/// Parsed `fmt `/`data` facts of a PCM WAV buffer.
///
/// Only integer PCM is accepted; duration is derived, never trusted from the
/// container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_len: u32,
    /// Byte offset of the PCM payload within the container.
    pub data_offset: u32,
}

impl WavInfo {
    pub fn parse(bytes: &[u8]) -> ClipreelResult<Self> {
        if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
            return Err(ClipreelError::validation(
                "audio payload is not a RIFF/WAVE container",
            ));
        }

        let mut fmt: Option<(u16, u16, u32, u16)> = None;
        let mut data: Option<(u32, u32)> = None;

        let mut off = 12usize;
        while off + 8 <= bytes.len() {
            let id = &bytes[off..off + 4];
            let size = u32::from_le_bytes([
                bytes[off + 4],
                bytes[off + 5],
                bytes[off + 6],
                bytes[off + 7],
            ]) as usize;
            let body = off + 8;

            match id {
                b"fmt " => {
                    if size < 16 || body + 16 > bytes.len() {
                        return Err(ClipreelError::validation("wav fmt chunk is truncated"));
                    }
                    let format = u16::from_le_bytes([bytes[body], bytes[body + 1]]);
                    let channels = u16::from_le_bytes([bytes[body + 2], bytes[body + 3]]);
                    let sample_rate = u32::from_le_bytes([
                        bytes[body + 4],
                        bytes[body + 5],
                        bytes[body + 6],
                        bytes[body + 7],
                    ]);
                    let bits = u16::from_le_bytes([bytes[body + 14], bytes[body + 15]]);
                    fmt = Some((format, channels, sample_rate, bits));
                }
                b"data" => {
                    if body + size > bytes.len() {
                        return Err(ClipreelError::validation("wav data chunk is truncated"));
                    }
                    data = Some((body as u32, size as u32));
                }
                _ => {}
            }

            // Chunks are word-aligned.
            off = body + size + (size & 1);
        }

        let (format, channels, sample_rate, bits_per_sample) = fmt
            .ok_or_else(|| ClipreelError::validation("wav is missing its fmt chunk"))?;
        let (data_offset, data_len) =
            data.ok_or_else(|| ClipreelError::validation("wav is missing its data chunk"))?;

        if format != 1 {
            return Err(ClipreelError::validation(format!(
                "unsupported wav audio format {format} (expected integer PCM)"
            )));
        }
        if channels == 0 || sample_rate == 0 || bits_per_sample == 0 {
            return Err(ClipreelError::validation("wav fmt chunk has zero fields"));
        }
        if data_len == 0 {
            return Err(ClipreelError::validation("wav has no audio samples"));
        }

        Ok(Self {
            sample_rate,
            channels,
            bits_per_sample,
            data_len,
            data_offset,
        })
    }

    pub fn duration_sec(&self) -> f64 {
        let bytes_per_sec = f64::from(self.sample_rate)
            * f64::from(self.channels)
            * f64::from(self.bits_per_sample / 8);
        f64::from(self.data_len) / bytes_per_sec
    }
}

/// Wrap raw 16-bit mono PCM in a minimal 44-byte WAV header.
///
/// Speech payloads arrive as headerless PCM; everything downstream (duration
/// derivation, ffmpeg input, preview players) wants a container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(44 + pcm.len());
    let data_len = pcm.len() as u32;

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // integer PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}

/// Silent 16-bit mono PCM of the given duration, wrapped as WAV.
pub fn silent_wav(duration_sec: f64, sample_rate: u32) -> Vec<u8> {
    let samples = (duration_sec.max(0.0) * f64::from(sample_rate)).round() as usize;
    pcm_to_wav(&vec![0u8; samples * 2], sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_wrap_then_parse_recovers_duration() {
        // One second of 24 kHz mono s16.
        let pcm = vec![0u8; SPEECH_SAMPLE_RATE as usize * 2];
        let wav = pcm_to_wav(&pcm, SPEECH_SAMPLE_RATE);

        let info = WavInfo::parse(&wav).unwrap();
        assert_eq!(info.sample_rate, SPEECH_SAMPLE_RATE);
        assert_eq!(info.channels, 1);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.data_offset, 44);
        assert_eq!(info.data_len as usize, pcm.len());
        assert!((info.duration_sec() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn silent_wav_duration_is_exact() {
        let wav = silent_wav(2.5, SPEECH_SAMPLE_RATE);
        let info = WavInfo::parse(&wav).unwrap();
        assert!((info.duration_sec() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn rejects_non_wav_and_empty_data() {
        assert!(WavInfo::parse(b"not a wav").is_err());
        assert!(WavInfo::parse(&pcm_to_wav(&[], SPEECH_SAMPLE_RATE)).is_err());
    }

    #[test]
    fn rejects_truncated_data_chunk() {
        let mut wav = pcm_to_wav(&[0u8; 100], SPEECH_SAMPLE_RATE);
        wav.truncate(wav.len() - 10);
        assert!(WavInfo::parse(&wav).is_err());
    }

    #[test]
    fn rejects_float_pcm() {
        let mut wav = pcm_to_wav(&[0u8; 4], SPEECH_SAMPLE_RATE);
        // Flip the audio format field to IEEE float.
        wav[20] = 3;
        assert!(WavInfo::parse(&wav).is_err());
    }
}

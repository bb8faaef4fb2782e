//! Audio transcoding between the telephony leg and the model leg.
//!
//! The telephony provider speaks G.711 µ-law at 8 kHz; the speech model takes
//! 16-bit linear PCM at 16 kHz and emits it at 24 kHz. Both directions are
//! stateless per-frame transforms, so the two legs can call them from their
//! own loops without any shared buffer.

use thiserror::Error;

/// Per-frame transcoding errors. The owning leg logs these and discards the
/// frame; they never terminate a call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("invalid audio frame: {0}")]
    InvalidFrame(&'static str),
}

/// µ-law bias in the 16-bit sample domain (the classic 33, scaled by the
/// 2-bit headroom of the 14-bit code domain).
const BIAS: i32 = 0x84;
const CLIP: i32 = 0x7FFF;

/// Expand one µ-law code to a linear 16-bit sample.
pub fn mulaw_expand(code: u8) -> i16 {
    let code = !code;
    let sign = code & 0x80;
    let exponent = (code >> 4) & 0x07;
    let mantissa = (code & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -(magnitude as i16)
    } else {
        magnitude as i16
    }
}

/// Compress one linear 16-bit sample to a µ-law code.
pub fn mulaw_compress(sample: i16) -> u8 {
    let mut value = i32::from(sample);

    let sign: u8 = if value < 0 {
        // i16::MIN has no positive counterpart; pin it to i16::MAX first.
        value = if sample == i16::MIN {
            i32::from(i16::MAX)
        } else {
            -value
        };
        0x80
    } else {
        0
    };

    value += BIAS;
    if value > CLIP {
        value = CLIP;
    }

    let mut exponent: u8 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((value >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Convert a µ-law frame at 8 kHz into 16-bit little-endian PCM at 16 kHz.
///
/// Upsampling is 2x linear interpolation: even output samples are the inputs,
/// odd output samples the integer mean of successive inputs. The final sample
/// is held rather than extrapolated.
pub fn telephony_to_model(frame: &[u8]) -> Result<Vec<u8>, AudioError> {
    if frame.is_empty() {
        return Err(AudioError::InvalidFrame("empty frame"));
    }

    let samples: Vec<i16> = frame.iter().map(|&b| mulaw_expand(b)).collect();

    let mut out = Vec::with_capacity(samples.len() * 4);
    for (i, &sample) in samples.iter().enumerate() {
        out.extend_from_slice(&sample.to_le_bytes());
        let next = samples.get(i + 1).copied().unwrap_or(sample);
        let mid = ((i32::from(sample) + i32::from(next)) / 2) as i16;
        out.extend_from_slice(&mid.to_le_bytes());
    }

    Ok(out)
}

/// Convert 16-bit little-endian PCM at 24 kHz into a µ-law frame at 8 kHz.
///
/// Decimation is 3:1 with a uniform box filter over each non-overlapping
/// window of three samples, which doubles as the anti-alias pre-filter for
/// the 8 kHz target.
pub fn model_to_telephony(frame: &[u8]) -> Result<Vec<u8>, AudioError> {
    if frame.is_empty() {
        return Err(AudioError::InvalidFrame("empty frame"));
    }
    if frame.len() % 2 != 0 {
        return Err(AudioError::InvalidFrame("odd PCM byte length"));
    }

    let samples: Vec<i16> = frame
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    let mut out = Vec::with_capacity(samples.len() / 3 + 1);
    for window in samples.chunks(3) {
        let sum: i32 = window.iter().map(|&s| i32::from(s)).sum();
        let mean = (sum / window.len() as i32) as i16;
        out.push(mulaw_compress(mean));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(sample_rate: u32, freq: f64, amplitude: f64, len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_empty_frames_rejected() {
        assert_eq!(
            telephony_to_model(&[]),
            Err(AudioError::InvalidFrame("empty frame"))
        );
        assert_eq!(
            model_to_telephony(&[]),
            Err(AudioError::InvalidFrame("empty frame"))
        );
    }

    #[test]
    fn test_odd_pcm_length_rejected() {
        assert_eq!(
            model_to_telephony(&[0x00, 0x01, 0x02]),
            Err(AudioError::InvalidFrame("odd PCM byte length"))
        );
    }

    #[test]
    fn test_upsample_doubles_sample_count() {
        let frame = vec![0xFFu8; 160]; // 20ms at 8kHz
        let pcm = telephony_to_model(&frame).unwrap();
        assert_eq!(pcm.len(), 160 * 2 * 2); // 320 samples, 2 bytes each
    }

    #[test]
    fn test_downsample_thirds_sample_count() {
        let samples = vec![0i16; 480]; // 20ms at 24kHz
        let mulaw = model_to_telephony(&pcm_bytes(&samples)).unwrap();
        assert_eq!(mulaw.len(), 160);
    }

    #[test]
    fn test_downsample_partial_tail_window() {
        let samples = vec![100i16; 7];
        let mulaw = model_to_telephony(&pcm_bytes(&samples)).unwrap();
        assert_eq!(mulaw.len(), 3);
    }

    #[test]
    fn test_zero_round_trips() {
        assert_eq!(mulaw_compress(0), 0xFF);
        assert_eq!(mulaw_expand(0xFF), 0);
    }

    #[test]
    fn test_int16_min_produces_valid_code() {
        let code = mulaw_compress(i16::MIN);
        assert_eq!(code, 0x00); // maximum-magnitude negative code
        let decoded = mulaw_expand(code);
        assert!(decoded < -30_000);
    }

    #[test]
    fn test_code_book_is_its_own_inverse() {
        // Expanding a code and re-compressing it must land on a code that
        // expands to the same sample, for all 256 codes.
        for code in 0..=255u8 {
            let sample = mulaw_expand(code);
            let recoded = mulaw_compress(sample);
            assert_eq!(
                mulaw_expand(recoded),
                sample,
                "code {code:#04x} drifted through expand/compress"
            );
        }
    }

    #[test]
    fn test_decode_reencode_is_stable() {
        // A decoded-then-reencoded µ-law stream upsamples identically to the
        // original stream.
        let original: Vec<u8> = sine(8000, 440.0, 9000.0, 160)
            .iter()
            .map(|&s| mulaw_compress(s))
            .collect();
        let reencoded: Vec<u8> = original
            .iter()
            .map(|&c| mulaw_compress(mulaw_expand(c)))
            .collect();
        assert_eq!(
            telephony_to_model(&original).unwrap(),
            telephony_to_model(&reencoded).unwrap()
        );
    }

    #[test]
    fn test_downsample_tracks_speech_band_signal() {
        // Model output at 24kHz, box-filtered down to 8kHz, should stay within
        // ~2 µ-law codes RMS of directly encoding the same signal at 8kHz.
        // The box filter's output for window k is centered on sample 3k+1, so
        // the reference is the 8kHz grid shifted by one 24kHz sample.
        let wide = sine(24000, 440.0, 8000.0, 480);
        let got = model_to_telephony(&pcm_bytes(&wide)).unwrap();

        let reference: Vec<u8> = (0..160)
            .map(|k| {
                let t = (3 * k + 1) as f64 / 24000.0;
                let s = (8000.0 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()) as i16;
                mulaw_compress(s)
            })
            .collect();

        let sq_sum: f64 = got
            .iter()
            .zip(reference.iter())
            .map(|(&a, &b)| {
                let d = f64::from(a) - f64::from(b);
                d * d
            })
            .sum();
        let rms = (sq_sum / got.len() as f64).sqrt();
        assert!(rms <= 2.0, "RMS code error {rms} exceeds tolerance");
    }

    #[test]
    fn test_upsample_interpolates_midpoints() {
        let frame = vec![mulaw_compress(0), mulaw_compress(1000)];
        let pcm = telephony_to_model(&frame).unwrap();
        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        assert_eq!(samples.len(), 4);
        let a = mulaw_expand(mulaw_compress(0));
        let b = mulaw_expand(mulaw_compress(1000));
        assert_eq!(samples[0], a);
        assert_eq!(samples[1], ((i32::from(a) + i32::from(b)) / 2) as i16);
        assert_eq!(samples[2], b);
        assert_eq!(samples[3], b); // final sample held
    }
}

//! 16-bit PCM boundary helpers.
//!
//! The codec layer decodes to little-endian signed 16-bit PCM; these helpers
//! turn that into float blocks for the pipeline and back again.

use crate::error::{EngineError, EngineResult};
use byteorder::{ByteOrder, LittleEndian};

const PCM_SCALE: f32 = 32768.0;

/// Decode little-endian 16-bit PCM bytes into samples in `[-1.0, 1.0)`.
pub fn decode_i16_le(data: &[u8]) -> EngineResult<Vec<f32>> {
    validate_i16_le(data)?;

    let mut samples = vec![0i16; data.len() / 2];
    LittleEndian::read_i16_into(data, &mut samples);
    Ok(pcm_to_float(&samples))
}

/// Encode float samples as little-endian 16-bit PCM, clamping out-of-range values.
pub fn encode_i16_le(samples: &[f32]) -> Vec<u8> {
    let pcm = float_to_pcm(samples);
    let mut data = vec![0u8; pcm.len() * 2];
    LittleEndian::write_i16_into(&pcm, &mut data);
    data
}

pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / PCM_SCALE).collect()
}

pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let scaled = s * PCM_SCALE;
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

fn validate_i16_le(data: &[u8]) -> EngineResult<()> {
    if data.is_empty() {
        return Err(EngineError::Codec("PCM data is empty".to_string()));
    }
    if data.len() % 2 != 0 {
        return Err(EngineError::Codec(format!(
            "PCM data length {} is not a whole number of 16-bit samples",
            data.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_conversion() {
        let pcm_samples = vec![0i16, 16384, -16384, 32767, -32768];
        let float_samples = pcm_to_float(&pcm_samples);

        assert_eq!(float_samples[0], 0.0);
        assert_eq!(float_samples[1], 0.5);
        assert_eq!(float_samples[2], -0.5);
        assert_eq!(float_samples[4], -1.0);

        let back = float_to_pcm(&float_samples);
        assert_eq!(back, pcm_samples);
    }

    #[test]
    fn test_float_to_pcm_clamps() {
        assert_eq!(float_to_pcm(&[1.5, -2.0, 1.0]), vec![32767, -32768, 32767]);
    }

    #[test]
    fn test_decode_little_endian_bytes() {
        let data = [0x00, 0x40, 0x00, 0xC0];
        assert_eq!(decode_i16_le(&data).unwrap(), vec![0.5, -0.5]);
        assert_eq!(encode_i16_le(&[0.5, -0.5]), data.to_vec());
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        assert!(matches!(decode_i16_le(&[]), Err(EngineError::Codec(_))));
        assert!(matches!(decode_i16_le(&[0x00, 0x40, 0x01]), Err(EngineError::Codec(_))));
    }
}

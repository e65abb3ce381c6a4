//! # DSP Stages
//!
//! The individual in-place stages of the processing chain. They run in a
//! fixed order (noise suppression → echo cancellation → gain normalization →
//! resample) and each consumes the previous stage's output.
//!
//! All loops are bounded by the shorter of the block and the state array, so
//! a short block never indexes out of bounds and a long block never grows
//! the adaptive state.

/// Over-subtraction factor for noise suppression
pub const NOISE_OVER_SUBTRACTION: f32 = 1.5;

/// Spectral floor: a sample is never attenuated below this fraction of itself
pub const NOISE_FLOOR: f32 = 0.01;

/// NLMS step size
pub const ECHO_STEP_SIZE: f32 = 0.1;

/// Regularizer that keeps the NLMS update finite on silent input
pub const ECHO_EPSILON: f32 = 1e-6;

/// Peak level the normalizer scales towards
pub const TARGET_LEVEL: f32 = 0.8;

/// Below this peak the block is treated as silence and left alone
pub const SILENCE_THRESHOLD: f32 = 0.001;

/// Time-domain approximation of spectral subtraction.
///
/// Each sample's magnitude is reduced by `α·n`, where `n` is the noise
/// reference at the same position (cyclic over the profile), and floored at
/// `β·|sample|`. The sign is restored afterwards. This is a per-sample
/// magnitude floor against a reference array, not a frequency-domain method.
pub fn suppress_noise(block: &mut [f32], noise_profile: &[f32]) {
    if noise_profile.is_empty() {
        return;
    }

    for (i, sample) in block.iter_mut().enumerate() {
        let noise = noise_profile[i % noise_profile.len()];
        let magnitude = sample.abs();
        let suppressed = (magnitude - NOISE_OVER_SUBTRACTION * noise).max(NOISE_FLOOR * magnitude);
        *sample = if *sample >= 0.0 { suppressed } else { -suppressed };
    }
}

/// Normalized LMS echo cancellation.
///
/// Position `i` of the block is paired with position `i` of the echo
/// estimate, so each position behaves as an independent single-tap filter
/// rather than a convolution over a delay line. The estimate is subtracted,
/// the residual becomes the output, and the estimate moves toward the input
/// by `μ / (x² + ε) · e · x`.
pub fn cancel_echo(block: &mut [f32], echo_reference: &mut [f32]) {
    for (sample, echo) in block.iter_mut().zip(echo_reference.iter_mut()) {
        let input = *sample;
        let error = input - *echo;
        let power = input * input + ECHO_EPSILON;
        *echo += (ECHO_STEP_SIZE / power) * error * input;
        *sample = error;
    }
}

/// Peak-based automatic gain control.
///
/// Scales the block so its peak lands on [`TARGET_LEVEL`]. Blocks whose peak
/// does not exceed [`SILENCE_THRESHOLD`] are left unchanged. Returns the peak
/// measured before scaling.
pub fn normalize_gain(block: &mut [f32]) -> f32 {
    let peak = peak_level(block);

    if peak > SILENCE_THRESHOLD {
        let gain = TARGET_LEVEL / peak;
        for sample in block.iter_mut() {
            *sample *= gain;
        }
    }

    peak
}

/// Multiply every sample by a linear gain.
pub fn apply_gain(block: &mut [f32], gain: f32) {
    for sample in block.iter_mut() {
        *sample *= gain;
    }
}

/// Hard-limit every sample to the full-scale range [-1.0, 1.0].
pub fn clamp(block: &mut [f32]) {
    for sample in block.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

/// Convert a level in decibels to a linear factor.
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Rate conversion slot. Input is assumed to already be at the configured
/// rate, so this passes samples through untouched.
pub fn resample(_block: &mut [f32], _from_rate: u32, _to_rate: u32) {}

/// Largest absolute sample value (0 for an empty block).
pub fn peak_level(block: &[f32]) -> f32 {
    block.iter().fold(0.0_f32, |peak, s| peak.max(s.abs()))
}

/// Mean absolute sample value (0 for an empty block).
pub fn average_level(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f64 = block.iter().map(|s| s.abs() as f64).sum();
    (sum / block.len() as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_suppression_with_zero_profile_is_identity() {
        let mut block = vec![0.5, -0.25, 0.0, 1.0];
        suppress_noise(&mut block, &[0.0; 512]);
        assert_eq!(block, vec![0.5, -0.25, 0.0, 1.0]);
    }

    #[test]
    fn test_noise_suppression_subtracts_and_floors() {
        let mut block = vec![0.5, -0.5, 0.01];
        suppress_noise(&mut block, &[0.1]);
        // 0.5 - 1.5 * 0.1 = 0.35, sign restored
        assert!((block[0] - 0.35).abs() < 1e-6);
        assert!((block[1] + 0.35).abs() < 1e-6);
        // 0.01 - 0.15 < 0, floored at 0.01 * 0.01
        assert!((block[2] - 0.0001).abs() < 1e-9);
    }

    #[test]
    fn test_noise_profile_is_cyclic() {
        let mut block = vec![1.0; 4];
        suppress_noise(&mut block, &[0.0, 0.2]);
        assert_eq!(block[0], 1.0);
        assert!((block[1] - 0.7).abs() < 1e-6);
        assert_eq!(block[2], 1.0);
        assert!((block[3] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_echo_cancellation_update_rule() {
        let mut block = vec![0.5];
        let mut reference = vec![0.1];
        cancel_echo(&mut block, &mut reference);

        let error = 0.5 - 0.1;
        let expected_update = 0.1 + (0.1 / (0.25 + 1e-6)) * error * 0.5;
        assert!((block[0] - error).abs() < 1e-6);
        assert!((reference[0] - expected_update).abs() < 1e-5);
    }

    #[test]
    fn test_echo_cancellation_bounded_by_reference_length() {
        let mut block = vec![0.5; 8];
        let mut reference = vec![0.0; 4];
        cancel_echo(&mut block, &mut reference);
        // Samples past the reference length pass through untouched.
        assert_eq!(&block[4..], &[0.5; 4]);
        assert!(reference.iter().all(|r| *r > 0.0));

        let mut short = vec![0.5; 2];
        let mut long_reference = vec![0.0; 4096];
        cancel_echo(&mut short, &mut long_reference);
        assert_eq!(&long_reference[2..10], &[0.0; 8]);
    }

    #[test]
    fn test_echo_cancellation_on_silence_stays_finite() {
        let mut block = vec![0.0; 16];
        let mut reference = vec![0.0; 16];
        cancel_echo(&mut block, &mut reference);
        assert!(block.iter().all(|s| *s == 0.0));
        assert!(reference.iter().all(|r| r.is_finite()));
    }

    #[test]
    fn test_normalization_scales_to_target() {
        let mut block = vec![0.25, -0.5, 0.1];
        let peak = normalize_gain(&mut block);
        assert_eq!(peak, 0.5);
        assert!((block[1] + 0.8).abs() < 1e-6);
        assert!((block[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_normalization_is_identity_at_target_level() {
        let original = vec![0.8, -0.3, 0.5, -0.8, 0.0];
        let mut block = original.clone();
        let peak = normalize_gain(&mut block);
        assert_eq!(peak, 0.8);
        assert_eq!(block, original);
    }

    #[test]
    fn test_normalization_leaves_near_silence_alone() {
        let mut block = vec![0.0005, -0.001];
        let peak = normalize_gain(&mut block);
        assert_eq!(peak, 0.001);
        assert_eq!(block, vec![0.0005, -0.001]);
    }

    #[test]
    fn test_clamp_limits_to_full_scale() {
        let mut block = vec![1.6, -2.0, 0.3, -0.999];
        clamp(&mut block);
        assert_eq!(block, vec![1.0, -1.0, 0.3, -0.999]);
    }

    #[test]
    fn test_levels_and_gain_helpers() {
        assert_eq!(peak_level(&[]), 0.0);
        assert_eq!(average_level(&[]), 0.0);
        assert!((average_level(&[0.5, -0.5, 0.0, 1.0]) - 0.5).abs() < 1e-6);
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-20.0) - 0.1).abs() < 1e-6);

        let mut block = vec![0.5, -0.5];
        apply_gain(&mut block, 0.5);
        assert_eq!(block, vec![0.25, -0.25]);
    }
}

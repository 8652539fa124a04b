//! Perceptual volume curves.
//!
//! Human loudness perception roughly doubles for every 10 dB of gain, so the
//! conversion between the decibel domain used by PCM clients and the linear
//! loudness domain used for Bluetooth volume scaling is a base-two
//! exponential.

/// Converts a gain in decibels into a linear loudness value.
pub fn decibel_to_loudness(decibel: f64) -> f64 {
    (decibel / 10.0).exp2()
}

/// Converts a linear loudness value into a gain in decibels.
pub fn loudness_to_decibel(loudness: f64) -> f64 {
    10.0 * loudness.log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity() {
        assert_eq!(decibel_to_loudness(0.0), 1.0);
        assert_eq!(loudness_to_decibel(1.0), 0.0);
    }

    #[test]
    fn ten_decibels_doubles_loudness() {
        assert_eq!(decibel_to_loudness(10.0), 2.0);
        assert_eq!(decibel_to_loudness(-10.0), 0.5);
    }

    #[test]
    fn round_trip() {
        for db in [-96.0, -42.5, -3.0, 0.0, 7.25, 96.0] {
            assert!((loudness_to_decibel(decibel_to_loudness(db)) - db).abs() < 1e-9);
        }
    }
}

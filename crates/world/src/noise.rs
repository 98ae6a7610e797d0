//! Closed-form noise used for terrain height and biome zoning.
//!
//! The field is position-keyed rather than seed-keyed: every octave is a fixed
//! trigonometric combination of the input coordinates, so sampling needs no
//! permutation tables and no persisted state.

use serde::{Deserialize, Serialize};

/// Number of trig terms in one octave basis.
const BASIS_TERMS: usize = 4;

/// Weights of the basis terms. They sum to 1.0 so a single octave stays in [-1, 1].
const BASIS_WEIGHTS: [f64; 3] = [0.5, 0.3, 0.2];

/// Per-octave phase drift so successive octaves do not line up on the same ridges.
const OCTAVE_PHASE_DRIFT: f64 = 1.7;

/// Configuration for multi-octave noise generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Number of octaves (layers of detail)
    pub octaves: u32,
    /// Frequency multiplier between octaves
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves (persistence)
    pub persistence: f64,
    /// Base frequency (scale)
    pub frequency: f64,
    /// Per-term angular rates of the basis.
    pub rates: [f64; BASIS_TERMS],
    /// Per-term phase offsets of the basis.
    pub phases: [f64; BASIS_TERMS],
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self::height()
    }
}

impl NoiseConfig {
    /// Terrain height field.
    pub fn height() -> Self {
        Self {
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
            frequency: 1.0,
            rates: [1.0, 1.3, 0.7, 0.9],
            phases: [0.0, 1.1, 2.3, 0.4],
        }
    }

    /// Biome zoning field. Shares no rate or phase with [`NoiseConfig::height`].
    pub fn biome() -> Self {
        Self {
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
            frequency: 1.0,
            rates: [0.83, 1.17, 0.61, 1.41],
            phases: [3.7, 5.3, 0.9, 4.4],
        }
    }
}

/// Stateless multi-octave noise field.
#[derive(Debug, Clone)]
pub struct NoiseField {
    config: NoiseConfig,
}

impl NoiseField {
    /// Create a new noise field with the given configuration.
    pub fn new(config: NoiseConfig) -> Self {
        Self { config }
    }

    /// Sum of `octaves` basis layers, normalized by the accumulated amplitude
    /// into [-1.0, 1.0].
    pub fn sample_2d(&self, x: f64, z: f64) -> f64 {
        let mut value = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = self.config.frequency;
        let mut max_value = 0.0;

        for octave in 0..self.config.octaves {
            let drift = octave as f64 * OCTAVE_PHASE_DRIFT;
            value += self.basis(x * frequency, z * frequency, drift) * amplitude;
            max_value += amplitude;

            amplitude *= self.config.persistence;
            frequency *= self.config.lacunarity;
        }

        if max_value == 0.0 {
            return 0.0;
        }

        value / max_value
    }

    fn basis(&self, x: f64, z: f64, drift: f64) -> f64 {
        let [a, b, c, d] = self.config.rates;
        let [p, q, r, s] = self.config.phases;
        let [w0, w1, w2] = BASIS_WEIGHTS;

        w0 * (x * a + p + drift).sin() * (z * b + q - drift).cos()
            + w1 * ((x + z) * c + r + drift).sin()
            + w2 * ((x - z) * d + s - drift).cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_determinism() {
        let gen1 = NoiseField::new(NoiseConfig::height());
        let gen2 = NoiseField::new(NoiseConfig::height());

        for x in 0..10 {
            for z in 0..10 {
                let val1 = gen1.sample_2d(x as f64 * 0.37, z as f64 * 0.37);
                let val2 = gen2.sample_2d(x as f64 * 0.37, z as f64 * 0.37);
                assert_eq!(val1, val2, "Noise not deterministic at ({}, {})", x, z);
            }
        }
    }

    #[test]
    fn test_noise_range() {
        let gen = NoiseField::new(NoiseConfig::default());

        for x in -50..50 {
            for z in -50..50 {
                let val = gen.sample_2d(x as f64 * 0.1, z as f64 * 0.1);
                assert!(
                    (-1.0..=1.0).contains(&val),
                    "Noise value {} out of range at ({}, {})",
                    val,
                    x,
                    z
                );
            }
        }
    }

    #[test]
    fn test_height_and_biome_fields_are_uncorrelated() {
        let height = NoiseField::new(NoiseConfig::height());
        let biome = NoiseField::new(NoiseConfig::biome());

        let mut sum_hb = 0.0;
        let mut sum_hh = 0.0;
        let mut sum_bb = 0.0;
        for x in 0..40 {
            for z in 0..40 {
                let (fx, fz) = (x as f64 * 0.31, z as f64 * 0.29);
                let h = height.sample_2d(fx, fz);
                let b = biome.sample_2d(fx, fz);
                sum_hb += h * b;
                sum_hh += h * h;
                sum_bb += b * b;
            }
        }
        let correlation = sum_hb / (sum_hh.sqrt() * sum_bb.sqrt());
        assert!(
            correlation.abs() < 0.5,
            "height and biome noise too correlated: {}",
            correlation
        );
    }

    #[test]
    fn test_zero_octaves_yields_flat_field() {
        let gen = NoiseField::new(NoiseConfig {
            octaves: 0,
            ..NoiseConfig::height()
        });
        assert_eq!(gen.sample_2d(3.0, 4.0), 0.0);
    }

    #[test]
    fn test_noise_is_continuous() {
        let gen = NoiseField::new(NoiseConfig::height());
        let a = gen.sample_2d(10.0, 10.0);
        let b = gen.sample_2d(10.001, 10.0);
        assert!((a - b).abs() < 0.05);
    }
}

//! Deterministic height field and lattice hash.
//!
//! Terrain heights are fractal Brownian motion over seeded Perlin noise: every
//! octave doubles the frequency and halves the amplitude, and the sum is divided
//! by the total amplitude so results stay in `[-1, 1]` for any octave count.

use ::noise::{NoiseFn, Perlin};

use crate::registry::NoiseParams;

/// Seeded 2-D height source shared by the mesh builder and the compositor.
#[derive(Clone, Debug)]
pub struct HeightField {
    seed: u32,
    source: Perlin,
}

impl HeightField {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            source: Perlin::new(seed),
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Single octave of raw noise at noise-space coordinates.
    pub fn sample(&self, x: f32, z: f32) -> f32 {
        self.source.get([x as f64, z as f64]) as f32
    }

    /// Normalized multi-octave height in `[-1, 1]` at grid coordinates.
    pub fn height(&self, x: f32, z: f32, params: &NoiseParams) -> f32 {
        let mut total = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut norm = 0.0;

        for _ in 0..params.octaves.max(1) {
            total += self.sample(x * params.scale * frequency, z * params.scale * frequency) * amplitude;
            norm += amplitude;
            amplitude *= 0.5;
            frequency *= 2.0;
        }

        (total / norm).clamp(-1.0, 1.0)
    }

    /// Stateless lattice hash in `[0, 1)`, seeded like the height source.
    pub fn hash(&self, x: i32, y: i32) -> f32 {
        hash2(x, y, self.seed)
    }
}

impl Default for HeightField {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Integer avalanche hash of a lattice point mapped to `[0, 1)`.
pub fn hash2(x: i32, y: i32, seed: u32) -> f32 {
    let mut h = (x as u32).wrapping_mul(0x8da6_b343)
        ^ (y as u32).wrapping_mul(0xd816_3841)
        ^ seed.wrapping_mul(0xcb1a_b31f);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    (h >> 8) as f32 / (1u32 << 24) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NoiseParams {
        NoiseParams {
            scale: 0.08,
            amplitude: 4.0,
            octaves: 4,
        }
    }

    #[test]
    fn heights_are_reproducible() {
        let a = HeightField::new(42);
        let b = HeightField::new(42);
        assert_eq!(a.height(3.0, 7.0, &params()), a.height(3.0, 7.0, &params()));
        assert_eq!(a.height(3.0, 7.0, &params()), b.height(3.0, 7.0, &params()));
    }

    #[test]
    fn heights_stay_in_range() {
        let field = HeightField::new(7);
        let params = NoiseParams {
            octaves: 8,
            ..params()
        };
        for x in -50..50 {
            for z in -50..50 {
                let h = field.height(x as f32 * 0.37, z as f32 * 1.3, &params);
                assert!((-1.0..=1.0).contains(&h), "height {h} out of range at ({x}, {z})");
            }
        }
    }

    #[test]
    fn heights_are_continuous_across_cells() {
        let field = HeightField::new(3);
        let params = params();
        let step = 1e-3;
        for x in 0..20 {
            let edge = x as f32;
            let left = field.height(edge - step, 5.0, &params);
            let right = field.height(edge + step, 5.0, &params);
            assert!((left - right).abs() < 0.01);
        }
    }

    #[test]
    fn different_seeds_differ() {
        let a = HeightField::new(1);
        let b = HeightField::new(2);
        let differs = (0..16).any(|i| {
            let x = i as f32 * 3.3 + 0.5;
            a.height(x, x * 0.7, &params()) != b.height(x, x * 0.7, &params())
        });
        assert!(differs);
    }

    #[test]
    fn hash_is_unit_interval() {
        for x in -20..20 {
            for y in -20..20 {
                let h = hash2(x, y, 99);
                assert!((0.0..1.0).contains(&h));
                assert_eq!(h, hash2(x, y, 99));
            }
        }
    }
}

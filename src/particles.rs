//! Fixed capacity precipitation and ember particles.
//!
//! A [`ParticleField`] allocates exactly `spec.count` particles once and never
//! grows or shrinks afterwards. Particles that leave the [`SpawnVolume`] on the
//! side they travel towards are recycled at the opposite side with a fresh
//! random horizontal position, so the field looks endless at a constant cost.

use cgmath::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{error::ConfigError, registry::ParticleSpec};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpawnVolume {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl SpawnVolume {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// Every axis must span a finite, non-empty range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for axis in 0..3 {
            let (min, max) = (self.min[axis], self.max[axis]);
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(ConfigError::invalid(
                    "particle volume",
                    "bounds",
                    format!("axis {axis} spans {min}..{max}"),
                ));
            }
        }
        Ok(())
    }

    pub fn contains(&self, p: Vector3<f32>) -> bool {
        (self.min[0]..=self.max[0]).contains(&p.x)
            && (self.min[1]..=self.max[1]).contains(&p.y)
            && (self.min[2]..=self.max[2]).contains(&p.z)
    }
}

impl Default for SpawnVolume {
    /// The sky in front of the tent: 40 x 40 units, from just below the ground up to 30.
    fn default() -> Self {
        Self {
            min: [-20.0, -2.0, -20.0],
            max: [20.0, 30.0, 20.0],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub position: Vector3<f32>,
    /// Units per second along -y.
    pub fall_speed: f32,
    /// Sideways velocity on x and z.
    pub drift: [f32; 2],
}

pub struct ParticleField {
    particles: Box<[Particle]>,
    spec: ParticleSpec,
    volume: SpawnVolume,
    rng: ChaCha8Rng,
    respawns: u64,
}

fn wrap(value: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span <= 0.0 {
        return min;
    }
    min + (value - min).rem_euclid(span)
}

impl ParticleField {
    /// Allocate `spec.count` particles spread over the upper part of `volume`.
    pub fn spawn(spec: &ParticleSpec, volume: SpawnVolume, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let [min_x, min_y, min_z] = volume.min;
        let [max_x, max_y, max_z] = volume.max;
        let floor = if spec.fall_speed >= 0.0 {
            min_y + (max_y - min_y) * 0.375
        } else {
            min_y
        };
        let ceiling = if spec.fall_speed >= 0.0 {
            max_y
        } else {
            min_y + (max_y - min_y) * 0.625
        };

        let particles = (0..spec.count)
            .map(|_| Particle {
                position: Vector3::new(
                    rng.gen_range(min_x..=max_x),
                    rng.gen_range(floor..=ceiling),
                    rng.gen_range(min_z..=max_z),
                ),
                fall_speed: spec.fall_speed * rng.gen_range(0.8..=1.2),
                drift: [
                    rng.gen_range(-1.0..=1.0) * spec.drift,
                    rng.gen_range(-1.0..=1.0) * spec.drift,
                ],
            })
            .collect();

        Self {
            particles,
            spec: *spec,
            volume,
            rng,
            respawns: 0,
        }
    }

    /// Advance every particle by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        if !(dt > 0.0) {
            return;
        }
        let [min_x, min_y, min_z] = self.volume.min;
        let [max_x, max_y, max_z] = self.volume.max;

        for particle in self.particles.iter_mut() {
            particle.position.y -= particle.fall_speed * dt;
            particle.position.x = wrap(particle.position.x + particle.drift[0] * dt, min_x, max_x);
            particle.position.z = wrap(particle.position.z + particle.drift[1] * dt, min_z, max_z);

            let respawn_y = if particle.fall_speed >= 0.0 && particle.position.y < min_y {
                Some(max_y)
            } else if particle.fall_speed < 0.0 && particle.position.y > max_y {
                Some(min_y)
            } else {
                None
            };
            if let Some(y) = respawn_y {
                particle.position = Vector3::new(
                    self.rng.gen_range(min_x..=max_x),
                    y,
                    self.rng.gen_range(min_z..=max_z),
                );
                self.respawns += 1;
            }
        }
    }

    /// Release the buffer. The field stays usable but empty.
    pub fn dispose(&mut self) {
        self.particles = Box::new([]);
    }

    pub fn is_disposed(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.spec.count
    }

    pub fn spec(&self) -> &ParticleSpec {
        &self.spec
    }

    pub fn volume(&self) -> &SpawnVolume {
        &self.volume
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn positions(&self) -> impl Iterator<Item = Vector3<f32>> + '_ {
        self.particles.iter().map(|p| p.position)
    }

    /// How many particles were recycled so far.
    pub fn respawns(&self) -> u64 {
        self.respawns
    }
}

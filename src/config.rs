//! Engine configuration.
//!
//! [`EngineConfig`] bundles everything the environment needs besides the
//! preset registry. `EngineConfig::default()` is a complete configuration; the
//! `with_*` methods adjust single fields.

use std::time::Duration;

use crate::{
    error::ConfigError,
    particles::SpawnVolume,
    registry::{StyleMode, WeatherKind},
};

/// Random event triggering while nobody asks for events.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AmbientEvents {
    /// Minimum time between two automatically started events.
    pub quiet_period: Duration,
    /// Chance per roll of starting an event once the quiet period is over.
    pub chance: f32,
    pub roll_interval: Duration,
}

impl Default for AmbientEvents {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_secs(20),
            chance: 0.1,
            roll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Seeds the height field and every random generator of the engine.
    pub seed: u64,
    /// Output size in pixels, used for the aspect ratio and compositor resolution.
    pub viewport: [u32; 2],
    /// Edge length in pixels of one block of the voxelized style filter.
    pub voxel_pixel_size: f32,
    pub particle_volume: SpawnVolume,
    /// Fixed interval at which the lightning chance of a storm is rolled.
    pub lightning_interval: Duration,
    pub ambient_events: Option<AmbientEvents>,
    /// Size of the generated fallback sky.
    pub sky_resolution: [u32; 2],
    pub initial_weather: WeatherKind,
    pub initial_style: StyleMode,
    /// Whether the campfire in front of the tent is lit.
    pub campfire: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0x7e47,
            viewport: [1280, 720],
            voxel_pixel_size: 8.0,
            particle_volume: SpawnVolume::default(),
            lightning_interval: Duration::from_micros(16_667),
            ambient_events: Some(AmbientEvents::default()),
            sky_resolution: [512, 256],
            initial_weather: WeatherKind::Clear,
            initial_style: StyleMode::Smooth,
            campfire: true,
        }
    }
}

impl EngineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = [width.max(1), height.max(1)];
        self
    }

    pub fn with_style(mut self, style: StyleMode) -> Self {
        self.initial_style = style;
        self
    }

    pub fn with_weather(mut self, weather: WeatherKind) -> Self {
        self.initial_weather = weather;
        self
    }

    pub fn with_ambient_events(mut self, ambient: Option<AmbientEvents>) -> Self {
        self.ambient_events = ambient;
        self
    }

    pub fn with_campfire(mut self, lit: bool) -> Self {
        self.campfire = lit;
        self
    }

    pub fn with_sky_resolution(mut self, width: u32, height: u32) -> Self {
        self.sky_resolution = [width.max(1), height.max(1)];
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.particle_volume.validate()?;
        if !(self.voxel_pixel_size >= 1.0) {
            return Err(ConfigError::invalid("engine", "voxel_pixel_size", "must be at least one pixel"));
        }
        if self.lightning_interval.is_zero() {
            return Err(ConfigError::invalid("engine", "lightning_interval", "must not be zero"));
        }
        if self.ambient_events.is_some_and(|ambient| ambient.roll_interval.is_zero()) {
            return Err(ConfigError::invalid("engine", "ambient_events", "roll interval must not be zero"));
        }
        Ok(())
    }

    pub fn aspect(&self) -> f32 {
        self.viewport[0] as f32 / self.viewport[1].max(1) as f32
    }

    /// Seed for a named sub-generator so that generators never share a stream.
    pub(crate) fn sub_seed(&self, salt: u64) -> u64 {
        self.seed ^ salt.wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }
}

//! Scenery and weather presets.
//!
//! The engine only ever selects between a closed set of sceneries and weathers.
//! Each kind maps to exactly one immutable configuration through a `match`, so
//! adding a variant without a preset fails to compile. Names coming from the
//! outside are parsed once at the boundary via [`FromStr`].
//!
//! # Key types
//!
//! - [`SceneryKind`] / [`SceneryConfig`] terrain generator inputs, fog, water and features
//! - [`WeatherKind`] / [`WeatherConfig`] lighting, particles, lightning and overlay strengths
//! - [`StyleMode`] smooth or voxelized rendering
//! - [`Registry`] validated lookup tables shared behind an `Arc`

use std::{fmt, str::FromStr, time::Duration};

use crate::error::ConfigError;

/// Linear RGB in `[0, 1]`.
pub type Rgb = [f32; 3];

/// Convert a `0xRRGGBB` literal into [`Rgb`].
pub const fn rgb(hex: u32) -> Rgb {
    [
        ((hex >> 16) & 0xff) as f32 / 255.0,
        ((hex >> 8) & 0xff) as f32 / 255.0,
        (hex & 0xff) as f32 / 255.0,
    ]
}

/// Edge length of one terrain cell in world units.
pub const VOXEL_SIZE: f32 = 0.5;
pub const DEFAULT_GRID_SIZE: u32 = 40;
pub const DEFAULT_OCTAVES: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SceneryKind {
    Lake,
    Mountains,
    Forest,
    Desert,
    Volcano,
}

impl SceneryKind {
    pub const ALL: [SceneryKind; 5] = [
        SceneryKind::Lake,
        SceneryKind::Mountains,
        SceneryKind::Forest,
        SceneryKind::Desert,
        SceneryKind::Volcano,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SceneryKind::Lake => "lake",
            SceneryKind::Mountains => "mountains",
            SceneryKind::Forest => "forest",
            SceneryKind::Desert => "desert",
            SceneryKind::Volcano => "volcano",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for SceneryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SceneryKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        SceneryKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownScenery(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WeatherKind {
    Clear,
    Rain,
    Snow,
    Fog,
    Storm,
    Night,
}

impl WeatherKind {
    pub const ALL: [WeatherKind; 6] = [
        WeatherKind::Clear,
        WeatherKind::Rain,
        WeatherKind::Snow,
        WeatherKind::Fog,
        WeatherKind::Storm,
        WeatherKind::Night,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WeatherKind::Clear => "clear",
            WeatherKind::Rain => "rain",
            WeatherKind::Snow => "snow",
            WeatherKind::Fog => "fog",
            WeatherKind::Storm => "storm",
            WeatherKind::Night => "night",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for WeatherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WeatherKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        WeatherKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownWeather(s.to_string()))
    }
}

/// How terrain is meshed and whether the compositor quantizes the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StyleMode {
    #[default]
    Smooth,
    Voxelized,
}

impl fmt::Display for StyleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StyleMode::Smooth => f.write_str("smooth"),
            StyleMode::Voxelized => f.write_str("voxel"),
        }
    }
}

impl FromStr for StyleMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smooth" => Ok(StyleMode::Smooth),
            "voxel" | "voxelized" => Ok(StyleMode::Voxelized),
            _ => Err(ConfigError::UnknownStyle(s.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseParams {
    /// Frequency of the first octave in noise space per grid cell.
    pub scale: f32,
    pub amplitude: f32,
    pub octaves: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaterSpec {
    /// Height of the surface in cells, relative to the terrain origin.
    pub level: f32,
    pub color: Rgb,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SceneryFeatures {
    pub dunes: bool,
    pub trees: bool,
    pub lava: Option<Rgb>,
}

/// Everything the mesh builder and the fog need to produce one scenery.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneryConfig {
    pub kind: SceneryKind,
    pub terrain_color: Rgb,
    pub fog_color: Rgb,
    pub fog_density: f32,
    pub noise: NoiseParams,
    pub max_height: u32,
    pub grid_size: u32,
    pub roughness: f32,
    pub water: Option<WaterSpec>,
    pub features: SceneryFeatures,
}

impl SceneryConfig {
    pub fn builtin(kind: SceneryKind) -> Self {
        let base = SceneryConfig {
            kind,
            terrain_color: [0.0; 3],
            fog_color: [0.0; 3],
            fog_density: 0.0,
            noise: NoiseParams {
                scale: 0.1,
                amplitude: 1.0,
                octaves: DEFAULT_OCTAVES,
            },
            max_height: 10,
            grid_size: DEFAULT_GRID_SIZE,
            roughness: 0.8,
            water: None,
            features: SceneryFeatures::default(),
        };
        match kind {
            SceneryKind::Lake => SceneryConfig {
                terrain_color: rgb(0x2d5a27),
                fog_color: rgb(0xb1c4dd),
                fog_density: 0.015,
                noise: NoiseParams {
                    scale: 0.08,
                    amplitude: 4.0,
                    ..base.noise
                },
                max_height: 10,
                water: Some(WaterSpec {
                    level: -1.0,
                    color: rgb(0x1a4a3c),
                }),
                ..base
            },
            SceneryKind::Mountains => SceneryConfig {
                terrain_color: rgb(0x4a4a4a),
                fog_color: rgb(0xc8d1e0),
                fog_density: 0.02,
                noise: NoiseParams {
                    scale: 0.05,
                    amplitude: 15.0,
                    ..base.noise
                },
                max_height: 25,
                roughness: 0.9,
                ..base
            },
            SceneryKind::Forest => SceneryConfig {
                terrain_color: rgb(0x1b4d2e),
                fog_color: rgb(0xa3b18a),
                fog_density: 0.025,
                noise: NoiseParams {
                    scale: 0.1,
                    amplitude: 8.0,
                    ..base.noise
                },
                max_height: 15,
                features: SceneryFeatures {
                    trees: true,
                    ..base.features
                },
                ..base
            },
            SceneryKind::Desert => SceneryConfig {
                terrain_color: rgb(0xd4b483),
                fog_color: rgb(0xf4d03f),
                fog_density: 0.01,
                noise: NoiseParams {
                    scale: 0.03,
                    amplitude: 6.0,
                    ..base.noise
                },
                max_height: 12,
                roughness: 1.0,
                features: SceneryFeatures {
                    dunes: true,
                    ..base.features
                },
                ..base
            },
            SceneryKind::Volcano => SceneryConfig {
                terrain_color: rgb(0x943126),
                fog_color: rgb(0xe6b0aa),
                fog_density: 0.03,
                noise: NoiseParams {
                    scale: 0.06,
                    amplitude: 20.0,
                    ..base.noise
                },
                max_height: 30,
                roughness: 0.7,
                features: SceneryFeatures {
                    lava: Some(rgb(0xff3300)),
                    ..base.features
                },
                ..base
            },
        }
    }

    /// Reject parameter sets the mesh builder cannot turn into geometry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size == 0 {
            return Err(ConfigError::invalid(self.kind, "grid_size", "must be positive"));
        }
        if self.noise.octaves == 0 {
            return Err(ConfigError::invalid(self.kind, "octaves", "must be at least 1"));
        }
        if self.max_height == 0 {
            return Err(ConfigError::invalid(self.kind, "max_height", "must be positive"));
        }
        if !self.noise.scale.is_finite() || self.noise.scale <= 0.0 {
            return Err(ConfigError::invalid(
                self.kind,
                "scale",
                format!("{} is not a positive finite number", self.noise.scale),
            ));
        }
        if !self.noise.amplitude.is_finite() {
            return Err(ConfigError::invalid(self.kind, "amplitude", "must be finite"));
        }
        if !(self.fog_density >= 0.0) {
            return Err(ConfigError::invalid(self.kind, "fog_density", "must not be negative"));
        }
        if let Some(water) = &self.water {
            if !water.level.is_finite() {
                return Err(ConfigError::invalid(self.kind, "water.level", "must be finite"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleSpec {
    pub count: usize,
    pub size: f32,
    pub color: Rgb,
    /// Units per second, positive values fall and negative values rise.
    pub fall_speed: f32,
    pub opacity: f32,
    /// Upper bound of the per-particle sideways speed.
    pub drift: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightningSpec {
    /// Chance of a strike per roll interval.
    pub probability: f32,
    pub intensity: f32,
    pub duration: Duration,
}

/// Strength of each analytic overlay layer in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OverlayIntensities {
    pub rain: f32,
    pub snow: f32,
    pub fog: f32,
    pub night: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WeatherConfig {
    pub kind: WeatherKind,
    pub sun_intensity: f32,
    pub ambient_intensity: f32,
    pub fog_density: f32,
    pub fog_color: Option<Rgb>,
    pub particles: Option<ParticleSpec>,
    pub lightning: Option<LightningSpec>,
    pub overlay: OverlayIntensities,
}

impl WeatherConfig {
    pub fn builtin(kind: WeatherKind) -> Self {
        let base = WeatherConfig {
            kind,
            sun_intensity: 1.0,
            ambient_intensity: 0.5,
            fog_density: 0.01,
            fog_color: None,
            particles: None,
            lightning: None,
            overlay: OverlayIntensities::default(),
        };
        let rain = ParticleSpec {
            count: 1000,
            size: 0.05,
            color: rgb(0x6699ff),
            fall_speed: 10.0,
            opacity: 0.6,
            drift: 0.3,
        };
        match kind {
            WeatherKind::Clear => WeatherConfig {
                sun_intensity: 2.0,
                ..base
            },
            WeatherKind::Rain => WeatherConfig {
                sun_intensity: 0.5,
                ambient_intensity: 0.3,
                fog_density: 0.03,
                particles: Some(rain),
                overlay: OverlayIntensities {
                    rain: 0.6,
                    fog: 0.15,
                    ..base.overlay
                },
                ..base
            },
            WeatherKind::Snow => WeatherConfig {
                sun_intensity: 1.0,
                ambient_intensity: 0.7,
                fog_density: 0.02,
                particles: Some(ParticleSpec {
                    count: 500,
                    size: 0.08,
                    color: rgb(0xffffff),
                    fall_speed: 2.0,
                    opacity: 0.8,
                    drift: 1.0,
                }),
                overlay: OverlayIntensities {
                    snow: 0.7,
                    fog: 0.1,
                    ..base.overlay
                },
                ..base
            },
            WeatherKind::Fog => WeatherConfig {
                sun_intensity: 0.3,
                ambient_intensity: 0.4,
                fog_density: 0.05,
                fog_color: Some(rgb(0xcccccc)),
                overlay: OverlayIntensities {
                    fog: 0.8,
                    ..base.overlay
                },
                ..base
            },
            WeatherKind::Storm => WeatherConfig {
                sun_intensity: 0.2,
                ambient_intensity: 0.3,
                fog_density: 0.04,
                particles: Some(ParticleSpec {
                    count: 2000,
                    fall_speed: 15.0,
                    opacity: 0.4,
                    drift: 1.2,
                    ..rain
                }),
                lightning: Some(LightningSpec {
                    probability: 0.005,
                    intensity: 3.0,
                    duration: Duration::from_millis(150),
                }),
                overlay: OverlayIntensities {
                    rain: 0.9,
                    fog: 0.25,
                    night: 0.3,
                    ..base.overlay
                },
                ..base
            },
            WeatherKind::Night => WeatherConfig {
                sun_intensity: 0.05,
                ambient_intensity: 0.15,
                fog_density: 0.015,
                fog_color: Some(rgb(0x0b1026)),
                overlay: OverlayIntensities {
                    night: 0.65,
                    ..base.overlay
                },
                ..base
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(particles) = &self.particles {
            if particles.count == 0 {
                return Err(ConfigError::invalid(self.kind, "particles.count", "must be positive"));
            }
            if !particles.fall_speed.is_finite() || !particles.drift.is_finite() {
                return Err(ConfigError::invalid(self.kind, "particles", "speeds must be finite"));
            }
        }
        if let Some(lightning) = &self.lightning {
            if !(0.0..=1.0).contains(&lightning.probability) {
                return Err(ConfigError::invalid(
                    self.kind,
                    "lightning.probability",
                    format!("{} is outside [0, 1]", lightning.probability),
                ));
            }
        }
        if !(self.fog_density >= 0.0) {
            return Err(ConfigError::invalid(self.kind, "fog_density", "must not be negative"));
        }
        let o = &self.overlay;
        if [o.rain, o.snow, o.fog, o.night].iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(ConfigError::invalid(self.kind, "overlay", "intensities must lie in [0, 1]"));
        }
        Ok(())
    }
}

/// Immutable, validated preset tables.
#[derive(Clone, Debug)]
pub struct Registry {
    sceneries: Vec<SceneryConfig>,
    weathers: Vec<WeatherConfig>,
}

impl Registry {
    /// Build a registry from custom presets. Every kind must be present exactly
    /// once and every preset must validate.
    pub fn new(
        sceneries: impl IntoIterator<Item = SceneryConfig>,
        weathers: impl IntoIterator<Item = WeatherConfig>,
    ) -> Result<Self, ConfigError> {
        let mut scenery_slots: Vec<Option<SceneryConfig>> = vec![None; SceneryKind::ALL.len()];
        for config in sceneries {
            config.validate()?;
            let idx = config.kind.index();
            if scenery_slots[idx].is_some() {
                return Err(ConfigError::DuplicateEntry(config.kind.to_string()));
            }
            scenery_slots[idx] = Some(config);
        }
        let mut weather_slots: Vec<Option<WeatherConfig>> = vec![None; WeatherKind::ALL.len()];
        for config in weathers {
            config.validate()?;
            let idx = config.kind.index();
            if weather_slots[idx].is_some() {
                return Err(ConfigError::DuplicateEntry(config.kind.to_string()));
            }
            weather_slots[idx] = Some(config);
        }

        let sceneries = scenery_slots
            .into_iter()
            .zip(SceneryKind::ALL)
            .map(|(slot, kind)| slot.ok_or_else(|| ConfigError::MissingEntry(kind.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let weathers = weather_slots
            .into_iter()
            .zip(WeatherKind::ALL)
            .map(|(slot, kind)| slot.ok_or_else(|| ConfigError::MissingEntry(kind.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sceneries, weathers })
    }

    pub fn builtin() -> Self {
        Self {
            sceneries: SceneryKind::ALL.into_iter().map(SceneryConfig::builtin).collect(),
            weathers: WeatherKind::ALL.into_iter().map(WeatherConfig::builtin).collect(),
        }
    }

    pub fn scenery(&self, kind: SceneryKind) -> &SceneryConfig {
        &self.sceneries[kind.index()]
    }

    pub fn weather(&self, kind: WeatherKind) -> &WeatherConfig {
        &self.weathers[kind.index()]
    }

    pub fn scenery_by_name(&self, name: &str) -> Result<&SceneryConfig, ConfigError> {
        Ok(self.scenery(name.parse()?))
    }

    pub fn weather_by_name(&self, name: &str) -> Result<&WeatherConfig, ConfigError> {
        Ok(self.weather(name.parse()?))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_presets_validate() {
        let registry = Registry::builtin();
        for kind in SceneryKind::ALL {
            assert_eq!(registry.scenery(kind).kind, kind);
            registry.scenery(kind).validate().unwrap();
        }
        for kind in WeatherKind::ALL {
            assert_eq!(registry.weather(kind).kind, kind);
            registry.weather(kind).validate().unwrap();
        }
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("Lake".parse::<SceneryKind>(), Ok(SceneryKind::Lake));
        assert_eq!(" VOLCANO ".parse::<SceneryKind>(), Ok(SceneryKind::Volcano));
        assert_eq!("storm".parse::<WeatherKind>(), Ok(WeatherKind::Storm));
        assert_eq!("voxel".parse::<StyleMode>(), Ok(StyleMode::Voxelized));
        assert_eq!(
            "swamp".parse::<SceneryKind>(),
            Err(ConfigError::UnknownScenery("swamp".into()))
        );
    }

    #[test]
    fn registry_requires_every_kind() {
        let partial = Registry::new(
            [SceneryConfig::builtin(SceneryKind::Lake)],
            WeatherKind::ALL.map(WeatherConfig::builtin),
        );
        assert!(matches!(partial, Err(ConfigError::MissingEntry(_))));
    }

    #[test]
    fn registry_rejects_zero_grid() {
        let mut broken = SceneryConfig::builtin(SceneryKind::Desert);
        broken.grid_size = 0;
        let sceneries = SceneryKind::ALL.map(|kind| {
            if kind == SceneryKind::Desert {
                broken.clone()
            } else {
                SceneryConfig::builtin(kind)
            }
        });
        let result = Registry::new(sceneries, WeatherKind::ALL.map(WeatherConfig::builtin));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter { field: "grid_size", .. })
        ));
    }

    #[test]
    fn hex_colors_convert() {
        assert_eq!(rgb(0xff0000), [1.0, 0.0, 0.0]);
        assert_eq!(rgb(0x000000), [0.0, 0.0, 0.0]);
    }
}

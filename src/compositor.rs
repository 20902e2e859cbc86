//! Post-processing of the rendered frame.
//!
//! Three stages run in a fixed order over the rendered scene:
//!
//! 1. style filter: block quantization when the voxelized style is active
//! 2. weather overlay: analytic rain streaks, snow flakes, haze, night and
//!    lightning, computed from time, intensities and a lattice hash
//! 3. frame mask: the tent opening, with soft shadowed edges
//!
//! Every stage can be disabled, which turns it into a pass-through. All inputs
//! live in [`CompositorState`]; the GPU pass in `pipelines::compositor` reads
//! the same values as a [`CompositorUniform`], and [`Compositor::apply`] is the
//! CPU rendition used for snapshots and tests.

use std::time::Duration;

use image::RgbaImage;

use crate::{
    height::hash2,
    registry::{StyleMode, WeatherConfig},
};

pub const TENT_TOP: f32 = 0.45;
pub const TENT_WIDTH: f32 = 0.6;
pub const TENT_BOTTOM_CURVE: f32 = 0.2;
pub const SHADOW_SOFTNESS: f32 = 0.15;
pub const SHADOW_INTENSITY: f32 = 0.8;
pub const INNER_LIGHT: f32 = 0.3;

const RAIN_COLUMNS: f32 = 120.0;
const SNOW_CELLS: f32 = 48.0;
const RAIN_TINT: [f32; 3] = [0.7, 0.75, 0.85];
const FOG_TINT: [f32; 3] = [0.85, 0.87, 0.9];
const NIGHT_TINT: [f32; 3] = [0.02, 0.03, 0.08];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    StyleFilter,
    WeatherOverlay,
    FrameMask,
}

impl StageKind {
    pub const ORDER: [StageKind; 3] = [StageKind::StyleFilter, StageKind::WeatherOverlay, StageKind::FrameMask];

    fn bit(&self) -> u32 {
        match self {
            StageKind::StyleFilter => 1,
            StageKind::WeatherOverlay => 2,
            StageKind::FrameMask => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Scalar(f32),
    Vec2([f32; 2]),
}

/// Live compositor inputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositorState {
    pub resolution: [f32; 2],
    pub aspect: f32,
    /// Seconds since the engine started.
    pub time: f32,
    pub rain: f32,
    pub snow: f32,
    pub fog: f32,
    pub night: f32,
    /// Flash strength in `[0, 1]`.
    pub lightning: f32,
    /// Block edge in pixels, 1 disables quantization.
    pub pixel_size: f32,
}

impl CompositorState {
    pub const NAMES: [&'static str; 9] = [
        "resolution",
        "aspect",
        "time",
        "rain",
        "snow",
        "fog",
        "night",
        "lightning",
        "pixel_size",
    ];

    /// Look a uniform up by the name the shader uses.
    pub fn get(&self, name: &str) -> Option<UniformValue> {
        let scalar = match name {
            "resolution" => return Some(UniformValue::Vec2(self.resolution)),
            "aspect" => self.aspect,
            "time" => self.time,
            "rain" => self.rain,
            "snow" => self.snow,
            "fog" => self.fog,
            "night" => self.night,
            "lightning" => self.lightning,
            "pixel_size" => self.pixel_size,
            _ => return None,
        };
        Some(UniformValue::Scalar(scalar))
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositorUniform {
    pub resolution: [f32; 2],
    pub aspect: f32,
    pub time: f32,
    pub rain: f32,
    pub snow: f32,
    pub fog: f32,
    pub night: f32,
    pub lightning: f32,
    pub pixel_size: f32,
    pub stage_mask: u32,
    pub seed: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Stage {
    kind: StageKind,
    enabled: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Compositor {
    stages: [Stage; 3],
    state: CompositorState,
    seed: u32,
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Fractional part towards negative infinity, as in WGSL.
fn fract(x: f32) -> f32 {
    x - x.floor()
}

fn mix(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t, a[2] + (b[2] - a[2]) * t]
}

/// 1 inside the tent opening, 0 on the fabric, smooth in between.
pub fn tent_shape(x: f32, y: f32) -> f32 {
    let half_width = TENT_WIDTH * ((TENT_TOP - y) / (TENT_TOP + TENT_BOTTOM_CURVE)).clamp(0.0, 1.25);
    let side = smoothstep(half_width - SHADOW_SOFTNESS, half_width, x.abs());
    let top = smoothstep(TENT_TOP - SHADOW_SOFTNESS, TENT_TOP, y);
    let bottom = 1.0
        - smoothstep(
            -TENT_BOTTOM_CURVE,
            -TENT_BOTTOM_CURVE + SHADOW_SOFTNESS,
            y + (x / TENT_WIDTH).powi(2) * TENT_BOTTOM_CURVE,
        );
    1.0 - side.max(top).max(bottom)
}

impl Compositor {
    pub fn new(viewport: [u32; 2], seed: u32) -> Self {
        let [w, h] = [viewport[0].max(1), viewport[1].max(1)];
        Self {
            stages: StageKind::ORDER.map(|kind| Stage { kind, enabled: true }),
            state: CompositorState {
                resolution: [w as f32, h as f32],
                aspect: w as f32 / h as f32,
                time: 0.0,
                rain: 0.0,
                snow: 0.0,
                fog: 0.0,
                night: 0.0,
                lightning: 0.0,
                pixel_size: 1.0,
            },
            seed,
        }
    }

    pub fn state(&self) -> &CompositorState {
        &self.state
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.state.get(name)
    }

    pub fn set_enabled(&mut self, kind: StageKind, enabled: bool) {
        for stage in self.stages.iter_mut().filter(|stage| stage.kind == kind) {
            stage.enabled = enabled;
        }
    }

    pub fn is_enabled(&self, kind: StageKind) -> bool {
        self.stages.iter().any(|stage| stage.kind == kind && stage.enabled)
    }

    pub fn stage_mask(&self) -> u32 {
        self.stages
            .iter()
            .filter(|stage| stage.enabled)
            .fold(0, |mask, stage| mask | stage.kind.bit())
    }

    /// Replace every overlay intensity with the ones of `weather`.
    pub fn set_weather(&mut self, weather: &WeatherConfig) {
        self.state.rain = weather.overlay.rain;
        self.state.snow = weather.overlay.snow;
        self.state.fog = weather.overlay.fog;
        self.state.night = weather.overlay.night;
        self.state.lightning = 0.0;
    }

    pub fn set_style(&mut self, style: StyleMode, pixel_size: f32) {
        self.state.pixel_size = match style {
            StyleMode::Smooth => 1.0,
            StyleMode::Voxelized => pixel_size.max(1.0),
        };
    }

    pub fn set_lightning(&mut self, flash: f32) {
        self.state.lightning = flash.clamp(0.0, 1.0);
    }

    pub fn set_time(&mut self, now: Duration) {
        self.state.time = now.as_secs_f32();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        let [w, h] = [width.max(1), height.max(1)];
        self.state.resolution = [w as f32, h as f32];
        self.state.aspect = w as f32 / h as f32;
    }

    pub fn to_raw(&self) -> CompositorUniform {
        let s = &self.state;
        CompositorUniform {
            resolution: s.resolution,
            aspect: s.aspect,
            time: s.time,
            rain: s.rain,
            snow: s.snow,
            fog: s.fog,
            night: s.night,
            lightning: s.lightning,
            pixel_size: s.pixel_size,
            stage_mask: self.stage_mask(),
            seed: self.seed,
        }
    }

    /// Run every enabled stage over `frame` in order.
    pub fn apply(&self, frame: &mut RgbaImage) {
        for stage in self.stages.iter().filter(|stage| stage.enabled) {
            match stage.kind {
                StageKind::StyleFilter => self.style_filter(frame),
                StageKind::WeatherOverlay => self.weather_overlay(frame),
                StageKind::FrameMask => self.frame_mask(frame),
            }
        }
    }

    fn style_filter(&self, frame: &mut RgbaImage) {
        let block = self.state.pixel_size.floor() as u32;
        if block <= 1 {
            return;
        }
        let (w, h) = frame.dimensions();
        for y in 0..h {
            for x in 0..w {
                let sample = *frame.get_pixel(x - x % block, y - y % block);
                frame.put_pixel(x, y, sample);
            }
        }
    }

    fn weather_overlay(&self, frame: &mut RgbaImage) {
        let s = &self.state;
        if s.rain <= 0.0 && s.snow <= 0.0 && s.fog <= 0.0 && s.night <= 0.0 && s.lightning <= 0.0 {
            return;
        }
        let (w, h) = frame.dimensions();
        for (px, py, pixel) in frame.enumerate_pixels_mut() {
            let u = (px as f32 + 0.5) / w as f32;
            let v = 1.0 - (py as f32 + 0.5) / h as f32;
            let color = [pixel[0], pixel[1], pixel[2]].map(|c| c as f32 / 255.0);
            let color = self.overlay(color, u, v);
            for (channel, value) in pixel.0.iter_mut().zip(color) {
                *channel = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }

    /// Overlay of one pixel at `(u, v)` with `v` pointing up.
    fn overlay(&self, mut color: [f32; 3], u: f32, v: f32) -> [f32; 3] {
        let s = &self.state;
        let t = s.time;
        if s.rain > 0.0 {
            let column = (u * RAIN_COLUMNS).floor();
            let within = fract(u * RAIN_COLUMNS);
            let speed = 1.5 + hash2(column as i32, 17, self.seed);
            let y = v + t * speed + hash2(column as i32, 91, self.seed);
            let segment = (y * 8.0).floor() as i32;
            let streak = hash2(column as i32, segment, self.seed) > 0.7
                && fract(y * 8.0) < 0.3
                && (0.35..0.65).contains(&within);
            if streak {
                color = mix(color, RAIN_TINT, s.rain * 0.5);
            }
        }
        if s.snow > 0.0 {
            let cy = v * SNOW_CELLS + t * 1.5;
            let cx = u * s.aspect * SNOW_CELLS + (t + cy * 0.3).sin() * 0.5;
            let (ix, iy) = (cx.floor() as i32, cy.floor() as i32);
            if hash2(ix, iy, self.seed) > 0.85 {
                let centre = [
                    0.2 + 0.6 * hash2(ix + 7, iy, self.seed),
                    0.2 + 0.6 * hash2(ix, iy + 7, self.seed),
                ];
                let d = ((fract(cx) - centre[0]).powi(2) + (fract(cy) - centre[1]).powi(2)).sqrt();
                let flake = 1.0 - smoothstep(0.05, 0.15, d);
                color = mix(color, [1.0; 3], flake * s.snow * 0.9);
            }
        }
        if s.fog > 0.0 {
            color = mix(color, FOG_TINT, s.fog * (0.35 + 0.25 * (1.0 - v)));
        }
        if s.night > 0.0 {
            color = mix(color, NIGHT_TINT, s.night * 0.85);
        }
        if s.lightning > 0.0 {
            color = mix(color, [1.0; 3], s.lightning * 0.6);
        }
        color
    }

    fn frame_mask(&self, frame: &mut RgbaImage) {
        let (w, h) = frame.dimensions();
        let aspect = self.state.aspect;
        for (px, py, pixel) in frame.enumerate_pixels_mut() {
            let u = (px as f32 + 0.5) / w as f32;
            let v = 1.0 - (py as f32 + 0.5) / h as f32;
            let (x, y) = ((u - 0.5) * aspect, v - 0.5);
            let shape = tent_shape(x, y);
            if shape >= 1.0 {
                continue;
            }
            let edge_shadow = 1.0 - smoothstep(0.0, 0.3, shape);
            let interior = mix(
                [0.05, 0.03, 0.02],
                [0.4 * (1.0 + INNER_LIGHT), 0.35 * (1.0 + INNER_LIGHT), 0.3 * (1.0 + INNER_LIGHT)],
                smoothstep(0.0, 0.7, shape),
            );
            let fabric = (x * 150.0).sin() * (y * 150.0).sin() * 0.02;
            let scene = [pixel[0], pixel[1], pixel[2]].map(|c| c as f32 / 255.0);
            let color = mix(interior, scene, smoothstep(0.2, 0.8, shape + fabric));
            let shade = 1.0 - edge_shadow * SHADOW_INTENSITY;
            for (channel, value) in pixel.0.iter_mut().zip(color) {
                *channel = ((value * shade).clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WeatherKind;
    use image::Rgba;

    fn frame() -> RgbaImage {
        RgbaImage::from_fn(64, 36, |x, y| Rgba([(x * 4) as u8, (y * 7) as u8, 128, 255]))
    }

    #[test]
    fn tent_is_open_in_the_middle_and_closed_at_the_corners() {
        assert_eq!(tent_shape(0.0, 0.0), 1.0);
        assert_eq!(tent_shape(0.85, 0.49), 0.0);
        assert_eq!(tent_shape(-0.85, -0.49), 0.0);
    }

    #[test]
    fn mask_keeps_the_centre_and_darkens_the_corner() {
        let compositor = Compositor::new([64, 36], 1);
        let original = frame();
        let mut masked = original.clone();
        compositor.apply(&mut masked);
        assert_eq!(masked.get_pixel(32, 18), original.get_pixel(32, 18));
        assert_ne!(masked.get_pixel(0, 0), original.get_pixel(0, 0));
        assert!(masked.get_pixel(0, 0)[0] < 40);
    }

    #[test]
    fn voxel_style_quantizes_blocks() {
        let mut compositor = Compositor::new([64, 36], 1);
        compositor.set_enabled(StageKind::FrameMask, false);
        compositor.set_style(StyleMode::Voxelized, 8.0);
        let mut out = frame();
        compositor.apply(&mut out);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(out.get_pixel(x, y), out.get_pixel(0, 0));
            }
        }
        assert_ne!(out.get_pixel(8, 0), out.get_pixel(0, 0));
    }

    #[test]
    fn named_uniforms_follow_weather() {
        let mut compositor = Compositor::new([1280, 720], 1);
        compositor.set_weather(&WeatherConfig::builtin(WeatherKind::Snow));
        assert_eq!(compositor.uniform("snow"), Some(UniformValue::Scalar(0.7)));
        assert_eq!(compositor.uniform("rain"), Some(UniformValue::Scalar(0.0)));
        assert_eq!(compositor.uniform("resolution"), Some(UniformValue::Vec2([1280.0, 720.0])));
        assert_eq!(compositor.uniform("sparkles"), None);
        for name in CompositorState::NAMES {
            assert!(compositor.uniform(name).is_some());
        }
    }

    #[test]
    fn night_darkens_the_frame() {
        let mut compositor = Compositor::new([64, 36], 1);
        compositor.set_enabled(StageKind::FrameMask, false);
        compositor.set_weather(&WeatherConfig::builtin(WeatherKind::Night));
        let mut out = RgbaImage::from_pixel(16, 16, Rgba([200, 200, 200, 255]));
        compositor.apply(&mut out);
        assert!(out.get_pixel(8, 8)[0] < 100);
    }

    #[test]
    fn uniform_block_is_sixteen_byte_aligned() {
        assert_eq!(std::mem::size_of::<CompositorUniform>() % 16, 0);
        let mut compositor = Compositor::new([10, 10], 1);
        compositor.set_enabled(StageKind::WeatherOverlay, false);
        assert_eq!(compositor.to_raw().stage_mask, 0b101);
    }
}

//! Background imagery.
//!
//! Each scenery has an equirectangular background image fetched through an
//! [`AssetProvider`]. Fetching is asynchronous and may fail; the state machine
//! then falls back to [`gradient_sky`], so a scenery switch always completes.

use anyhow::Context;
use futures::future::LocalBoxFuture;
use image::{Rgba, RgbaImage};

use crate::registry::{Rgb, SceneryKind, rgb};

pub type AssetFuture = LocalBoxFuture<'static, anyhow::Result<Vec<u8>>>;

/// Source of encoded background images.
pub trait AssetProvider {
    fn fetch_background(&self, scenery: SceneryKind) -> AssetFuture;
}

/// File extensions tried in order for `<scenery>.<ext>`.
pub const BACKGROUND_EXTENSIONS: [&str; 3] = ["hdr", "png", "jpg"];

/// Provider that never has anything; every scenery uses the fallback sky.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAssets;

impl AssetProvider for NoAssets {
    fn fetch_background(&self, scenery: SceneryKind) -> AssetFuture {
        Box::pin(async move { Err(anyhow::anyhow!("no background available for {scenery}")) })
    }
}

/// Reads backgrounds from a directory on a tokio runtime.
#[cfg(not(target_arch = "wasm32"))]
pub struct FileAssetProvider {
    root: std::path::PathBuf,
    runtime: tokio::runtime::Handle,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileAssetProvider {
    pub fn new(root: impl Into<std::path::PathBuf>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            root: root.into(),
            runtime,
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl AssetProvider for FileAssetProvider {
    fn fetch_background(&self, scenery: SceneryKind) -> AssetFuture {
        let candidates: Vec<_> = BACKGROUND_EXTENSIONS
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", scenery.name(), ext)))
            .collect();
        let (tx, rx) = futures::channel::oneshot::channel();
        self.runtime.spawn(async move {
            let mut last_error = anyhow::anyhow!("no background candidates for {scenery}");
            for path in candidates {
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        let _ = tx.send(Ok(bytes));
                        return;
                    }
                    Err(e) => {
                        last_error = anyhow::Error::new(e).context(format!("reading {}", path.display()))
                    }
                }
            }
            let _ = tx.send(Err(last_error));
        });
        Box::pin(async move { rx.await.context("background loader dropped the request")? })
    }
}

/// Fetches backgrounds relative to the page origin.
#[cfg(target_arch = "wasm32")]
pub struct WebAssetProvider {
    prefix: String,
}

#[cfg(target_arch = "wasm32")]
impl WebAssetProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn url(&self, file_name: &str) -> anyhow::Result<reqwest::Url> {
        let window = web_sys::window().context("no window")?;
        let origin = window
            .location()
            .origin()
            .map_err(|_| anyhow::anyhow!("page origin is not readable"))?;
        let base = reqwest::Url::parse(&format!("{}/{}/", origin, self.prefix))?;
        Ok(base.join(file_name)?)
    }
}

#[cfg(target_arch = "wasm32")]
impl AssetProvider for WebAssetProvider {
    fn fetch_background(&self, scenery: SceneryKind) -> AssetFuture {
        let url = self.url(&format!("{}.{}", scenery.name(), BACKGROUND_EXTENSIONS[0]));
        Box::pin(async move {
            let bytes = reqwest::get(url?).await?.error_for_status()?.bytes().await?;
            Ok(bytes.to_vec())
        })
    }
}

/// The image behind the terrain.
#[derive(Clone, Debug, PartialEq)]
pub enum Background {
    Image(RgbaImage),
    GradientSky(RgbaImage),
}

impl Background {
    pub fn image(&self) -> &RgbaImage {
        match self {
            Background::Image(image) | Background::GradientSky(image) => image,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Background::GradientSky(_))
    }
}

/// Decode an encoded background. Non 2:1 images are accepted with a warning.
pub fn decode_background(bytes: &[u8]) -> anyhow::Result<RgbaImage> {
    let image = image::load_from_memory(bytes).context("decoding background image")?;
    if image.width() != image.height() * 2 {
        log::warn!(
            "Background is {}x{}, equirectangular images should be 2:1.",
            image.width(),
            image.height()
        );
    }
    Ok(image.to_rgba8())
}

pub const SKY_TOP: Rgb = rgb(0x0077ff);
pub const SKY_BOTTOM: Rgb = rgb(0xffffff);
pub const SKY_EXPONENT: f32 = 0.6;

/**
 * Equirectangular gradient: row 0 looks straight up, the middle row is the
 * horizon. Everything below the horizon gets the bottom colour.
 */
pub fn gradient_sky(width: u32, height: u32, top: Rgb, bottom: Rgb, exponent: f32) -> RgbaImage {
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    RgbaImage::from_fn(width.max(1), height.max(1), |_, y| {
        let elevation = 1.0 - 2.0 * (y as f32 + 0.5) / height.max(1) as f32;
        let t = elevation.max(0.0).powf(exponent);
        Rgba([
            to_u8(bottom[0] + (top[0] - bottom[0]) * t),
            to_u8(bottom[1] + (top[1] - bottom[1]) * t),
            to_u8(bottom[2] + (top[2] - bottom[2]) * t),
            255,
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sky_blends_from_top_to_horizon() {
        let sky = gradient_sky(8, 64, SKY_TOP, SKY_BOTTOM, SKY_EXPONENT);
        let zenith = sky.get_pixel(0, 0);
        let ground = sky.get_pixel(0, 63);
        assert!(zenith[2] > zenith[0]);
        assert_eq!(*ground, Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_background(b"definitely not an image").is_err());
    }
}

//! Runs the environment without a window and writes a composited snapshot.
//!
//! Usage: `tent-view-headless [scenery] [weather|cycle] [style] [seconds] [output.png]`
//!
//! Backgrounds are read from `assets/backgrounds/<scenery>.{hdr,png,jpg}`; a
//! missing file falls back to the gradient sky.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use image::imageops::{self, FilterType};
use tent_view::{
    EngineConfig, Environment, Phase, Registry, WeatherKind, clock::FrameClock,
    resources::texture::FileAssetProvider,
};

const FRAME: Duration = Duration::from_micros(16_667);
const WEATHER_CYCLE: Duration = Duration::from_secs(3);
const LOAD_GRACE: Duration = Duration::from_secs(10);

fn main() -> anyhow::Result<()> {
    tent_view::init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let scenery = args.first().map(String::as_str).unwrap_or("lake");
    let weather = args.get(1).map(String::as_str).unwrap_or("clear");
    let style = args.get(2).map(String::as_str).unwrap_or("smooth");
    let seconds: f32 = args
        .get(3)
        .map(|s| s.parse())
        .transpose()
        .context("seconds must be a number")?
        .unwrap_or(10.0);
    let output = args.get(4).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("tent-view.png"));
    let cycle = weather.eq_ignore_ascii_case("cycle");

    let runtime = tokio::runtime::Runtime::new()?;
    let assets = FileAssetProvider::new("assets/backgrounds", runtime.handle().clone());
    let config = EngineConfig::default();
    let [width, height] = config.viewport;
    let mut env = Environment::new(config, Arc::new(Registry::builtin()), Box::new(assets))?;

    env.set_scenery(scenery)?;
    if !cycle {
        env.set_weather(weather)?;
    }
    env.set_style(style)?;

    let mut clock = FrameClock::new();
    let mut next_weather = WEATHER_CYCLE;
    let mut weathers = WeatherKind::ALL.into_iter().cycle();
    let run_for = Duration::from_secs_f32(seconds.max(0.0));
    loop {
        let (dt, now) = clock.advance();
        let loading = matches!(env.phase(), Phase::Loading { .. });
        if now >= run_for && (!loading || now >= run_for + LOAD_GRACE) {
            break;
        }
        if cycle && now >= next_weather {
            if let Some(kind) = weathers.next() {
                env.select_weather(kind);
            }
            next_weather = now + WEATHER_CYCLE;
        }
        env.tick(dt, now);
        std::thread::sleep(FRAME);
    }

    let frame = env.frame();
    log::info!(
        "{} opaque, {} transparent, {} surfaces, {} lights; active events: {:?}",
        frame.batches.opaque.len(),
        frame.batches.transparent.len(),
        frame.batches.surfaces.len(),
        frame.batches.lights.len(),
        env.events().active_kinds()
    );

    let background = env.background().context("no scenery finished loading")?;
    let mut snapshot = imageops::resize(background.image(), width, height, FilterType::Triangle);
    env.compositor().apply(&mut snapshot);
    snapshot
        .save(&output)
        .with_context(|| format!("writing {}", output.display()))?;
    log::info!("wrote {}", output.display());

    env.dispose();
    Ok(())
}

#![allow(dead_code)]

use std::{cell::RefCell, io::Cursor, rc::Rc, sync::Arc, time::Duration};

use futures::channel::oneshot;
use image::{ImageFormat, Rgba, RgbaImage};
use tent_view::{
    EngineConfig, Environment, Registry, SceneryKind,
    resources::texture::{AssetFuture, AssetProvider},
};

pub const FRAME: Duration = Duration::from_micros(16_667);

type Pending = Vec<(SceneryKind, oneshot::Sender<anyhow::Result<Vec<u8>>>)>;

/// Asset provider whose requests stay pending until the test resolves them.
#[derive(Clone, Default)]
pub struct ManualAssets {
    pending: Rc<RefCell<Pending>>,
}

impl ManualAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> Vec<SceneryKind> {
        self.pending.borrow().iter().map(|(kind, _)| *kind).collect()
    }

    /// Answer the oldest open request for `kind`. Returns false if there was none.
    pub fn resolve(&self, kind: SceneryKind, result: anyhow::Result<Vec<u8>>) -> bool {
        let mut pending = self.pending.borrow_mut();
        match pending.iter().position(|(k, _)| *k == kind) {
            Some(idx) => {
                let (_, tx) = pending.remove(idx);
                // the environment may have dropped an outdated request already
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn succeed(&self, kind: SceneryKind) -> bool {
        self.resolve(kind, Ok(png_fixture(16, 8)))
    }

    pub fn fail(&self, kind: SceneryKind) -> bool {
        self.resolve(kind, Err(anyhow::anyhow!("{kind} is not available")))
    }
}

impl AssetProvider for ManualAssets {
    fn fetch_background(&self, scenery: SceneryKind) -> AssetFuture {
        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().push((scenery, tx));
        Box::pin(async move { rx.await.map_err(|_| anyhow::anyhow!("request was dropped"))? })
    }
}

/// A small 2:1 PNG.
pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([10, 120, 200, 255]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encoding the fixture");
    bytes
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An environment without ambient events, so nothing random appears on its own.
pub fn environment(assets: &ManualAssets) -> Environment {
    init_logger();
    Environment::new(
        EngineConfig::default().with_ambient_events(None),
        Arc::new(Registry::builtin()),
        Box::new(assets.clone()),
    )
    .unwrap()
}

/// Tick at 60 Hz from `from` until `to`, returning the last timestamp.
pub fn run(env: &mut Environment, from: Duration, to: Duration) -> Duration {
    let mut now = from;
    while now < to {
        now += FRAME;
        env.tick(FRAME, now);
    }
    now
}

//! tent-view
//!
//! A procedural environment and effects engine: the view out of a tent onto a
//! generated landscape with switchable scenery, weather, wildlife events and
//! an optional blocky rendering style. The crate generates and animates the
//! scene content and the post-processing parameters every frame; drawing is
//! left to the host, which reads draw batches and a compositor uniform block
//! (or uses the provided `wgpu` compositor pass).
//!
//! High-level modules
//! - `environment`: the state machine hosts talk to (commands, tick, frame, dispose)
//! - `registry`: scenery and weather presets
//! - `height`: seeded height field and lattice hash
//! - `resources`: geometry/material interning, terrain builder, backgrounds
//! - `particles`: fixed capacity precipitation and ember fields
//! - `events`: transient wildlife and sky events
//! - `compositor`: style filter, weather overlay and tent mask
//! - `data_structures`: instances, vertices and the scene graph
//! - `render`: draw batches read by the renderer
//! - `pipelines`: the `wgpu` compositor pass
//! - `clock`: frame timing and one-shot timers
//!

pub mod clock;
pub mod compositor;
pub mod config;
pub mod data_structures;
pub mod environment;
pub mod error;
pub mod events;
pub mod height;
pub mod particles;
pub mod pipelines;
pub mod registry;
pub mod render;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use config::{AmbientEvents, EngineConfig};
pub use environment::{Environment, Fog, Frame, Phase, Selection};
pub use error::ConfigError;
pub use events::EventKind;
pub use registry::{Registry, SceneryKind, StyleMode, WeatherKind};

/// Route `log` output to stderr (native) or the browser console (wasm).
/// Calling it again is harmless.
pub fn init_logging() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        if let Err(e) = console_log::init_with_level(log::Level::Info) {
            log::warn!("Could not initialize logger: {}", e);
        }
    }
}

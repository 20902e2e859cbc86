//! Render composition and batching.
//!
//! Scene nodes describe what they draw with the [`Render`] enum. Before a frame
//! is handed to the renderer the tree of renders is flattened into
//! [`RenderBatches`], one list per pipeline: opaque instanced draws first, then
//! generated surfaces, then transparent draws (water, precipitation), plus the
//! lights the shaders need.
//!
//! # Key types
//!
//! - [`Render<'a>`] the per-node render description
//! - [`Instanced<'a>`] one geometry, one material, many instances
//! - [`Surface<'a>`] a generated mesh with a single transform
//! - [`RenderBatches<'a>`] flattened draw lists for one frame

use crate::{
    data_structures::{instance::InstanceRaw, scene_graph::PointLight, vertex::SurfaceMesh},
    resources::{Geometry, Material},
};

pub struct Instanced<'a> {
    pub geometry: &'a Geometry,
    pub material: &'a Material,
    pub instances: &'a [InstanceRaw],
}

pub struct Surface<'a> {
    pub mesh: &'a SurfaceMesh,
    pub material: &'a Material,
    pub transform: InstanceRaw,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightDraw {
    pub position: [f32; 3],
    pub light: PointLight,
}

/// Specifies how a scene object should be rendered.
///
/// - `None` renders nothing
/// - `Opaque(Instanced)` renders opaque instanced geometry
/// - `Transparent(Instanced)` renders blended instanced geometry after everything opaque
/// - `Surface(Surface)` renders a generated mesh
/// - `Light(LightDraw)` contributes a light to the frame
/// - `Composed(Vec<Render>)` recursively renders a composition of renders
pub enum Render<'a> {
    None,
    Opaque(Instanced<'a>),
    Transparent(Instanced<'a>),
    Surface(Surface<'a>),
    Light(LightDraw),
    Composed(Vec<Render<'a>>),
}

impl<'a> Render<'a> {
    /// Sort this render (and everything it is composed of) into `batches`.
    pub fn sort_into(self, batches: &mut RenderBatches<'a>) {
        match self {
            Render::None => (),
            Render::Opaque(instanced) => {
                if instanced.instances.is_empty() {
                    log::warn!("Skipping opaque draw without instances.");
                } else {
                    batches.opaque.push(instanced);
                }
            }
            Render::Transparent(instanced) => {
                if instanced.instances.is_empty() {
                    log::warn!("Skipping transparent draw without instances.");
                } else {
                    batches.transparent.push(instanced);
                }
            }
            Render::Surface(surface) => batches.surfaces.push(surface),
            Render::Light(light) => batches.lights.push(light),
            Render::Composed(renders) => renders
                .into_iter()
                .for_each(|render| render.sort_into(batches)),
        }
    }
}

#[derive(Default)]
pub struct RenderBatches<'a> {
    pub opaque: Vec<Instanced<'a>>,
    pub surfaces: Vec<Surface<'a>>,
    pub transparent: Vec<Instanced<'a>>,
    pub lights: Vec<LightDraw>,
}

impl<'a> RenderBatches<'a> {
    pub fn collect(renders: impl IntoIterator<Item = Render<'a>>) -> Self {
        let mut batches = RenderBatches::default();
        renders
            .into_iter()
            .for_each(|render| render.sort_into(&mut batches));
        batches
    }

    /// Total number of instances drawn this frame, surfaces counted once.
    pub fn instance_count(&self) -> usize {
        self.opaque
            .iter()
            .chain(self.transparent.iter())
            .map(|draw| draw.instances.len())
            .sum::<usize>()
            + self.surfaces.len()
    }
}

//! Geometry, materials and imagery.
//!
//! Scene nodes describe what they draw with plain [`Geometry`] and [`Material`]
//! values. The [`ResourcePool`] interns equal values and counts how many
//! attached nodes reference each one, so the renderer allocates one GPU buffer
//! per distinct value and frees it as soon as the last node is detached.
//!
//! - `mesh` turns scenery parameters into terrain, water, foliage and lava
//! - `texture` loads background imagery and builds the fallback sky

use log::{debug, warn};

use crate::registry::Rgb;

pub mod mesh;
pub mod texture;

/// Shape description. Equal values share one GPU allocation.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Cuboid { size: [f32; 3] },
    Point { size: f32 },
    /// Generated surface owned by a single node; `key` keeps rebuilt surfaces apart.
    Surface { key: u64, vertices: usize, indices: usize },
}

impl Geometry {
    pub fn cube(size: f32) -> Self {
        Geometry::Cuboid { size: [size; 3] }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub color: Rgb,
    pub opacity: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub emissive: f32,
}

impl Material {
    pub fn solid(color: Rgb) -> Self {
        Self {
            color,
            opacity: 1.0,
            roughness: 0.8,
            metalness: 0.0,
            emissive: 0.0,
        }
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_surface(mut self, roughness: f32, metalness: f32) -> Self {
        self.roughness = roughness;
        self.metalness = metalness;
        self
    }

    pub fn with_emissive(mut self, emissive: f32) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn is_transparent(&self) -> bool {
        self.opacity < 1.0
    }
}

/// Borrowed view on a resource referenced by a scene node.
#[derive(Clone, Copy, Debug)]
pub enum ResourceRef<'a> {
    Geometry(&'a Geometry),
    Material(&'a Material),
}

#[derive(Debug)]
struct Interned<T> {
    value: T,
    refs: usize,
}

fn acquire_in<T: Clone + PartialEq>(slots: &mut Vec<Interned<T>>, value: &T) -> bool {
    match slots.iter_mut().find(|slot| &slot.value == value) {
        Some(slot) => {
            slot.refs += 1;
            false
        }
        None => {
            slots.push(Interned {
                value: value.clone(),
                refs: 1,
            });
            true
        }
    }
}

fn release_in<T: PartialEq>(slots: &mut Vec<Interned<T>>, value: &T) -> Option<bool> {
    let idx = slots.iter().position(|slot| &slot.value == value)?;
    slots[idx].refs -= 1;
    if slots[idx].refs == 0 {
        slots.swap_remove(idx);
        Some(true)
    } else {
        Some(false)
    }
}

/// Reference counted set of live geometries and materials.
#[derive(Debug, Default)]
pub struct ResourcePool {
    geometries: Vec<Interned<Geometry>>,
    materials: Vec<Interned<Material>>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, resource: ResourceRef<'_>) {
        let allocated = match resource {
            ResourceRef::Geometry(geometry) => acquire_in(&mut self.geometries, geometry),
            ResourceRef::Material(material) => acquire_in(&mut self.materials, material),
        };
        if allocated {
            debug!("allocated {:?}", resource);
        }
    }

    pub fn release(&mut self, resource: ResourceRef<'_>) {
        let released = match resource {
            ResourceRef::Geometry(geometry) => release_in(&mut self.geometries, geometry),
            ResourceRef::Material(material) => release_in(&mut self.materials, material),
        };
        match released {
            Some(true) => debug!("released {:?}", resource),
            Some(false) => (),
            None => warn!("tried to release {:?}, which is not live", resource),
        }
    }

    /// Number of attached references to `geometry`.
    pub fn geometry_refs(&self, geometry: &Geometry) -> usize {
        self.geometries
            .iter()
            .find(|slot| &slot.value == geometry)
            .map_or(0, |slot| slot.refs)
    }

    pub fn material_refs(&self, material: &Material) -> usize {
        self.materials
            .iter()
            .find(|slot| &slot.value == material)
            .map_or(0, |slot| slot.refs)
    }

    pub fn live_geometries(&self) -> usize {
        self.geometries.len()
    }

    pub fn live_materials(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty() && self.materials.is_empty()
    }
}

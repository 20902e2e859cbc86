//! Procedural terrain, water, foliage and lava.
//!
//! Everything here is a pure function of a [`SceneryConfig`], a [`StyleMode`]
//! and the shared [`HeightField`]: the same inputs always produce the same
//! geometry. The results are plain data; [`TerrainInstance::into_nodes`] turns
//! them into scene nodes when the state machine swaps them in.

use cgmath::InnerSpace;

use crate::{
    data_structures::{
        instance::Instance,
        scene_graph::{InstancedNode, NodeRole, SceneNode, SurfaceNode},
        vertex::{SurfaceMesh, SurfaceVertex},
    },
    error::ConfigError,
    height::HeightField,
    registry::{SceneryConfig, SceneryKind, StyleMode, VOXEL_SIZE, rgb},
    resources::{Geometry, Material},
};

/// Upper bound on cell slots of a single voxel terrain.
pub const MAX_CELL_SLOTS: u64 = 1 << 22;

const TREE_DENSITY: f32 = 0.04;
const LEAF_GAP: f32 = 0.25;

/// Integer cell coordinate: `x`/`z` on the footprint, `y` counted from the base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// Maps grid coordinates to world positions, centred on the origin.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Placement {
    grid_size: u32,
    max_height: u32,
}

impl Placement {
    fn new(config: &SceneryConfig) -> Self {
        Self {
            grid_size: config.grid_size,
            max_height: config.max_height,
        }
    }

    fn world_x(&self, x: f32) -> f32 {
        (x - self.grid_size as f32 / 2.0) * VOXEL_SIZE
    }

    fn base_y(&self) -> f32 {
        -(self.max_height as f32 / 2.0) * VOXEL_SIZE
    }

    fn cell(&self, cell: Cell) -> Instance {
        Instance::at(
            self.world_x(cell.x as f32),
            self.base_y() + cell.y as f32 * VOXEL_SIZE,
            self.world_x(cell.z as f32),
        )
    }
}

pub struct VoxelTerrain {
    cells: Vec<Cell>,
    heights: Vec<u32>,
    placement: Placement,
    material: Material,
}

impl VoxelTerrain {
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn used(&self) -> usize {
        self.cells.len()
    }

    /// Reserved slots: every column filled up to the maximum height.
    pub fn capacity(&self) -> usize {
        (self.placement.grid_size as usize).pow(2) * self.placement.max_height as usize
    }

    pub fn grid_size(&self) -> u32 {
        self.placement.grid_size
    }

    pub fn max_height(&self) -> u32 {
        self.placement.max_height
    }

    /// Number of stacked cells in the column at `(x, z)`.
    pub fn column_height(&self, x: u32, z: u32) -> u32 {
        let g = self.placement.grid_size;
        if x >= g || z >= g {
            return 0;
        }
        self.heights[(z * g + x) as usize]
    }

    pub fn is_solid(&self, cell: Cell) -> bool {
        cell.y < self.column_height(cell.x, cell.z)
    }

    pub fn world_position(&self, cell: Cell) -> Instance {
        self.placement.cell(cell)
    }
}

pub struct SurfaceTerrain {
    key: u64,
    mesh: SurfaceMesh,
    material: Material,
}

impl SurfaceTerrain {
    pub fn mesh(&self) -> &SurfaceMesh {
        &self.mesh
    }
}

pub enum TerrainBody {
    Voxel(VoxelTerrain),
    Surface(SurfaceTerrain),
}

impl TerrainBody {
    pub fn as_voxel(&self) -> Option<&VoxelTerrain> {
        match self {
            TerrainBody::Voxel(voxels) => Some(voxels),
            TerrainBody::Surface(_) => None,
        }
    }

    pub fn as_surface(&self) -> Option<&SurfaceTerrain> {
        match self {
            TerrainBody::Voxel(_) => None,
            TerrainBody::Surface(surface) => Some(surface),
        }
    }
}

/// Flat, semi transparent tiles covering the whole footprint.
pub struct WaterSurface {
    pub level: f32,
    pub tiles: Vec<Instance>,
    pub material: Material,
}

pub struct Foliage {
    pub trunks: Vec<Instance>,
    pub leaves: Vec<Instance>,
    pub trunk_material: Material,
    pub leaf_material: Material,
}

/// Emissive cells filling the low ground of a volcano.
pub struct LavaPool {
    pub cells: Vec<Instance>,
    pub material: Material,
}

/// One generated scenery: the terrain body plus its optional layers.
pub struct TerrainInstance {
    pub scenery: SceneryKind,
    pub style: StyleMode,
    pub body: TerrainBody,
    pub water: Option<WaterSurface>,
    pub foliage: Option<Foliage>,
    pub lava: Option<LavaPool>,
}

impl TerrainInstance {
    /// Convert into scene nodes, body first.
    pub fn into_nodes(self) -> Vec<Box<dyn SceneNode>> {
        let cube = Geometry::cube(VOXEL_SIZE);
        let mut nodes: Vec<Box<dyn SceneNode>> = Vec::new();
        match self.body {
            TerrainBody::Voxel(voxels) => {
                let capacity = voxels.capacity();
                let locals = voxels.cells.iter().map(|&cell| voxels.placement.cell(cell)).collect();
                nodes.push(Box::new(InstancedNode::with_capacity(
                    NodeRole::Terrain,
                    cube.clone(),
                    voxels.material,
                    locals,
                    capacity,
                )));
            }
            TerrainBody::Surface(surface) => {
                nodes.push(Box::new(SurfaceNode::new(
                    NodeRole::Terrain,
                    surface.key,
                    surface.mesh,
                    surface.material,
                )));
            }
        }
        if let Some(water) = self.water {
            nodes.push(Box::new(InstancedNode::new(
                NodeRole::Water,
                Geometry::Cuboid {
                    size: [VOXEL_SIZE, VOXEL_SIZE * 0.2, VOXEL_SIZE],
                },
                water.material,
                water.tiles,
            )));
        }
        if let Some(foliage) = self.foliage {
            nodes.push(Box::new(InstancedNode::new(
                NodeRole::Foliage,
                cube.clone(),
                foliage.trunk_material,
                foliage.trunks,
            )));
            nodes.push(Box::new(InstancedNode::new(
                NodeRole::Foliage,
                cube.clone(),
                foliage.leaf_material,
                foliage.leaves,
            )));
        }
        if let Some(lava) = self.lava {
            nodes.push(Box::new(InstancedNode::new(
                NodeRole::Lava,
                cube,
                lava.material,
                lava.cells,
            )));
        }
        nodes
    }
}

pub struct MeshBuilder<'a> {
    field: &'a HeightField,
}

impl<'a> MeshBuilder<'a> {
    pub fn new(field: &'a HeightField) -> Self {
        Self { field }
    }

    /// Normalized height at a grid coordinate with the scenery's surface features applied.
    fn sample(&self, config: &SceneryConfig, x: f32, z: f32) -> f32 {
        let h = self.field.height(x, z, &config.noise);
        if config.features.dunes {
            let ridge = 1.0 - 2.0 * (x * 0.35 + z * 0.12 + h * 2.0).sin().abs();
            (h * 0.7 + ridge * 0.3).clamp(-1.0, 1.0)
        } else {
            h
        }
    }

    fn column_height(&self, config: &SceneryConfig, x: u32, z: u32) -> u32 {
        let h = self.sample(config, x as f32, z as f32);
        (h * config.max_height as f32).floor().clamp(0.0, config.max_height as f32) as u32
    }

    /// Centre height of the first free cell above the ground at `(x, z)`.
    fn ground_y(&self, config: &SceneryConfig, style: StyleMode, x: u32, z: u32) -> f32 {
        let placement = Placement::new(config);
        match style {
            StyleMode::Voxelized => {
                placement.base_y() + self.column_height(config, x, z) as f32 * VOXEL_SIZE
            }
            StyleMode::Smooth => {
                self.sample(config, x as f32, z as f32) * config.noise.amplitude * VOXEL_SIZE + VOXEL_SIZE / 2.0
            }
        }
    }

    pub fn build_terrain(&self, config: &SceneryConfig, style: StyleMode) -> Result<TerrainInstance, ConfigError> {
        config.validate()?;
        let slots = (config.grid_size as u64).pow(2) * config.max_height as u64;
        if slots > MAX_CELL_SLOTS {
            return Err(ConfigError::invalid(
                config.kind,
                "grid_size",
                format!("{slots} cell slots exceed the limit of {MAX_CELL_SLOTS}"),
            ));
        }

        let body = match style {
            StyleMode::Voxelized => TerrainBody::Voxel(self.build_voxels(config)),
            StyleMode::Smooth => TerrainBody::Surface(self.build_surface(config)),
        };
        Ok(TerrainInstance {
            scenery: config.kind,
            style,
            body,
            water: self.build_water(config),
            foliage: self.build_foliage(config, style),
            lava: self.build_lava(config, style),
        })
    }

    fn build_voxels(&self, config: &SceneryConfig) -> VoxelTerrain {
        let g = config.grid_size;
        let mut heights = Vec::with_capacity((g * g) as usize);
        let mut cells = Vec::new();
        for z in 0..g {
            for x in 0..g {
                let column = self.column_height(config, x, z);
                heights.push(column);
                cells.extend((0..column).map(|y| Cell { x, y, z }));
            }
        }
        VoxelTerrain {
            cells,
            heights,
            placement: Placement::new(config),
            material: Material::solid(config.terrain_color).with_surface(config.roughness, 0.0),
        }
    }

    fn build_surface(&self, config: &SceneryConfig) -> SurfaceTerrain {
        let g = config.grid_size;
        let placement = Placement::new(config);
        let row = g + 1;

        let mut vertices = Vec::with_capacity((row * row) as usize);
        for z in 0..row {
            for x in 0..row {
                let h = self.sample(config, x as f32, z as f32);
                vertices.push(SurfaceVertex {
                    position: [
                        placement.world_x(x as f32),
                        h * config.noise.amplitude * VOXEL_SIZE,
                        placement.world_x(z as f32),
                    ],
                    normal: [0.0; 3],
                });
            }
        }

        let mut indices = Vec::with_capacity((g * g * 6) as usize);
        for z in 0..g {
            for x in 0..g {
                let a = z * row + x;
                let b = a + 1;
                let c = a + row;
                let d = c + 1;
                indices.extend_from_slice(&[a, c, b, b, c, d]);
            }
        }

        // Area weighted face normals summed per vertex.
        let mut normals = vec![cgmath::Vector3::new(0.0f32, 0.0, 0.0); vertices.len()];
        for tri in indices.chunks(3) {
            let p0: cgmath::Vector3<f32> = vertices[tri[0] as usize].position.into();
            let p1: cgmath::Vector3<f32> = vertices[tri[1] as usize].position.into();
            let p2: cgmath::Vector3<f32> = vertices[tri[2] as usize].position.into();
            let face = (p1 - p0).cross(p2 - p0);
            for &i in tri {
                normals[i as usize] += face;
            }
        }
        for (vertex, normal) in vertices.iter_mut().zip(normals) {
            vertex.normal = if normal.magnitude2() > 0.0 {
                normal.normalize().into()
            } else {
                [0.0, 1.0, 0.0]
            };
        }

        SurfaceTerrain {
            key: ((self.field.seed() as u64) << 8) | config.kind as u64,
            mesh: SurfaceMesh { vertices, indices },
            material: Material::solid(config.terrain_color).with_surface(config.roughness, 0.0),
        }
    }

    /// Water tiles at the configured level, or `None` for dry sceneries.
    pub fn build_water(&self, config: &SceneryConfig) -> Option<WaterSurface> {
        let water = config.water?;
        let placement = Placement::new(config);
        let level = water.level * VOXEL_SIZE;
        let g = config.grid_size;
        let tiles = (0..g)
            .flat_map(|z| (0..g).map(move |x| (x, z)))
            .map(|(x, z)| Instance::at(placement.world_x(x as f32), level, placement.world_x(z as f32)))
            .collect();
        Some(WaterSurface {
            level,
            tiles,
            material: Material::solid(water.color).with_opacity(0.8).with_surface(0.1, 0.9),
        })
    }

    /// Trees on hashed columns: a two cell trunk under a gapped leaf canopy.
    pub fn build_foliage(&self, config: &SceneryConfig, style: StyleMode) -> Option<Foliage> {
        if !config.features.trees {
            return None;
        }
        let placement = Placement::new(config);
        let g = config.grid_size;
        let mut trunks = Vec::new();
        let mut leaves = Vec::new();

        for z in 1..g.saturating_sub(1) {
            for x in 1..g.saturating_sub(1) {
                if self.field.hash(x as i32, z as i32) >= TREE_DENSITY {
                    continue;
                }
                if self.column_height(config, x, z) == 0 {
                    continue;
                }
                let ground = self.ground_y(config, style, x, z);
                let (wx, wz) = (placement.world_x(x as f32), placement.world_x(z as f32));
                trunks.push(Instance::at(wx, ground, wz));
                trunks.push(Instance::at(wx, ground + VOXEL_SIZE, wz));

                let canopy = ground + 2.0 * VOXEL_SIZE;
                for layer in 0..2i32 {
                    let reach = 1 - layer;
                    for dz in -1..=1i32 {
                        for dx in -1..=1i32 {
                            if dx.abs() > reach || dz.abs() > reach {
                                continue;
                            }
                            let gap = self.field.hash(x as i32 * 7 + dx, z as i32 * 7 + dz + layer * 31);
                            if gap < LEAF_GAP && (dx, dz) != (0, 0) {
                                continue;
                            }
                            leaves.push(Instance::at(
                                wx + dx as f32 * VOXEL_SIZE,
                                canopy + layer as f32 * VOXEL_SIZE,
                                wz + dz as f32 * VOXEL_SIZE,
                            ));
                        }
                    }
                }
            }
        }

        Some(Foliage {
            trunks,
            leaves,
            trunk_material: Material::solid(rgb(0x5d4037)),
            leaf_material: Material::solid(rgb(0x2e7d32)).with_surface(0.9, 0.0),
        })
    }

    /// Lava on every column whose ground lies below the noise midline.
    pub fn build_lava(&self, config: &SceneryConfig, style: StyleMode) -> Option<LavaPool> {
        let color = config.features.lava?;
        let placement = Placement::new(config);
        let g = config.grid_size;
        let cells = (0..g)
            .flat_map(|z| (0..g).map(move |x| (x, z)))
            .filter(|&(x, z)| self.sample(config, x as f32, z as f32) < 0.0)
            .map(|(x, z)| {
                Instance::at(
                    placement.world_x(x as f32),
                    self.ground_y(config, style, x, z),
                    placement.world_x(z as f32),
                )
            })
            .collect();
        Some(LavaPool {
            cells,
            material: Material::solid(color).with_emissive(1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(kind: SceneryKind, style: StyleMode) -> TerrainInstance {
        let field = HeightField::new(11);
        MeshBuilder::new(&field)
            .build_terrain(&SceneryConfig::builtin(kind), style)
            .unwrap()
    }

    #[test]
    fn surface_has_upward_unit_normals() {
        let terrain = build(SceneryKind::Mountains, StyleMode::Smooth);
        let surface = terrain.body.as_surface().unwrap();
        let mesh = surface.mesh();
        assert_eq!(mesh.vertices.len(), 41 * 41);
        assert_eq!(mesh.triangle_count(), 40 * 40 * 2);
        for vertex in &mesh.vertices {
            let n: cgmath::Vector3<f32> = vertex.normal.into();
            assert!((n.magnitude() - 1.0).abs() < 1e-4);
            assert!(n.y > 0.0);
        }
    }

    #[test]
    fn voxel_capacity_covers_used_cells() {
        let terrain = build(SceneryKind::Volcano, StyleMode::Voxelized);
        let voxels = terrain.body.as_voxel().unwrap();
        assert_eq!(voxels.capacity(), 40 * 40 * 30);
        assert!(voxels.used() <= voxels.capacity());
        assert!(voxels.cells().iter().all(|c| c.y < voxels.max_height()));
    }

    #[test]
    fn only_lake_has_water() {
        for kind in SceneryKind::ALL {
            let terrain = build(kind, StyleMode::Smooth);
            assert_eq!(terrain.water.is_some(), kind == SceneryKind::Lake);
        }
        let lake = build(SceneryKind::Lake, StyleMode::Voxelized);
        assert_eq!(lake.water.unwrap().tiles.len(), 40 * 40);
    }

    #[test]
    fn feature_layers_follow_flags() {
        assert!(build(SceneryKind::Forest, StyleMode::Voxelized).foliage.is_some());
        assert!(build(SceneryKind::Desert, StyleMode::Voxelized).foliage.is_none());
        assert!(build(SceneryKind::Volcano, StyleMode::Smooth).lava.is_some());
        assert!(build(SceneryKind::Lake, StyleMode::Smooth).lava.is_none());
    }

    #[test]
    fn rejects_oversized_footprint() {
        let field = HeightField::new(1);
        let mut config = SceneryConfig::builtin(SceneryKind::Mountains);
        config.grid_size = 4096;
        let result = MeshBuilder::new(&field).build_terrain(&config, StyleMode::Voxelized);
        assert!(matches!(result, Err(ConfigError::InvalidParameter { field: "grid_size", .. })));
    }
}

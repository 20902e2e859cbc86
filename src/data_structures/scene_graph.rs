//! Scene graph and the scene root.
//!
//! Every piece of visible content (terrain, water, particles, lights, event
//! props) is a [`SceneNode`]. Top level nodes live in the [`SceneRoot`], which
//! hands out [`NodeId`]s on attach and keeps the [`ResourcePool`] in sync: the
//! resources of a node subtree are acquired when it is attached and released
//! when it is detached.
//!
//! # Key types
//!
//! - [`SceneNode`] the node trait, with [`ContainerNode`], [`InstancedNode`],
//!   [`SurfaceNode`] and [`LightNode`] implementations
//! - [`SceneRoot`] owner of the attached nodes and the resource pool
//! - [`NodeRole`] what a node is for, used to query the scene

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::{
    data_structures::{
        instance::{Instance, InstanceRaw},
        vertex::SurfaceMesh,
    },
    events::EventKind,
    registry::Rgb,
    render::{Instanced, LightDraw, Render, Surface},
    resources::{Geometry, Material, ResourcePool, ResourceRef},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Terrain,
    Water,
    Foliage,
    Lava,
    Precipitation,
    Embers,
    Light,
    Event(EventKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    /// Directional light shining from the node position towards the origin.
    Sun,
    Ambient,
    Point,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub kind: LightKind,
    pub color: Rgb,
    pub intensity: f32,
    /// Distance after which a point light has no effect.
    pub range: f32,
}

pub trait SceneNode {
    fn role(&self) -> NodeRole;

    fn get_local_transform(&self, idx: usize) -> Option<Instance>;

    fn set_local_transform(&mut self, idx: usize, instance: Instance);

    fn set_local_transform_all(&mut self, mutation: &mut dyn FnMut(usize, &mut Instance));

    fn get_world_transforms(&self) -> Vec<Instance>;

    /// Recompute world transforms of this node and its subtree below `parent`.
    fn update_world_transforms(&mut self, parent: &Instance);

    fn instance_count(&self) -> usize;

    fn get_children(&self) -> &[Box<dyn SceneNode>];

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>>;

    fn add_child(&mut self, child: Box<dyn SceneNode>);

    /// Resources referenced by this node itself, children excluded.
    fn resources(&self) -> Vec<ResourceRef<'_>>;

    fn light(&self) -> Option<&PointLight> {
        None
    }

    fn light_mut(&mut self) -> Option<&mut PointLight> {
        None
    }

    fn get_render(&self) -> Render<'_>;
}

fn compose_children<'a>(own: Render<'a>, children: &'a [Box<dyn SceneNode>]) -> Render<'a> {
    if children.is_empty() {
        return own;
    }
    let mut renders = Vec::with_capacity(children.len() + 1);
    renders.push(own);
    renders.extend(children.iter().map(|child| child.get_render()));
    Render::Composed(renders)
}

/// Groups children under one shared transform.
pub struct ContainerNode {
    role: NodeRole,
    transform: (Instance, Instance),
    children: Vec<Box<dyn SceneNode>>,
}

impl ContainerNode {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            transform: (Instance::default(), Instance::default()),
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, instance: Instance) -> Self {
        self.transform.0 = instance;
        self
    }

    pub fn with_child(mut self, child: Box<dyn SceneNode>) -> Self {
        self.children.push(child);
        self
    }
}

impl SceneNode for ContainerNode {
    fn role(&self) -> NodeRole {
        self.role
    }

    fn get_local_transform(&self, idx: usize) -> Option<Instance> {
        (idx == 0).then_some(self.transform.0)
    }

    fn set_local_transform(&mut self, idx: usize, instance: Instance) {
        if idx == 0 {
            self.transform.0 = instance;
        }
    }

    fn set_local_transform_all(&mut self, mutation: &mut dyn FnMut(usize, &mut Instance)) {
        mutation(0, &mut self.transform.0);
    }

    fn get_world_transforms(&self) -> Vec<Instance> {
        vec![self.transform.1]
    }

    fn update_world_transforms(&mut self, parent: &Instance) {
        self.transform.1 = parent * &self.transform.0;
        let world = self.transform.1;
        for child in self.children.iter_mut() {
            child.update_world_transforms(&world);
        }
    }

    fn instance_count(&self) -> usize {
        1
    }

    fn get_children(&self) -> &[Box<dyn SceneNode>] {
        &self.children
    }

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.children.push(child);
    }

    fn resources(&self) -> Vec<ResourceRef<'_>> {
        Vec::new()
    }

    fn get_render(&self) -> Render<'_> {
        compose_children(Render::None, &self.children)
    }
}

/// Many copies of one geometry with one material, drawn in a single call.
pub struct InstancedNode {
    role: NodeRole,
    geometry: Geometry,
    material: Material,
    instances: Vec<(Instance, Instance)>,
    raw: Vec<InstanceRaw>,
    capacity: usize,
    children: Vec<Box<dyn SceneNode>>,
}

impl InstancedNode {
    pub fn new(role: NodeRole, geometry: Geometry, material: Material, locals: Vec<Instance>) -> Self {
        let capacity = locals.len();
        Self::with_capacity(role, geometry, material, locals, capacity)
    }

    /// Reserve `capacity` slots while only the first `locals.len()` are used.
    pub fn with_capacity(
        role: NodeRole,
        geometry: Geometry,
        material: Material,
        locals: Vec<Instance>,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(locals.len());
        let mut instances = Vec::with_capacity(capacity);
        instances.extend(locals.into_iter().map(|local| (local, local)));
        let raw = instances.iter().map(|(_, world)| world.to_raw()).collect();
        Self {
            role,
            geometry,
            material,
            instances,
            raw,
            capacity,
            children: Vec::new(),
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl SceneNode for InstancedNode {
    fn role(&self) -> NodeRole {
        self.role
    }

    fn get_local_transform(&self, idx: usize) -> Option<Instance> {
        self.instances.get(idx).map(|(local, _)| *local)
    }

    fn set_local_transform(&mut self, idx: usize, instance: Instance) {
        match self.instances.get_mut(idx) {
            Some((local, _)) => *local = instance,
            None => warn!(
                "You tried to set instance {}, but there are only {} instances.",
                idx,
                self.instances.len()
            ),
        }
    }

    fn set_local_transform_all(&mut self, mutation: &mut dyn FnMut(usize, &mut Instance)) {
        self.instances
            .iter_mut()
            .enumerate()
            .for_each(|(idx, (local, _))| mutation(idx, local));
    }

    fn get_world_transforms(&self) -> Vec<Instance> {
        self.instances.iter().map(|(_, world)| *world).collect()
    }

    fn update_world_transforms(&mut self, parent: &Instance) {
        self.raw.clear();
        for (local, world) in self.instances.iter_mut() {
            *world = parent * local;
            self.raw.push(world.to_raw());
        }
        for child in self.children.iter_mut() {
            child.update_world_transforms(parent);
        }
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn get_children(&self) -> &[Box<dyn SceneNode>] {
        &self.children
    }

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.children.push(child);
    }

    fn resources(&self) -> Vec<ResourceRef<'_>> {
        vec![
            ResourceRef::Geometry(&self.geometry),
            ResourceRef::Material(&self.material),
        ]
    }

    fn get_render(&self) -> Render<'_> {
        let own = if self.raw.is_empty() {
            Render::None
        } else {
            let instanced = Instanced {
                geometry: &self.geometry,
                material: &self.material,
                instances: &self.raw,
            };
            if self.material.is_transparent() {
                Render::Transparent(instanced)
            } else {
                Render::Opaque(instanced)
            }
        };
        compose_children(own, &self.children)
    }
}

/// A generated triangle surface drawn once.
pub struct SurfaceNode {
    role: NodeRole,
    geometry: Geometry,
    mesh: SurfaceMesh,
    material: Material,
    transform: (Instance, Instance),
    raw: InstanceRaw,
    children: Vec<Box<dyn SceneNode>>,
}

impl SurfaceNode {
    pub fn new(role: NodeRole, key: u64, mesh: SurfaceMesh, material: Material) -> Self {
        let transform = Instance::default();
        Self {
            role,
            geometry: Geometry::Surface {
                key,
                vertices: mesh.vertices.len(),
                indices: mesh.indices.len(),
            },
            mesh,
            material,
            transform: (transform, transform),
            raw: transform.to_raw(),
            children: Vec::new(),
        }
    }

    pub fn mesh(&self) -> &SurfaceMesh {
        &self.mesh
    }
}

impl SceneNode for SurfaceNode {
    fn role(&self) -> NodeRole {
        self.role
    }

    fn get_local_transform(&self, idx: usize) -> Option<Instance> {
        (idx == 0).then_some(self.transform.0)
    }

    fn set_local_transform(&mut self, idx: usize, instance: Instance) {
        if idx == 0 {
            self.transform.0 = instance;
        }
    }

    fn set_local_transform_all(&mut self, mutation: &mut dyn FnMut(usize, &mut Instance)) {
        mutation(0, &mut self.transform.0);
    }

    fn get_world_transforms(&self) -> Vec<Instance> {
        vec![self.transform.1]
    }

    fn update_world_transforms(&mut self, parent: &Instance) {
        self.transform.1 = parent * &self.transform.0;
        self.raw = self.transform.1.to_raw();
        let world = self.transform.1;
        for child in self.children.iter_mut() {
            child.update_world_transforms(&world);
        }
    }

    fn instance_count(&self) -> usize {
        1
    }

    fn get_children(&self) -> &[Box<dyn SceneNode>] {
        &self.children
    }

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.children.push(child);
    }

    fn resources(&self) -> Vec<ResourceRef<'_>> {
        vec![
            ResourceRef::Geometry(&self.geometry),
            ResourceRef::Material(&self.material),
        ]
    }

    fn get_render(&self) -> Render<'_> {
        let own = Render::Surface(Surface {
            mesh: &self.mesh,
            material: &self.material,
            transform: self.raw,
        });
        compose_children(own, &self.children)
    }
}

pub struct LightNode {
    light: PointLight,
    transform: (Instance, Instance),
    children: Vec<Box<dyn SceneNode>>,
}

impl LightNode {
    pub fn new(light: PointLight, position: [f32; 3]) -> Self {
        let [x, y, z] = position;
        let local = Instance::at(x, y, z);
        Self {
            light,
            transform: (local, local),
            children: Vec::new(),
        }
    }
}

impl SceneNode for LightNode {
    fn role(&self) -> NodeRole {
        NodeRole::Light
    }

    fn get_local_transform(&self, idx: usize) -> Option<Instance> {
        (idx == 0).then_some(self.transform.0)
    }

    fn set_local_transform(&mut self, idx: usize, instance: Instance) {
        if idx == 0 {
            self.transform.0 = instance;
        }
    }

    fn set_local_transform_all(&mut self, mutation: &mut dyn FnMut(usize, &mut Instance)) {
        mutation(0, &mut self.transform.0);
    }

    fn get_world_transforms(&self) -> Vec<Instance> {
        vec![self.transform.1]
    }

    fn update_world_transforms(&mut self, parent: &Instance) {
        self.transform.1 = parent * &self.transform.0;
        let world = self.transform.1;
        for child in self.children.iter_mut() {
            child.update_world_transforms(&world);
        }
    }

    fn instance_count(&self) -> usize {
        1
    }

    fn get_children(&self) -> &[Box<dyn SceneNode>] {
        &self.children
    }

    fn get_children_mut(&mut self) -> &mut Vec<Box<dyn SceneNode>> {
        &mut self.children
    }

    fn add_child(&mut self, child: Box<dyn SceneNode>) {
        self.children.push(child);
    }

    fn resources(&self) -> Vec<ResourceRef<'_>> {
        Vec::new()
    }

    fn light(&self) -> Option<&PointLight> {
        Some(&self.light)
    }

    fn light_mut(&mut self) -> Option<&mut PointLight> {
        Some(&mut self.light)
    }

    fn get_render(&self) -> Render<'_> {
        let position = self.transform.1.position;
        let own = Render::Light(LightDraw {
            position: position.into(),
            light: self.light,
        });
        compose_children(own, &self.children)
    }
}

fn visit_resources(node: &dyn SceneNode, visit: &mut dyn FnMut(ResourceRef<'_>)) {
    for resource in node.resources() {
        visit(resource);
    }
    for child in node.get_children() {
        visit_resources(child.as_ref(), visit);
    }
}

/// Owner of every attached top level node.
#[derive(Default)]
pub struct SceneRoot {
    nodes: BTreeMap<NodeId, Box<dyn SceneNode>>,
    next_id: u64,
    pool: ResourcePool,
}

impl SceneRoot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node subtree and acquire everything it references.
    pub fn attach(&mut self, mut node: Box<dyn SceneNode>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let pool = &mut self.pool;
        visit_resources(node.as_ref(), &mut |resource: ResourceRef<'_>| pool.acquire(resource));
        node.update_world_transforms(&Instance::default());
        debug!("attached {:?} as {:?}", node.role(), id);
        self.nodes.insert(id, node);
        id
    }

    /// Detach a node subtree and release its resources. Unknown ids are ignored.
    pub fn detach(&mut self, id: NodeId) -> Option<Box<dyn SceneNode>> {
        let node = self.nodes.remove(&id)?;
        let pool = &mut self.pool;
        visit_resources(node.as_ref(), &mut |resource: ResourceRef<'_>| pool.release(resource));
        debug!("detached {:?} ({:?})", id, node.role());
        Some(node)
    }

    /// Detach everything that is still attached.
    pub fn clear(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            self.detach(id);
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&dyn SceneNode> {
        self.nodes.get(&id).map(|node| node.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Box<dyn SceneNode>> {
        self.nodes.get_mut(&id)
    }

    pub fn light_mut(&mut self, id: NodeId) -> Option<&mut PointLight> {
        self.nodes.get_mut(&id).and_then(|node| node.light_mut())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &dyn SceneNode)> {
        self.nodes.iter().map(|(id, node)| (*id, node.as_ref()))
    }

    pub fn ids_with_role(&self, role: NodeRole) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| node.role() == role)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn update_world_transforms(&mut self) {
        let root = Instance::default();
        for node in self.nodes.values_mut() {
            node.update_world_transforms(&root);
        }
    }

    pub fn get_render(&self) -> Vec<Render<'_>> {
        self.nodes.values().map(|node| node.get_render()).collect()
    }
}

//! Transient wildlife and sky events.
//!
//! An event owns one scene node for a fixed duration. The [`EventScheduler`]
//! guarantees at most one live instance per [`EventKind`]: triggering an
//! active kind does nothing, and the cleanup of an event runs exactly once,
//! either when its expiry timer fires or when the scheduler is disposed.
//!
//! # Key types
//!
//! - [`EventKind`] the closed set of events and their behaviour
//! - [`EventScheduler`] activation, per-tick animation and expiry
//! - [`Expiry`] the message produced when an expiry timer fires

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
    time::Duration,
};

use cgmath::{Rad, Rotation3};
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    clock::{TimerId, TimerQueue},
    data_structures::{
        instance::Instance,
        scene_graph::{
            ContainerNode, InstancedNode, LightKind, LightNode, NodeId, NodeRole, PointLight, SceneNode,
            SceneRoot,
        },
    },
    error::ConfigError,
    registry::rgb,
    resources::{Geometry, Material},
};

const BIRDS: usize = 5;
const STAR_TRAIL: usize = 20;
const STAR_VELOCITY: [f32; 3] = [15.0, -1.5, 0.0];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    BirdFlyby,
    UfoFlash,
    Deer,
    ShootingStar,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::BirdFlyby,
        EventKind::UfoFlash,
        EventKind::Deer,
        EventKind::ShootingStar,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::BirdFlyby => "bird_flyby",
            EventKind::UfoFlash => "ufo_flash",
            EventKind::Deer => "deer",
            EventKind::ShootingStar => "shooting_star",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            EventKind::BirdFlyby => Duration::from_millis(8000),
            EventKind::UfoFlash => Duration::from_millis(5000),
            EventKind::Deer => Duration::from_millis(10000),
            EventKind::ShootingStar => Duration::from_millis(3000),
        }
    }

    fn setup(&self, rng: &mut ChaCha8Rng) -> Box<dyn SceneNode> {
        let role = NodeRole::Event(*self);
        match self {
            EventKind::BirdFlyby => {
                let birds = (0..BIRDS)
                    .map(|_| Instance::at(rng.gen_range(-5.0..5.0), rng.gen_range(3.0..5.0), -10.0))
                    .collect();
                Box::new(InstancedNode::new(
                    role,
                    Geometry::cube(0.2),
                    Material::solid([0.0; 3]),
                    birds,
                ))
            }
            EventKind::UfoFlash => {
                let saucer = InstancedNode::new(
                    role,
                    Geometry::Cuboid { size: [1.2, 0.25, 1.2] },
                    Material::solid(rgb(0x9e9e9e)).with_surface(0.2, 0.8),
                    vec![Instance::new()],
                );
                let beam = LightNode::new(
                    PointLight {
                        kind: LightKind::Point,
                        color: rgb(0x00ff00),
                        intensity: 1.5,
                        range: 20.0,
                    },
                    [0.0, -0.5, 0.0],
                );
                Box::new(
                    ContainerNode::new(role)
                        .with_transform(Instance::at(0.0, 10.0, -5.0))
                        .with_child(Box::new(saucer))
                        .with_child(Box::new(beam)),
                )
            }
            EventKind::Deer => {
                let fur = Material::solid(rgb(0x8b4513));
                let body = InstancedNode::new(
                    role,
                    Geometry::Cuboid { size: [0.8, 0.6, 0.4] },
                    fur.clone(),
                    vec![Instance::new()],
                );
                let head = InstancedNode::new(role, Geometry::cube(0.3), fur.clone(), vec![Instance::at(0.5, 0.3, 0.0)]);
                let legs = [(-0.3, -0.1), (-0.3, 0.1), (0.3, -0.1), (0.3, 0.1)]
                    .into_iter()
                    .map(|(x, z)| Instance::at(x, -0.5, z))
                    .collect();
                let legs = InstancedNode::new(role, Geometry::Cuboid { size: [0.1, 0.4, 0.1] }, fur, legs);
                Box::new(
                    ContainerNode::new(role)
                        .with_transform(Instance::at(10.0, 0.0, -15.0))
                        .with_child(Box::new(body))
                        .with_child(Box::new(head))
                        .with_child(Box::new(legs)),
                )
            }
            EventKind::ShootingStar => {
                let trail = (0..STAR_TRAIL).map(|_| Instance::at(-25.0, 15.0, -30.0)).collect();
                Box::new(InstancedNode::new(
                    role,
                    Geometry::cube(0.08),
                    Material::solid([1.0; 3]).with_emissive(1.0),
                    trail,
                ))
            }
        }
    }

    /// Per-tick animation. `t` is the time since the event started in seconds.
    fn animate(&self, node: &mut dyn SceneNode, t: f32, dt: f32) {
        match self {
            EventKind::BirdFlyby => node.set_local_transform_all(&mut |i, bird| {
                let phase = t + i as f32;
                bird.position.x += phase.sin() * 1.2 * dt;
                bird.position.y += phase.cos() * 0.6 * dt;
                bird.position.z += 3.0 * dt;
                if bird.position.z > 5.0 {
                    bird.position.z = -10.0;
                }
            }),
            EventKind::UfoFlash => {
                node.set_local_transform(0, Instance::at(t.sin() * 5.0, 10.0, t.cos() * 5.0 - 5.0));
                let intensity = 1.5 + (t * 2.0).sin() * 0.5;
                if let Some(light) = node
                    .get_children_mut()
                    .iter_mut()
                    .find_map(|child| child.light_mut())
                {
                    light.intensity = intensity;
                }
            }
            EventKind::Deer => {
                node.set_local_transform(0, Instance::at(10.0 - 1.8 * t, 0.0, -15.0));
                if let Some(head) = node.get_children_mut().get_mut(1) {
                    head.set_local_transform(
                        0,
                        Instance {
                            rotation: cgmath::Quaternion::from_angle_x(Rad(t.sin() * 0.1)),
                            ..Instance::at(0.5, 0.3, 0.0)
                        },
                    );
                }
            }
            EventKind::ShootingStar => {
                let [vx, vy, vz] = STAR_VELOCITY;
                let head = [-25.0 + vx * t, 15.0 + vy * t, -30.0 + vz * t];
                node.set_local_transform_all(&mut |i, spark| {
                    let lag = i as f32 * 0.02;
                    let fade = 1.0 - i as f32 / STAR_TRAIL as f32;
                    *spark = Instance::at(head[0] - vx * lag, head[1] - vy * lag, head[2] - vz * lag)
                        .with_scale(fade, fade, fade);
                });
            }
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownEvent(s.to_string()))
    }
}

/// Produced when the expiry timer of an event fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expiry {
    pub kind: EventKind,
    pub timer: TimerId,
}

#[derive(Debug)]
struct ActiveEvent {
    node: NodeId,
    started: Duration,
    timer: TimerId,
}

pub struct EventScheduler {
    active: BTreeMap<EventKind, ActiveEvent>,
    timers: TimerQueue<EventKind>,
    cleanups: HashMap<EventKind, u32>,
    rng: ChaCha8Rng,
}

impl EventScheduler {
    pub fn new(seed: u64) -> Self {
        Self {
            active: BTreeMap::new(),
            timers: TimerQueue::new(),
            cleanups: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Start `kind` unless it is already running. Returns whether it started.
    pub fn trigger(&mut self, kind: EventKind, now: Duration, scene: &mut SceneRoot) -> bool {
        if self.active.contains_key(&kind) {
            debug!("{kind} is already active, ignoring trigger");
            return false;
        }
        let node = scene.attach(kind.setup(&mut self.rng));
        let timer = self.timers.arm(now + kind.duration(), kind);
        self.active.insert(
            kind,
            ActiveEvent {
                node,
                started: now,
                timer,
            },
        );
        info!("event {kind} started");
        true
    }

    /// Pick a kind uniformly at random and trigger it.
    pub fn trigger_random(&mut self, now: Duration, scene: &mut SceneRoot) -> Option<EventKind> {
        let kind = EventKind::ALL[self.rng.gen_range(0..EventKind::ALL.len())];
        self.trigger(kind, now, scene).then_some(kind)
    }

    pub fn take_due(&mut self, now: Duration) -> Vec<Expiry> {
        self.timers
            .take_due(now)
            .into_iter()
            .map(|(timer, kind)| Expiry { kind, timer })
            .collect()
    }

    /// Apply an expiry. Stale expiries of an already cleaned up run are ignored.
    pub fn expire(&mut self, expiry: Expiry, scene: &mut SceneRoot) -> bool {
        match self.active.get(&expiry.kind) {
            Some(active) if active.timer == expiry.timer => {
                self.cleanup(expiry.kind, scene);
                true
            }
            _ => false,
        }
    }

    pub fn animate(&mut self, now: Duration, dt: Duration, scene: &mut SceneRoot) {
        let dt = dt.as_secs_f32();
        for (kind, active) in self.active.iter() {
            let t = now.saturating_sub(active.started).as_secs_f32();
            if let Some(node) = scene.get_mut(active.node) {
                kind.animate(node.as_mut(), t, dt);
            }
        }
    }

    /// Expire due events, then animate the remaining ones.
    pub fn tick(&mut self, now: Duration, dt: Duration, scene: &mut SceneRoot) {
        for expiry in self.take_due(now) {
            self.expire(expiry, scene);
        }
        self.animate(now, dt, scene);
    }

    /// Cancel all timers and clean up every active event right away.
    pub fn dispose(&mut self, scene: &mut SceneRoot) {
        let kinds: Vec<EventKind> = self.active.keys().copied().collect();
        for kind in kinds {
            self.cleanup(kind, scene);
        }
        self.timers.clear();
    }

    fn cleanup(&mut self, kind: EventKind, scene: &mut SceneRoot) {
        if let Some(active) = self.active.remove(&kind) {
            self.timers.cancel(active.timer);
            scene.detach(active.node);
            *self.cleanups.entry(kind).or_default() += 1;
            info!("event {kind} ended");
        }
    }

    pub fn is_active(&self, kind: EventKind) -> bool {
        self.active.contains_key(&kind)
    }

    pub fn active_kinds(&self) -> Vec<EventKind> {
        self.active.keys().copied().collect()
    }

    pub fn node(&self, kind: EventKind) -> Option<NodeId> {
        self.active.get(&kind).map(|active| active.node)
    }

    /// How often the cleanup of `kind` has run.
    pub fn cleanup_count(&self, kind: EventKind) -> u32 {
        self.cleanups.get(&kind).copied().unwrap_or(0)
    }
}

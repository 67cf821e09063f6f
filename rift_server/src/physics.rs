//! Physics contract.
//!
//! The real engine (character controllers, sweeps, rigid bodies) is an
//! external collaborator; [`PhysicsWorld`] is exactly the surface the core
//! needs from it. [`KinematicWorld`] is a deterministic software backend —
//! static axis-aligned boxes and capsule translation — good enough to run
//! the server and to stage collision scenarios in tests. Distances are
//! center-line minus capsule radius, matching how a swept capsule reports
//! its first contact.

use std::collections::HashMap;

use rift_shared::math::{Quat, Vec3};

/// Collision classes carried in filter word 0.
pub mod filter {
    /// Solid geometry; blocks movement and rift steps.
    pub const DENSE: u32 = 0x1;
    /// Light clutter; rift steps pass through it.
    pub const MINOR: u32 = 0x2;
    pub const CHARACTER: u32 = 0x4;
    pub const PROJECTILE: u32 = 0x8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorHandle(pub u64);

/// Four words of per-shape filter data. Word 0 is the collision class; the
/// rest are free for game data. A query matches a shape when the word-0
/// masks intersect (query word 0 of zero matches everything).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterData(pub [u32; 4]);

impl FilterData {
    pub fn class(word0: u32) -> Self {
        Self([word0, 0, 0, 0])
    }

    fn matches(&self, shape: &FilterData) -> bool {
        self.0[0] == 0 || self.0[0] & shape.0[0] != 0
    }
}

/// What a filter callback decides about one candidate shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Skip entirely.
    Ignore,
    /// Report but do not block.
    Touch,
    /// Blocking geometry.
    Block,
}

/// Candidate shape as seen by a filter callback.
#[derive(Debug, Clone, Copy)]
pub struct ShapeInfo {
    pub entity_id: u64,
    pub filter: FilterData,
}

pub type FilterCallback<'a> = &'a dyn Fn(&ShapeInfo) -> FilterVerdict;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub entity_id: u64,
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

bitflags::bitflags! {
    /// Contact sides reported by a character move.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CollisionFlags: u8 {
        const SIDES = 0x1;
        const ABOVE = 0x2;
        const BELOW = 0x4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectileProps {
    pub radius: f32,
    pub speed: f32,
    pub max_range: f32,
}

/// The physics surface the simulation programs against.
pub trait PhysicsWorld: Send {
    fn create_character_controller(
        &mut self,
        player_id: u64,
        pos: Vec3,
        radius: f32,
        half_height: f32,
    ) -> ControllerHandle;

    fn release_character_controller(&mut self, handle: ControllerHandle);

    fn set_pose(&mut self, handle: ControllerHandle, pos: Vec3, orientation: Quat);

    fn get_position(&self, handle: ControllerHandle) -> Option<Vec3>;

    /// Moves a controller by `displacement`, resolving collisions against
    /// dense geometry. Returns the sides contacted.
    fn move_character(
        &mut self,
        handle: ControllerHandle,
        displacement: Vec3,
        dt_sec: f32,
    ) -> CollisionFlags;

    /// Advances the whole scene (projectiles, internal bookkeeping).
    fn step(&mut self, dt_sec: f32);

    /// First blocking contact of a swept capsule, or None for a clear path.
    #[allow(clippy::too_many_arguments)]
    fn sweep_capsule(
        &self,
        start: Vec3,
        orientation: Quat,
        radius: f32,
        half_height: f32,
        dir: Vec3,
        max_dist: f32,
        ignore_entity: u64,
        filter: FilterData,
        callback: Option<FilterCallback<'_>>,
    ) -> Option<Hit>;

    fn raycast_single(&self, start: Vec3, dir: Vec3, max_dist: f32, filter: FilterData)
        -> Option<Hit>;

    /// Spawns a projectile actor; `game_data` is the opaque u64 entity id
    /// stored in the actor's user-data slot.
    fn create_dynamic_projectile(
        &mut self,
        props: ProjectileProps,
        game_data: u64,
        start: Vec3,
        velocity: Vec3,
    ) -> ActorHandle;
}

// ─── Kinematic backend ───

#[derive(Debug)]
struct Controller {
    player_id: u64,
    pos: Vec3,
    #[allow(dead_code)]
    orientation: Quat,
    radius: f32,
    half_height: f32,
}

#[derive(Debug)]
struct Obstacle {
    entity_id: u64,
    min: Vec3,
    max: Vec3,
    filter: FilterData,
}

#[derive(Debug)]
struct Projectile {
    props: ProjectileProps,
    #[allow(dead_code)]
    game_data: u64,
    pos: Vec3,
    velocity: Vec3,
    traveled: f32,
}

/// Deterministic stand-in backend: static AABB obstacles, kinematic capsule
/// controllers, straight-line projectiles.
#[derive(Debug, Default)]
pub struct KinematicWorld {
    next_handle: u64,
    controllers: HashMap<u64, Controller>,
    obstacles: Vec<Obstacle>,
    projectiles: HashMap<u64, Projectile>,
}

impl KinematicWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a static box with the given collision class (word 0).
    pub fn add_aabb_obstacle(&mut self, entity_id: u64, min: Vec3, max: Vec3, class: u32) {
        self.obstacles.push(Obstacle {
            entity_id,
            min,
            max,
            filter: FilterData::class(class),
        });
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }

    fn alloc_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Nearest blocking hit along a ray against every matching shape, with
    /// candidate boxes inflated by `inflate` (the capsule radius).
    fn cast(
        &self,
        start: Vec3,
        dir: Vec3,
        max_dist: f32,
        inflate: f32,
        ignore_entity: u64,
        filter: FilterData,
        callback: Option<FilterCallback<'_>>,
    ) -> Option<Hit> {
        let dir = dir.normalized();
        if dir == Vec3::ZERO {
            return None;
        }

        let mut best: Option<Hit> = None;
        let mut consider = |info: ShapeInfo, min: Vec3, max: Vec3| {
            if info.entity_id == ignore_entity || !filter.matches(&info.filter) {
                return;
            }
            match callback.map_or(FilterVerdict::Block, |cb| cb(&info)) {
                FilterVerdict::Block => {}
                FilterVerdict::Ignore | FilterVerdict::Touch => return,
            }
            let grown = inflate;
            let min = min - Vec3::new(grown, grown, grown);
            let max = max + Vec3::new(grown, grown, grown);
            if let Some((t, normal)) = ray_aabb(start, dir, min, max) {
                if t <= max_dist && best.as_ref().is_none_or(|b| t < b.distance) {
                    best = Some(Hit {
                        entity_id: info.entity_id,
                        point: start + dir * t,
                        normal,
                        distance: t,
                    });
                }
            }
        };

        for ob in &self.obstacles {
            consider(
                ShapeInfo {
                    entity_id: ob.entity_id,
                    filter: ob.filter,
                },
                ob.min,
                ob.max,
            );
        }
        for ctl in self.controllers.values() {
            let half = Vec3::new(ctl.radius, ctl.radius, ctl.half_height + ctl.radius);
            consider(
                ShapeInfo {
                    entity_id: ctl.player_id,
                    filter: FilterData::class(filter::CHARACTER),
                },
                ctl.pos - half,
                ctl.pos + half,
            );
        }
        best
    }
}

impl PhysicsWorld for KinematicWorld {
    fn create_character_controller(
        &mut self,
        player_id: u64,
        pos: Vec3,
        radius: f32,
        half_height: f32,
    ) -> ControllerHandle {
        let handle = self.alloc_handle();
        self.controllers.insert(
            handle,
            Controller {
                player_id,
                pos,
                orientation: Quat::IDENTITY,
                radius,
                half_height,
            },
        );
        ControllerHandle(handle)
    }

    fn release_character_controller(&mut self, handle: ControllerHandle) {
        self.controllers.remove(&handle.0);
    }

    fn set_pose(&mut self, handle: ControllerHandle, pos: Vec3, orientation: Quat) {
        if let Some(ctl) = self.controllers.get_mut(&handle.0) {
            ctl.pos = pos;
            ctl.orientation = orientation;
        }
    }

    fn get_position(&self, handle: ControllerHandle) -> Option<Vec3> {
        self.controllers.get(&handle.0).map(|c| c.pos)
    }

    fn move_character(
        &mut self,
        handle: ControllerHandle,
        displacement: Vec3,
        _dt_sec: f32,
    ) -> CollisionFlags {
        let Some(ctl) = self.controllers.get(&handle.0) else {
            return CollisionFlags::empty();
        };
        let (start, radius, self_id) = (ctl.pos, ctl.radius, ctl.player_id);

        let dist = displacement.length();
        if dist <= f32::EPSILON {
            return CollisionFlags::empty();
        }
        let dir = displacement * (1.0 / dist);

        // Only dense geometry blocks a character move.
        let hit = self.cast(
            start,
            dir,
            dist,
            radius,
            self_id,
            FilterData::class(filter::DENSE),
            None,
        );

        let (end, flags) = match hit {
            Some(hit) => {
                let stop = (hit.distance - 1e-3).max(0.0);
                (start + dir * stop, CollisionFlags::SIDES)
            }
            None => (start + displacement, CollisionFlags::empty()),
        };
        if let Some(ctl) = self.controllers.get_mut(&handle.0) {
            ctl.pos = end;
        }
        flags
    }

    fn step(&mut self, dt_sec: f32) {
        self.projectiles.retain(|_, p| {
            let delta = p.velocity * dt_sec;
            p.pos = p.pos + delta;
            p.traveled += delta.length();
            p.traveled < p.props.max_range
        });
    }

    fn sweep_capsule(
        &self,
        start: Vec3,
        _orientation: Quat,
        radius: f32,
        _half_height: f32,
        dir: Vec3,
        max_dist: f32,
        ignore_entity: u64,
        filter: FilterData,
        callback: Option<FilterCallback<'_>>,
    ) -> Option<Hit> {
        self.cast(start, dir, max_dist, radius, ignore_entity, filter, callback)
    }

    fn raycast_single(
        &self,
        start: Vec3,
        dir: Vec3,
        max_dist: f32,
        filter: FilterData,
    ) -> Option<Hit> {
        self.cast(start, dir, max_dist, 0.0, 0, filter, None)
    }

    fn create_dynamic_projectile(
        &mut self,
        props: ProjectileProps,
        game_data: u64,
        start: Vec3,
        velocity: Vec3,
    ) -> ActorHandle {
        let handle = self.alloc_handle();
        self.projectiles.insert(
            handle,
            Projectile {
                props,
                game_data,
                pos: start,
                velocity,
                traveled: 0.0,
            },
        );
        ActorHandle(handle)
    }
}

/// Slab-method ray vs AABB. Returns entry distance and entry-face normal for
/// rays starting outside the box; a ray starting inside reports t = 0.
fn ray_aabb(origin: Vec3, dir: Vec3, min: Vec3, max: Vec3) -> Option<(f32, Vec3)> {
    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;
    let mut normal = Vec3::ZERO;

    let axes = [
        (origin.x, dir.x, min.x, max.x, Vec3::new(1.0, 0.0, 0.0)),
        (origin.y, dir.y, min.y, max.y, Vec3::new(0.0, 1.0, 0.0)),
        (origin.z, dir.z, min.z, max.z, Vec3::new(0.0, 0.0, 1.0)),
    ];
    for (o, d, lo, hi, axis) in axes {
        if d.abs() < f32::EPSILON {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let (mut t0, mut t1) = ((lo - o) * inv, (hi - o) * inv);
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        // Entry face opposes the travel direction along this axis.
        let n = axis * (-d.signum());
        if t0 > t_enter {
            t_enter = t0;
            normal = n;
        }
        t_exit = t_exit.min(t1);
        if t_enter > t_exit {
            return None;
        }
    }
    if t_exit < 0.0 {
        return None;
    }
    Some((t_enter.max(0.0), normal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall_at_y3(world: &mut KinematicWorld, class: u32) {
        world.add_aabb_obstacle(
            1000,
            Vec3::new(-5.0, 3.0, -1.0),
            Vec3::new(5.0, 3.5, 3.0),
            class,
        );
    }

    #[test]
    fn sweep_hits_dense_wall_accounting_for_radius() {
        let mut world = KinematicWorld::new();
        wall_at_y3(&mut world, filter::DENSE);
        let hit = world
            .sweep_capsule(
                Vec3::ZERO,
                Quat::IDENTITY,
                0.3,
                0.9,
                Vec3::new(0.0, 1.0, 0.0),
                5.0,
                1,
                FilterData::class(filter::DENSE),
                None,
            )
            .unwrap();
        assert!((hit.distance - 2.7).abs() < 1e-4, "distance {}", hit.distance);
        assert_eq!(hit.entity_id, 1000);
        assert!((hit.normal.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn callback_can_pass_through_minor_obstacles() {
        let mut world = KinematicWorld::new();
        wall_at_y3(&mut world, filter::MINOR);
        let cb = |info: &ShapeInfo| {
            if info.filter.0[0] & filter::DENSE != 0 {
                FilterVerdict::Block
            } else {
                FilterVerdict::Ignore
            }
        };
        let hit = world.sweep_capsule(
            Vec3::ZERO,
            Quat::IDENTITY,
            0.3,
            0.9,
            Vec3::new(0.0, 1.0, 0.0),
            5.0,
            1,
            FilterData::default(),
            Some(&cb),
        );
        assert!(hit.is_none());
    }

    #[test]
    fn move_character_stops_at_dense_wall() {
        let mut world = KinematicWorld::new();
        wall_at_y3(&mut world, filter::DENSE);
        let h = world.create_character_controller(1, Vec3::ZERO, 0.3, 0.9);
        let flags = world.move_character(h, Vec3::new(0.0, 10.0, 0.0), 0.1);
        assert!(flags.contains(CollisionFlags::SIDES));
        let pos = world.get_position(h).unwrap();
        assert!(pos.y <= 2.7 && pos.y > 2.5, "pos.y = {}", pos.y);
    }

    #[test]
    fn sweep_can_hit_other_characters() {
        let mut world = KinematicWorld::new();
        world.create_character_controller(1, Vec3::ZERO, 0.3, 0.9);
        world.create_character_controller(2, Vec3::new(0.0, 2.0, 0.0), 0.3, 0.9);
        let hit = world
            .sweep_capsule(
                Vec3::ZERO,
                Quat::IDENTITY,
                0.3,
                0.9,
                Vec3::new(0.0, 1.0, 0.0),
                3.0,
                1,
                FilterData::class(filter::CHARACTER),
                None,
            )
            .unwrap();
        assert_eq!(hit.entity_id, 2);
    }

    #[test]
    fn projectiles_despawn_past_max_range() {
        let mut world = KinematicWorld::new();
        world.create_dynamic_projectile(
            ProjectileProps {
                radius: 0.1,
                speed: 10.0,
                max_range: 5.0,
            },
            42,
            Vec3::ZERO,
            Vec3::new(0.0, 10.0, 0.0),
        );
        assert_eq!(world.projectile_count(), 1);
        world.step(0.25);
        assert_eq!(world.projectile_count(), 1);
        world.step(0.5);
        assert_eq!(world.projectile_count(), 0);
    }

    #[test]
    fn ray_from_inside_box_reports_zero_distance() {
        let (t, _) = ray_aabb(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
        )
        .unwrap();
        assert_eq!(t, 0.0);
    }
}

//! Mover store: the kinematic character controller. The hardest module —
//! grounded on `physics_world_bullet.cpp`'s `Mover` struct and the three
//! sweep phases in its `update()`, with rapier3d sweep/query idiom from
//! `stefnotch-cgue23-cat-to-the-past/physics/src/physics_context.rs` and
//! `other_examples/57179283_*-astraweave-physics` (manual cast-and-deflect
//! character movement, not rapier3d's own `control::KinematicCharacterController`
//! — see SPEC_FULL.md §2 for why that built-in is not used here).

use nalgebra::{Isometry3, UnitQuaternion, Vector3};
use rapier3d::prelude::*;

use crate::config::{CollisionFilter, PhysicsConfigResource, StringId32};
use crate::ids::{InstanceStore, MoverInstance, UnitId};

/// Same hand-rolled bitflags shape as `config::bitflags_lite!`, duplicated
/// rather than shared because the two live in different modules and three
/// bits does not earn a shared macro module.
macro_rules! bitflags_mover {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($ty);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn set(&mut self, other: Self) {
                self.0 |= other.0;
            }
        }
    };
}

bitflags_mover! {
    pub struct MoverFlags: u32 {
        const COLLIDES_SIDES = 1 << 0;
        const COLLIDES_UP = 1 << 1;
        const COLLIDES_DOWN = 1 << 2;
    }
}

const MAX_PENETRATION_RECOVERY_ITERATIONS: u32 = 4;
const MAX_STRAFE_ITERATIONS: u32 = 10;
const RESIDUAL_EPSILON_SQ: f32 = 1.0e-8;
const RECOVERY_PUSH_FACTOR: f32 = 0.2;

pub struct MoverDesc {
    pub radius: f32,
    pub height: f32,
    pub max_slope_angle: f32,
    pub step_height: f32,
    pub collision_filter: StringId32,
    pub center: Vector3<f32>,
    pub up: Vector3<f32>,
}

pub struct MoverComponent {
    pub ghost: ColliderHandle,
    radius: f32,
    half_height: f32,
    center: Vector3<f32>,
    up: Vector3<f32>,
    max_slope_cosine: f32,
    step_height: f32,
    max_penetration_depth: f32,
    filter: CollisionFilter,
    /// World position of the capsule's own center (unit position + `center`).
    position: Vector3<f32>,
    rotation: UnitQuaternion<f32>,
    flags: MoverFlags,
    was_on_ground: bool,
}

impl MoverComponent {
    pub fn flags(&self) -> MoverFlags {
        self.flags
    }

    pub fn position(&self) -> Vector3<f32> {
        self.position
    }

    fn isometry(&self) -> Isometry3<f32> {
        Isometry3::from_parts(self.position.into(), self.rotation)
    }
}

fn capsule_shape(radius: f32, half_height: f32) -> SharedShape {
    SharedShape::capsule_y(half_height, radius)
}

/// Rotation carrying the capsule's local Y axis (rapier3d's `capsule_y`
/// convention) onto the mover's configured `up` axis.
fn up_rotation(up: Vector3<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::rotation_between(&Vector3::y(), &up).unwrap_or_else(UnitQuaternion::identity)
}

#[derive(Default)]
pub struct MoverStore {
    store: InstanceStore<MoverComponent>,
}

impl MoverStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        unit: UnitId,
        desc: &MoverDesc,
        world_position: Vector3<f32>,
        config: &PhysicsConfigResource,
        colliders: &mut ColliderSet,
    ) -> MoverInstance {
        assert!(
            !self.store.contains(unit),
            "mover_create: unit {unit:?} already has a mover"
        );
        let half_height = 0.5 * desc.height;
        let rotation = up_rotation(desc.up);
        let position = world_position + desc.center;
        let filter = config.filter(desc.collision_filter);

        let shape = capsule_shape(desc.radius, half_height);
        let isometry = Isometry3::from_parts(position.into(), rotation);
        let collider = ColliderBuilder::new(shape)
            .position(isometry)
            .sensor(true)
            .active_collision_types(ActiveCollisionTypes::all())
            .collision_groups(filter.to_interaction_groups())
            .user_data(crate::actor::SENTINEL_USER_DATA)
            .build();
        let ghost = colliders.insert(collider);

        let index = self.store.insert(
            unit,
            MoverComponent {
                ghost,
                radius: desc.radius,
                half_height,
                center: desc.center,
                up: desc.up.normalize(),
                max_slope_cosine: desc.max_slope_angle.cos(),
                step_height: desc.step_height,
                max_penetration_depth: 0.02,
                filter,
                position,
                rotation,
                flags: MoverFlags::empty(),
                was_on_ground: false,
            },
        );
        MoverInstance::new(index)
    }

    pub fn destroy(&mut self, instance: MoverInstance, colliders: &mut ColliderSet) -> Option<(UnitId, u32)> {
        assert!(instance.is_valid(), "mover_destroy on sentinel instance");
        let (component, moved) = self.store.remove(instance.index);
        colliders.remove(component.ghost, &mut IslandManager::new(), &mut RigidBodySet::new(), false);
        moved
    }

    pub fn instance_of(&self, unit: UnitId) -> MoverInstance {
        MoverInstance::new(self.store.index_of(unit))
    }

    pub fn unit_of(&self, instance: MoverInstance) -> UnitId {
        self.store.unit_at(instance.index)
    }

    pub fn component(&self, instance: MoverInstance) -> &MoverComponent {
        assert!(instance.is_valid(), "mover op on sentinel instance");
        self.store.get(instance.index)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn query_filter(&self, ghost: ColliderHandle) -> QueryFilter<'static> {
        QueryFilter::new().exclude_sensors().exclude_collider(ghost)
    }

    /// Phase 1+2+3 of `mover_move`, plus the post-move recovery pass
    /// (SPEC_FULL.md §4.3).
    pub fn mover_move(
        &mut self,
        instance: MoverInstance,
        delta: Vector3<f32>,
        bodies: &RigidBodySet,
        colliders: &mut ColliderSet,
        query_pipeline: &mut QueryPipeline,
    ) {
        assert!(instance.is_valid(), "mover_move on sentinel instance");
        let index = instance.index;

        self.store.get_mut(index).flags = MoverFlags::empty();

        let up = self.store.get(index).up;
        let vertical_delta = delta.dot(&up);
        let horizontal_delta = delta - up * vertical_delta;

        let mut vertical_remaining = vertical_delta;
        self.step_up(index, &mut vertical_remaining, bodies, colliders, query_pipeline);
        self.step_forward_and_strafe(index, horizontal_delta, bodies, colliders, query_pipeline);
        self.step_down(index, vertical_remaining, bodies, colliders, query_pipeline);

        self.sync_ghost_position(index, colliders);
        for _ in 0..MAX_PENETRATION_RECOVERY_ITERATIONS {
            query_pipeline.update(colliders);
            if !self.recover_from_penetration(index, bodies, colliders, query_pipeline) {
                break;
            }
            self.sync_ghost_position(index, colliders);
        }

        let on_ground = self.store.get(index).flags.contains(MoverFlags::COLLIDES_DOWN);
        self.store.get_mut(index).was_on_ground = on_ground;
    }

    fn step_up(
        &mut self,
        index: u32,
        vertical_remaining: &mut f32,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        query_pipeline: &mut QueryPipeline,
    ) {
        let up = self.store.get(index).up;
        let step_height = self.store.get(index).step_height;
        let up_distance = step_height + vertical_remaining.max(0.0);
        if up_distance <= 0.0 {
            return;
        }

        let shape = capsule_shape(self.store.get(index).radius, self.store.get(index).half_height);
        let pos = self.store.get(index).isometry();
        let vel = up * up_distance;
        let ghost = self.store.get(index).ghost;
        let filter = self.query_filter(ghost);

        let hit = query_pipeline.cast_shape(bodies, colliders, &pos, &vel, &shape, 1.0, true, filter);
        match hit {
            Some((_, toi)) => {
                let advanced = up_distance * toi.toi;
                self.store.get_mut(index).position += up * advanced;
                if toi.normal1.dot(&up) > 0.0 {
                    self.store.get_mut(index).flags.set(MoverFlags::COLLIDES_UP);
                    if *vertical_remaining > 0.0 {
                        *vertical_remaining = 0.0;
                    }
                    self.recovery_loop(index, bodies, colliders, query_pipeline);
                }
            }
            None => {
                self.store.get_mut(index).position += up * up_distance;
            }
        }
    }

    fn step_forward_and_strafe(
        &mut self,
        index: u32,
        horizontal_delta: Vector3<f32>,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        query_pipeline: &mut QueryPipeline,
    ) {
        if horizontal_delta.norm_squared() < RESIDUAL_EPSILON_SQ {
            return;
        }
        let original_dir = horizontal_delta.normalize();
        let mut residual = horizontal_delta;
        let ghost = self.store.get(index).ghost;
        let filter = self.query_filter(ghost);

        for _ in 0..MAX_STRAFE_ITERATIONS {
            if residual.norm_squared() < RESIDUAL_EPSILON_SQ {
                break;
            }
            let shape = capsule_shape(self.store.get(index).radius, self.store.get(index).half_height);
            let pos = self.store.get(index).isometry();

            let hit = query_pipeline.cast_shape(bodies, colliders, &pos, &residual, &shape, 1.0, true, filter);
            match hit {
                Some((_, toi)) => {
                    self.store.get_mut(index).flags.set(MoverFlags::COLLIDES_SIDES);
                    self.store.get_mut(index).position += residual * toi.toi;

                    let normal = toi.normal1;
                    let parallel = normal * residual.dot(&normal);
                    let perpendicular = residual - parallel;
                    let remaining_fraction = 1.0 - toi.toi;
                    let next = perpendicular * remaining_fraction;

                    if next.dot(&original_dir) < 0.0 {
                        break;
                    }
                    residual = next;
                }
                None => {
                    self.store.get_mut(index).position += residual;
                    break;
                }
            }
        }
    }

    fn step_down(
        &mut self,
        index: u32,
        vertical_remaining: f32,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        query_pipeline: &mut QueryPipeline,
    ) {
        if vertical_remaining > 0.0 {
            return;
        }
        let up = self.store.get(index).up;
        let step_height = self.store.get(index).step_height;
        let max_slope_cosine = self.store.get(index).max_slope_cosine;
        let drop_distance = step_height + vertical_remaining.abs();
        if drop_distance <= 0.0 {
            return;
        }
        let was_on_ground = self.store.get(index).was_on_ground;
        let ghost = self.store.get(index).ghost;
        let filter = self.query_filter(ghost);
        let shape = capsule_shape(self.store.get(index).radius, self.store.get(index).half_height);
        let pos = self.store.get(index).isometry();
        let down = -up;

        let short = query_pipeline.cast_shape(bodies, colliders, &pos, &(down * drop_distance), &shape, 1.0, true, filter);
        let long = query_pipeline.cast_shape(
            bodies,
            colliders,
            &pos,
            &(down * drop_distance * 2.0),
            &shape,
            1.0,
            true,
            filter,
        );

        // When grounded last frame and only the long probe finds a floor,
        // prefer the short, snapped drop over the smoothly interpolated long
        // one — avoids a one-frame "floaty" descent over small ledges.
        let chosen = match (short, long) {
            (Some((_, toi)), _) => Some((drop_distance, toi)),
            (None, Some((_, toi))) if was_on_ground => Some((drop_distance, toi)),
            (None, Some((_, toi))) => Some((drop_distance * 2.0, toi)),
            (None, None) => None,
        };

        match chosen {
            Some((distance, toi)) => {
                let floor_like = toi.normal1.dot(&up) >= max_slope_cosine;
                self.store.get_mut(index).position += down * (distance * toi.toi);
                if floor_like {
                    self.store.get_mut(index).flags.set(MoverFlags::COLLIDES_DOWN);
                }
                // Steep surfaces stop the drop (treated as a wall) but do not
                // set COLLIDES_DOWN — SPEC_FULL.md §8 property 9.
            }
            None => {
                self.store.get_mut(index).position += down * vertical_remaining.abs();
            }
        }
    }

    /// §4.3's recovery loop: refresh broadphase, scan intersecting shapes,
    /// nudge along the deepest penetrations, up to four iterations.
    fn recovery_loop(
        &mut self,
        index: u32,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        query_pipeline: &mut QueryPipeline,
    ) {
        for _ in 0..MAX_PENETRATION_RECOVERY_ITERATIONS {
            query_pipeline.update(colliders);
            if !self.recover_from_penetration(index, bodies, colliders, query_pipeline) {
                break;
            }
        }
    }

    /// Returns `true` if any displacement was applied this call.
    fn recover_from_penetration(
        &mut self,
        index: u32,
        bodies: &RigidBodySet,
        colliders: &ColliderSet,
        query_pipeline: &mut QueryPipeline,
    ) -> bool {
        let radius = self.store.get(index).radius;
        let half_height = self.store.get(index).half_height;
        let shape = capsule_shape(radius, half_height);
        let pos = self.store.get(index).isometry();
        let ghost = self.store.get(index).ghost;
        let max_penetration_depth = self.store.get(index).max_penetration_depth;
        let filter = self.query_filter(ghost);

        let mut push = Vector3::zeros();
        let mut moved = false;

        query_pipeline.intersections_with_shape(bodies, colliders, &pos, &shape, filter, |other_handle| {
            let Some(other) = colliders.get(other_handle) else {
                return true;
            };
            if let Ok(Some(contact)) = rapier3d::parry::query::contact(
                &pos,
                &shape,
                other.position(),
                other.shape(),
                max_penetration_depth,
            ) {
                if contact.dist < -max_penetration_depth {
                    push += contact.normal1.into_inner() * (-contact.dist) * RECOVERY_PUSH_FACTOR;
                    moved = true;
                }
            }
            true
        });

        if moved {
            self.store.get_mut(index).position += push;
        }
        moved
    }

    fn sync_ghost_position(&self, index: u32, colliders: &mut ColliderSet) {
        let component = self.store.get(index);
        if let Some(collider) = colliders.get_mut(component.ghost) {
            collider.set_position(component.isometry());
        }
    }

    // ---- parameter mutators (§4.3.5) ----

    pub fn set_radius(&mut self, instance: MoverInstance, radius: f32, colliders: &mut ColliderSet, bodies: &RigidBodySet, query_pipeline: &mut QueryPipeline) {
        self.rebuild_shape(instance, radius, self.store.get(instance.index).half_height, colliders, bodies, query_pipeline);
    }

    pub fn set_height(&mut self, instance: MoverInstance, height: f32, colliders: &mut ColliderSet, bodies: &RigidBodySet, query_pipeline: &mut QueryPipeline) {
        self.rebuild_shape(instance, self.store.get(instance.index).radius, 0.5 * height, colliders, bodies, query_pipeline);
    }

    fn rebuild_shape(
        &mut self,
        instance: MoverInstance,
        radius: f32,
        half_height: f32,
        colliders: &mut ColliderSet,
        bodies: &RigidBodySet,
        query_pipeline: &mut QueryPipeline,
    ) {
        assert!(instance.is_valid(), "mover op on sentinel instance");
        let index = instance.index;
        self.store.get_mut(index).radius = radius;
        self.store.get_mut(index).half_height = half_height;
        let shape = capsule_shape(radius, half_height);
        let ghost = self.store.get(index).ghost;
        if let Some(collider) = colliders.get_mut(ghost) {
            collider.set_shape(shape);
        }
        self.recovery_loop(index, bodies, colliders, query_pipeline);
    }

    pub fn set_center(&mut self, instance: MoverInstance, center: Vector3<f32>, colliders: &mut ColliderSet) {
        assert!(instance.is_valid(), "mover op on sentinel instance");
        let index = instance.index;
        let delta = center - self.store.get(index).center;
        self.store.get_mut(index).center = center;
        self.store.get_mut(index).position += delta;
        self.sync_ghost_position(index, colliders);
    }

    /// Teleports the mover so its capsule center sits at `world_position +
    /// center`, and its up-axis rotation is rebuilt from `up` — used by
    /// `PhysicsWorld::update_actor_world_poses` (SPEC_FULL.md §4.7). Does not
    /// run penetration recovery; the caller is responsible for a sane target.
    pub fn set_position(&mut self, instance: MoverInstance, world_position: Vector3<f32>, rotation: UnitQuaternion<f32>, colliders: &mut ColliderSet) {
        assert!(instance.is_valid(), "mover op on sentinel instance");
        let index = instance.index;
        let center = self.store.get(index).center;
        self.store.get_mut(index).position = world_position + center;
        self.store.get_mut(index).rotation = rotation;
        self.sync_ghost_position(index, colliders);
    }

    pub fn set_collision_filter(&mut self, instance: MoverInstance, filter: CollisionFilter, colliders: &mut ColliderSet) {
        assert!(instance.is_valid(), "mover op on sentinel instance");
        let index = instance.index;
        self.store.get_mut(index).filter = filter;
        let ghost = self.store.get(index).ghost;
        if let Some(collider) = colliders.get_mut(ghost) {
            collider.set_collision_groups(filter.to_interaction_groups());
        }
    }

    pub fn collides_sides(&self, instance: MoverInstance) -> bool {
        self.component(instance).flags.contains(MoverFlags::COLLIDES_SIDES)
    }

    pub fn collides_up(&self, instance: MoverInstance) -> bool {
        self.component(instance).flags.contains(MoverFlags::COLLIDES_UP)
    }

    pub fn collides_down(&self, instance: MoverInstance) -> bool {
        self.component(instance).flags.contains(MoverFlags::COLLIDES_DOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GLOBAL_CONFIG_ID;

    fn flat_floor(colliders: &mut ColliderSet, bodies: &mut RigidBodySet) {
        let floor = ColliderBuilder::cuboid(50.0, 0.5, 50.0)
            .translation(Vector3::new(0.0, -0.5, 0.0))
            .build();
        colliders.insert(floor);
        let _ = bodies;
    }

    fn make_mover(store: &mut MoverStore, position: Vector3<f32>, colliders: &mut ColliderSet) -> MoverInstance {
        let config = PhysicsConfigResource::new();
        let desc = MoverDesc {
            radius: 0.3,
            height: 1.8,
            max_slope_angle: 45.0_f32.to_radians(),
            step_height: 0.3,
            collision_filter: GLOBAL_CONFIG_ID,
            center: Vector3::zeros(),
            up: Vector3::y(),
        };
        store.create(UnitId(1), &desc, position, &config, colliders)
    }

    #[test]
    fn mover_move_walks_across_flat_floor() {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        flat_floor(&mut colliders, &mut bodies);
        let mut store = MoverStore::new();
        let instance = make_mover(&mut store, Vector3::new(0.0, 0.9, 0.0), &mut colliders);

        let mut query_pipeline = QueryPipeline::new();
        query_pipeline.update(&colliders);

        store.mover_move(instance, Vector3::new(1.0, 0.0, 0.0), &bodies, &mut colliders, &mut query_pipeline);

        let pos = store.component(instance).position();
        assert!((pos.x - 1.0).abs() < 0.1, "expected x ~= 1.0, got {}", pos.x);
        assert!(store.collides_down(instance));
        assert!(!store.collides_sides(instance));
    }

    #[test]
    fn mover_cannot_be_created_twice_on_same_unit() {
        let mut colliders = ColliderSet::new();
        let mut store = MoverStore::new();
        make_mover(&mut store, Vector3::new(0.0, 0.9, 0.0), &mut colliders);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            make_mover(&mut store, Vector3::new(0.0, 0.9, 0.0), &mut colliders)
        }));
        assert!(result.is_err());
    }

    #[test]
    fn wall_slide_sets_collides_sides_and_deflects() {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        flat_floor(&mut colliders, &mut bodies);
        let wall = ColliderBuilder::cuboid(0.1, 2.0, 50.0)
            .translation(Vector3::new(0.5, 1.0, 0.0))
            .build();
        colliders.insert(wall);

        let mut store = MoverStore::new();
        let instance = make_mover(&mut store, Vector3::new(0.0, 0.9, 0.0), &mut colliders);
        let mut query_pipeline = QueryPipeline::new();
        query_pipeline.update(&colliders);

        store.mover_move(instance, Vector3::new(1.0, 0.0, 0.0), &bodies, &mut colliders, &mut query_pipeline);

        assert!(store.collides_sides(instance));
        let pos = store.component(instance).position();
        assert!(pos.x < 0.5, "expected to stop before the wall, got x={}", pos.x);
    }

    #[test]
    fn mover_steps_up_onto_a_low_ledge_without_collides_up() {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        flat_floor(&mut colliders, &mut bodies);
        // Top surface at y=0.1, well under the mover's step_height of 0.3.
        let ledge = ColliderBuilder::cuboid(2.0, 0.5, 50.0)
            .translation(Vector3::new(3.0, -0.4, 0.0))
            .build();
        colliders.insert(ledge);

        let mut store = MoverStore::new();
        // Resting exactly on the main floor (bottom at y=0), clear of any
        // initial embedding, so the step-up probe's effect is unambiguous.
        let instance = make_mover(&mut store, Vector3::new(0.0, 1.2, 0.0), &mut colliders);
        let mut query_pipeline = QueryPipeline::new();
        query_pipeline.update(&colliders);

        store.mover_move(instance, Vector3::new(2.0, 0.0, 0.0), &bodies, &mut colliders, &mut query_pipeline);

        let pos = store.component(instance).position();
        assert!((pos.x - 2.0).abs() < 0.1, "expected x ~= 2.0, got {}", pos.x);
        assert!(!store.collides_up(instance));
        assert!(store.collides_down(instance));
    }

    #[test]
    fn slope_steeper_than_max_slope_angle_is_not_floor_like() {
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        // A wide, thin slab tilted 70 degrees from horizontal around Z --
        // steeper than the mover's 45 degree max_slope_angle -- so its
        // normal is far from the up axis even near the slab's center.
        let slope = ColliderBuilder::cuboid(5.0, 0.1, 5.0)
            .rotation(Vector3::z() * 70.0_f32.to_radians())
            .build();
        colliders.insert(slope);

        let mut store = MoverStore::new();
        let instance = make_mover(&mut store, Vector3::new(0.0, 2.0, 0.0), &mut colliders);
        let mut query_pipeline = QueryPipeline::new();
        query_pipeline.update(&colliders);

        store.mover_move(instance, Vector3::new(0.0, -3.0, 0.0), &bodies, &mut colliders, &mut query_pipeline);

        assert!(
            !store.collides_down(instance),
            "a slope steeper than max_slope_angle must not be reported as floor-like"
        );
        let pos = store.component(instance).position();
        assert!(pos.y > -0.3, "expected the mover to stop against the slope, got y={}", pos.y);
    }
}

//! Actor store: rigid bodies built from a collider plus a
//! [`PhysicsConfigResource`]-resolved class/material/filter, with the
//! "activate-before-write" mutator rule from SPEC_FULL.md §4.2.
//!
//! Grounded on `physics_world_bullet.cpp`'s actor section (exact method
//! surface confirmed against `physics_world_noop.cpp`) and
//! `stefnotch-cgue23-cat-to-the-past/physics/src/physics_context.rs` for
//! rapier3d builder idiom (`RigidBodyBuilder`, `set_body_type`).

use nalgebra::{Isometry3, UnitQuaternion, Vector3};
use rapier3d::prelude::*;

use crate::collider::ColliderStore;
use crate::config::{ActorClass, CollisionFilter, Material, PhysicsConfigResource, StringId32};
use crate::ids::{ActorInstance, ColliderInstance, InstanceStore, UnitId, INVALID_INDEX};

/// Lock-flag bits from the per-unit actor descriptor (SPEC_FULL.md §6).
pub const LOCK_TX: u32 = 1 << 0;
pub const LOCK_TY: u32 = 1 << 1;
pub const LOCK_TZ: u32 = 1 << 2;
pub const LOCK_RX: u32 = 1 << 3;
pub const LOCK_RY: u32 = 1 << 4;
pub const LOCK_RZ: u32 = 1 << 5;

pub struct ActorDesc {
    pub actor_class: StringId32,
    pub material: StringId32,
    pub collision_filter: StringId32,
    pub mass: f32,
    pub lock_flags: u32,
}

pub struct ActorComponent {
    pub rigid_body: RigidBodyHandle,
    pub collider: ColliderHandle,
    pub is_trigger: bool,
    pub disable_gravity: bool,
}

/// Writes `instance` into the rigid-body and collider `user_data` fields so
/// that event/raycast callbacks can recover the owning [`ActorInstance`]
/// from a rapier handle — the Rust analogue of the original engine's
/// `userObjectPointer`.
pub fn encode_user_data(index: u32) -> u128 {
    index as u128
}

pub fn decode_user_data(data: u128) -> u32 {
    data as u32
}

/// Sentinel `user_data`, carried by mover ghosts (SPEC_FULL.md §3, §4.5).
pub const SENTINEL_USER_DATA: u128 = INVALID_INDEX as u128;

#[derive(Default)]
pub struct ActorStore {
    store: InstanceStore<ActorComponent>,
}

impl ActorStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        unit: UnitId,
        desc: &ActorDesc,
        world_pose: Isometry3<Real>,
        config: &PhysicsConfigResource,
        colliders_store: &ColliderStore,
        collider_instance: ColliderInstance,
        bodies: &mut RigidBodySet,
        colliders: &mut ColliderSet,
    ) -> ActorInstance {
        assert!(
            collider_instance.is_valid(),
            "actor_create_instances: unit {unit:?} has no collider"
        );

        let class: &ActorClass = config.actor_class(desc.actor_class);
        let material: Material = config.material(desc.material);
        let filter: CollisionFilter = config.filter(desc.collision_filter);

        let is_dynamic = class.is_dynamic() && !class.is_kinematic() && desc.mass != 0.0;
        let body_type = if class.is_kinematic() {
            RigidBodyType::KinematicPositionBased
        } else if is_dynamic {
            RigidBodyType::Dynamic
        } else {
            RigidBodyType::Fixed
        };

        let mut locked_axes = LockedAxes::empty();
        if desc.lock_flags & LOCK_TX != 0 {
            locked_axes |= LockedAxes::TRANSLATION_LOCKED_X;
        }
        if desc.lock_flags & LOCK_TY != 0 {
            locked_axes |= LockedAxes::TRANSLATION_LOCKED_Y;
        }
        if desc.lock_flags & LOCK_TZ != 0 {
            locked_axes |= LockedAxes::TRANSLATION_LOCKED_Z;
        }
        if desc.lock_flags & LOCK_RX != 0 {
            locked_axes |= LockedAxes::ROTATION_LOCKED_X;
        }
        if desc.lock_flags & LOCK_RY != 0 {
            locked_axes |= LockedAxes::ROTATION_LOCKED_Y;
        }
        if desc.lock_flags & LOCK_RZ != 0 {
            locked_axes |= LockedAxes::ROTATION_LOCKED_Z;
        }

        let mut builder = RigidBodyBuilder::new(body_type)
            .position(world_pose)
            .linear_damping(class.linear_damping)
            .angular_damping(class.angular_damping)
            .locked_axes(locked_axes);

        if body_type == RigidBodyType::KinematicPositionBased {
            builder = builder.can_sleep(false);
        }
        if is_dynamic {
            builder = builder.additional_mass(desc.mass);
        }

        let rigid_body = bodies.insert(builder.build());

        let shape = colliders_store.shape(collider_instance).clone();
        let is_trigger = class.is_trigger();
        let mut collider_builder = ColliderBuilder::new(shape)
            .friction(material.friction)
            .restitution(material.restitution)
            .collision_groups(filter.to_interaction_groups())
            .sensor(is_trigger)
            .active_events(ActiveEvents::COLLISION_EVENTS);

        if is_trigger {
            collider_builder = collider_builder.active_collision_types(ActiveCollisionTypes::all());
        }

        let index = self.store.len() as u32;
        collider_builder = collider_builder.user_data(encode_user_data(index));
        let collider = colliders.insert_with_parent(collider_builder, rigid_body, bodies);

        if let Some(body) = bodies.get_mut(rigid_body) {
            body.user_data = encode_user_data(index);
        }

        let actor_index = self.store.insert(
            unit,
            ActorComponent {
                rigid_body,
                collider,
                is_trigger,
                disable_gravity: false,
            },
        );
        debug_assert_eq!(actor_index, index, "user_data must be written with the final index");
        ActorInstance::new(actor_index)
    }

    pub fn destroy(
        &mut self,
        instance: ActorInstance,
        bodies: &mut RigidBodySet,
        colliders: &mut ColliderSet,
        islands: &mut IslandManager,
        impulse_joints: &mut ImpulseJointSet,
        multibody_joints: &mut MultibodyJointSet,
    ) -> Option<(UnitId, u32)> {
        assert!(instance.is_valid(), "actor_destroy on sentinel instance");
        let (component, moved) = self.store.remove(instance.index);
        colliders.remove(component.collider, islands, bodies, true);
        bodies.remove(component.rigid_body, islands, colliders, impulse_joints, multibody_joints, true);

        if let Some((_, new_index)) = moved {
            let moved_component = self.store.get(new_index);
            if let Some(body) = bodies.get_mut(moved_component.rigid_body) {
                body.user_data = encode_user_data(new_index);
            }
            if let Some(collider) = colliders.get_mut(moved_component.collider) {
                collider.user_data = encode_user_data(new_index);
            }
        }
        moved
    }

    pub fn instance_of(&self, unit: UnitId) -> ActorInstance {
        ActorInstance::new(self.store.index_of(unit))
    }

    pub fn unit_of(&self, instance: ActorInstance) -> UnitId {
        self.store.unit_at(instance.index)
    }

    pub fn component(&self, instance: ActorInstance) -> &ActorComponent {
        assert!(instance.is_valid(), "actor op on sentinel instance");
        self.store.get(instance.index)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    // ---- queries & mutations (§4.2) ----

    pub fn linear_velocity(&self, instance: ActorInstance, bodies: &RigidBodySet) -> Vector3<Real> {
        let body = self.rigid_body(instance, bodies);
        *body.linvel()
    }

    /// Activates the body first (wakes it if sleeping), per the
    /// "activate-before-write" rule.
    pub fn set_linear_velocity(&self, instance: ActorInstance, bodies: &mut RigidBodySet, vel: Vector3<Real>) {
        let body = self.rigid_body_mut(instance, bodies);
        body.wake_up(true);
        body.set_linvel(vel, true);
    }

    pub fn set_angular_velocity(&self, instance: ActorInstance, bodies: &mut RigidBodySet, vel: Vector3<Real>) {
        let body = self.rigid_body_mut(instance, bodies);
        body.wake_up(true);
        body.set_angvel(vel, true);
    }

    pub fn add_impulse(&self, instance: ActorInstance, bodies: &mut RigidBodySet, impulse: Vector3<Real>) {
        let body = self.rigid_body_mut(instance, bodies);
        body.wake_up(true);
        body.apply_impulse(impulse, true);
    }

    pub fn add_impulse_at(
        &self,
        instance: ActorInstance,
        bodies: &mut RigidBodySet,
        impulse: Vector3<Real>,
        point: nalgebra::Point3<Real>,
    ) {
        let body = self.rigid_body_mut(instance, bodies);
        body.wake_up(true);
        body.apply_impulse_at_point(impulse, point, true);
    }

    /// `actor_add_torque_impulse` deliberately does **not** wake the body
    /// first, unlike every other mutator above. This reproduces the
    /// original engine's asymmetry exactly (SPEC_FULL.md §4.2, §9 open
    /// question, §8 property 12) — a sleeping dynamic actor silently
    /// accumulates no torque here until something else wakes it.
    pub fn add_torque_impulse(&self, instance: ActorInstance, bodies: &mut RigidBodySet, impulse: Vector3<Real>) {
        let body = self.rigid_body_mut(instance, bodies);
        body.apply_torque_impulse(impulse, false);
    }

    pub fn wake_up(&self, instance: ActorInstance, bodies: &mut RigidBodySet) {
        self.rigid_body_mut(instance, bodies).wake_up(true);
    }

    pub fn enable_gravity(&self, instance: ActorInstance, bodies: &mut RigidBodySet) {
        self.rigid_body_mut(instance, bodies).set_gravity_scale(1.0, true);
    }

    pub fn disable_gravity(&self, instance: ActorInstance, bodies: &mut RigidBodySet) {
        self.rigid_body_mut(instance, bodies).set_gravity_scale(0.0, true);
    }

    pub fn teleport_world_position(&self, instance: ActorInstance, bodies: &mut RigidBodySet, position: Vector3<Real>) {
        let body = self.rigid_body_mut(instance, bodies);
        let mut pose = *body.position();
        pose.translation.vector = position;
        body.set_position(pose, false);
    }

    pub fn teleport_world_rotation(&self, instance: ActorInstance, bodies: &mut RigidBodySet, rotation: UnitQuaternion<Real>) {
        let body = self.rigid_body_mut(instance, bodies);
        let mut pose = *body.position();
        pose.rotation = rotation;
        body.set_position(pose, false);
    }

    pub fn teleport_world_pose(&self, instance: ActorInstance, bodies: &mut RigidBodySet, pose: Isometry3<Real>) {
        self.rigid_body_mut(instance, bodies).set_position(pose, false);
    }

    pub fn set_kinematic(&self, instance: ActorInstance, bodies: &mut RigidBodySet, kinematic: bool) {
        let body = self.rigid_body_mut(instance, bodies);
        if kinematic {
            body.set_body_type(RigidBodyType::KinematicPositionBased, true);
            body.enable_ccd(false);
        } else {
            body.set_body_type(RigidBodyType::Dynamic, true);
        }
    }

    fn rigid_body<'a>(&self, instance: ActorInstance, bodies: &'a RigidBodySet) -> &'a RigidBody {
        assert!(instance.is_valid(), "actor op on sentinel instance");
        let handle = self.store.get(instance.index).rigid_body;
        bodies.get(handle).expect("actor's rigid body handle is stale")
    }

    fn rigid_body_mut<'a>(&self, instance: ActorInstance, bodies: &'a mut RigidBodySet) -> &'a mut RigidBody {
        assert!(instance.is_valid(), "actor op on sentinel instance");
        let handle = self.store.get(instance.index).rigid_body;
        bodies.get_mut(handle).expect("actor's rigid body handle is stale")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::{ColliderDesc, ColliderStore};
    use crate::config::{ActorClassFlags, GLOBAL_CONFIG_ID};

    fn make_config() -> PhysicsConfigResource {
        let mut config = PhysicsConfigResource::new();
        config.add_actor_class(
            StringId32::from_str("dynamic_body"),
            ActorClass {
                linear_damping: 0.0,
                angular_damping: 0.0,
                flags: ActorClassFlags::DYNAMIC,
            },
        );
        let _ = GLOBAL_CONFIG_ID;
        config
    }

    #[test]
    fn create_actor_requires_existing_collider() {
        let config = make_config();
        let colliders_store = ColliderStore::new();
        let mut store = ActorStore::new();
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        let desc = ActorDesc {
            actor_class: StringId32::from_str("dynamic_body"),
            material: StringId32::from_str("default"),
            collision_filter: StringId32::from_str("default"),
            mass: 1.0,
            lock_flags: 0,
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.create(
                UnitId(1),
                &desc,
                Isometry3::identity(),
                &config,
                &colliders_store,
                ColliderInstance::INVALID,
                &mut bodies,
                &mut colliders,
            )
        }));
        assert!(result.is_err(), "expected fatal assertion for missing collider");
    }

    #[test]
    fn lock_flags_disable_translation_axes() {
        let config = make_config();
        let mut colliders_store = ColliderStore::new();
        let collider_instance =
            colliders_store.create(UnitId(1), &[ColliderDesc::Sphere { radius: 0.3 }], Vector3::new(1.0, 1.0, 1.0));
        let mut store = ActorStore::new();
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        let desc = ActorDesc {
            actor_class: StringId32::from_str("dynamic_body"),
            material: StringId32::from_str("default"),
            collision_filter: StringId32::from_str("default"),
            mass: 1.0,
            lock_flags: LOCK_TX | LOCK_TY | LOCK_TZ,
        };
        let actor = store.create(
            UnitId(1),
            &desc,
            Isometry3::identity(),
            &config,
            &colliders_store,
            collider_instance,
            &mut bodies,
            &mut colliders,
        );
        store.set_linear_velocity(actor, &mut bodies, Vector3::new(5.0, 0.0, 0.0));
        let body = store.rigid_body(actor, &bodies);
        assert!(body.locked_axes().contains(LockedAxes::TRANSLATION_LOCKED_X));
        assert!(body.locked_axes().contains(LockedAxes::TRANSLATION_LOCKED_Y));
        assert!(body.locked_axes().contains(LockedAxes::TRANSLATION_LOCKED_Z));
    }

    #[test]
    fn descriptor_mass_is_forwarded_to_the_rigid_body() {
        let config = make_config();
        let mut colliders_store = ColliderStore::new();
        let light_collider =
            colliders_store.create(UnitId(1), &[ColliderDesc::Sphere { radius: 0.3 }], Vector3::new(1.0, 1.0, 1.0));
        let heavy_collider =
            colliders_store.create(UnitId(2), &[ColliderDesc::Sphere { radius: 0.3 }], Vector3::new(1.0, 1.0, 1.0));
        let mut store = ActorStore::new();
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        let light = store.create(
            UnitId(1),
            &ActorDesc {
                actor_class: StringId32::from_str("dynamic_body"),
                material: StringId32::from_str("default"),
                collision_filter: StringId32::from_str("default"),
                mass: 0.5,
                lock_flags: 0,
            },
            Isometry3::identity(),
            &config,
            &colliders_store,
            light_collider,
            &mut bodies,
            &mut colliders,
        );
        let heavy = store.create(
            UnitId(2),
            &ActorDesc {
                actor_class: StringId32::from_str("dynamic_body"),
                material: StringId32::from_str("default"),
                collision_filter: StringId32::from_str("default"),
                mass: 10.0,
                lock_flags: 0,
            },
            Isometry3::identity(),
            &config,
            &colliders_store,
            heavy_collider,
            &mut bodies,
            &mut colliders,
        );

        assert!(store.rigid_body(heavy, &bodies).mass() > store.rigid_body(light, &bodies).mass());
    }

    #[test]
    fn add_torque_impulse_does_not_wake_a_sleeping_body() {
        let config = make_config();
        let mut colliders_store = ColliderStore::new();
        let collider_instance =
            colliders_store.create(UnitId(1), &[ColliderDesc::Sphere { radius: 0.3 }], Vector3::new(1.0, 1.0, 1.0));
        let mut store = ActorStore::new();
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        let desc = ActorDesc {
            actor_class: StringId32::from_str("dynamic_body"),
            material: StringId32::from_str("default"),
            collision_filter: StringId32::from_str("default"),
            mass: 1.0,
            lock_flags: 0,
        };
        let actor = store.create(
            UnitId(1),
            &desc,
            Isometry3::identity(),
            &config,
            &colliders_store,
            collider_instance,
            &mut bodies,
            &mut colliders,
        );

        store.rigid_body_mut(actor, &mut bodies).sleep();
        assert!(store.rigid_body(actor, &bodies).is_sleeping());

        store.add_torque_impulse(actor, &mut bodies, Vector3::new(0.0, 0.0, 1.0));
        assert!(
            store.rigid_body(actor, &bodies).is_sleeping(),
            "add_torque_impulse must not wake a sleeping body"
        );
    }
}

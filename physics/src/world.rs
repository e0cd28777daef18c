//! `PhysicsWorld`: owns every store and rapier3d solver structure, and is
//! the crate's single public entry point (SPEC_FULL.md §2-§5).
//!
//! Grounded on `stefnotch-cgue23-cat-to-the-past/physics/src/physics_context.rs`
//! (`PhysicsContext`'s field layout) and `physics_world_bullet.cpp`'s
//! `PhysicsWorldImpl` (owning every instance store plus the unit-destroy
//! cascade).

use std::sync::Arc;

use nalgebra::{Isometry3, Vector3};
use rapier3d::prelude::*;

use crate::actor::{ActorDesc, ActorInstance, ActorStore};
use crate::collider::{ColliderDesc, ColliderInstance, ColliderStore};
use crate::config::{PhysicsConfigResource, PhysicsSettings};
use crate::events::EventBus;
use crate::ids::{JointInstance, MoverInstance, UnitId};
use crate::joint::{JointDesc, JointStore};
use crate::mover::{MoverDesc, MoverStore};
use crate::raycast::{self, RayHit};
use crate::step::{SolverState, StepEngine};

/// One physics scene. Not `Sync`: `update(dt)` must be the only caller
/// touching this value at a time (SPEC_FULL.md §5).
pub struct PhysicsWorld {
    config: Arc<PhysicsConfigResource>,
    settings: PhysicsSettings,

    gravity: Vector3<Real>,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    physics_pipeline: PhysicsPipeline,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,

    step_engine: StepEngine,
    events: EventBus,

    colliders_store: ColliderStore,
    actors: ActorStore,
    movers: MoverStore,
    joints: JointStore,
}

impl PhysicsWorld {
    pub fn new(config: Arc<PhysicsConfigResource>, settings: PhysicsSettings) -> Self {
        Self {
            config,
            settings,
            gravity: Vector3::new(0.0, -9.81, 0.0),
            integration_parameters: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            physics_pipeline: PhysicsPipeline::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            step_engine: StepEngine::new(),
            events: EventBus::new(),
            colliders_store: ColliderStore::new(),
            actors: ActorStore::new(),
            movers: MoverStore::new(),
            joints: JointStore::new(),
        }
    }

    pub fn gravity(&self) -> Vector3<Real> {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vector3<Real>) {
        self.gravity = gravity;
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    // ---- collider/actor/mover/joint creation (thin forwarders; §4.1-§4.4) ----

    pub fn collider_create(&mut self, unit: UnitId, descs: &[ColliderDesc], scale: Vector3<Real>) -> ColliderInstance {
        self.colliders_store.create(unit, descs, scale)
    }

    /// Entry point for the documented wire format (SPEC_FULL.md §4.1, §6):
    /// parses `bytes` as a packed collider descriptor stream and creates the
    /// collider from the result. Callers that already hold parsed
    /// `ColliderDesc`s (e.g. tests, or a loader that parsed the stream once
    /// up front) should use [`Self::collider_create`] directly instead.
    pub fn collider_create_from_bytes(
        &mut self,
        unit: UnitId,
        bytes: &[u8],
        scale: Vector3<Real>,
    ) -> Result<ColliderInstance, crate::collider::DescriptorError> {
        let descs = crate::collider::parse_descriptor_stream(bytes)?;
        Ok(self.colliders_store.create(unit, &descs, scale))
    }

    pub fn collider_destroy(&mut self, instance: ColliderInstance) -> Option<(UnitId, u32)> {
        self.colliders_store.destroy(instance)
    }

    pub fn actor_create(
        &mut self,
        unit: UnitId,
        desc: &ActorDesc,
        world_pose: Isometry3<Real>,
        collider_instance: ColliderInstance,
    ) -> ActorInstance {
        self.actors.create(
            unit,
            desc,
            world_pose,
            &self.config,
            &self.colliders_store,
            collider_instance,
            &mut self.bodies,
            &mut self.colliders,
        )
    }

    pub fn actor_destroy(&mut self, instance: ActorInstance) -> Option<(UnitId, u32)> {
        self.actors.destroy(
            instance,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.island_manager,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
        )
    }

    pub fn actors(&self) -> &ActorStore {
        &self.actors
    }

    pub fn mover_create(&mut self, unit: UnitId, desc: &MoverDesc, world_position: Vector3<f32>) -> MoverInstance {
        self.movers.create(unit, desc, world_position, &self.config, &mut self.colliders)
    }

    pub fn mover_destroy(&mut self, instance: MoverInstance) -> Option<(UnitId, u32)> {
        self.movers.destroy(instance, &mut self.colliders)
    }

    pub fn mover_move(&mut self, instance: MoverInstance, delta: Vector3<f32>) {
        self.movers.mover_move(instance, delta, &self.bodies, &mut self.colliders, &mut self.query_pipeline);
    }

    pub fn movers(&self) -> &MoverStore {
        &self.movers
    }

    pub fn joint_create(
        &mut self,
        unit: UnitId,
        desc: &JointDesc,
        actor_a: ActorInstance,
        actor_b: ActorInstance,
    ) -> JointInstance {
        self.joints.create(unit, desc, actor_a, actor_b, &self.actors, &mut self.impulse_joints)
    }

    pub fn joint_destroy(&mut self, instance: JointInstance) -> Option<(UnitId, u32)> {
        self.joints.destroy(instance, &mut self.impulse_joints)
    }

    // ---- spatial queries (§4.5) ----

    pub fn cast_ray(&self, from: nalgebra::Point3<f32>, dir: Vector3<f32>, ray_length: f32) -> Option<RayHit> {
        raycast::cast_ray(from, dir, ray_length, &self.bodies, &self.colliders, &self.query_pipeline)
    }

    pub fn cast_ray_all(&self, from: nalgebra::Point3<f32>, dir: Vector3<f32>, ray_length: f32) -> Vec<RayHit> {
        raycast::cast_ray_all(from, dir, ray_length, &self.bodies, &self.colliders, &self.query_pipeline)
    }

    pub fn cast_sphere(&self, from: nalgebra::Point3<f32>, dir: Vector3<f32>, radius: f32, max_distance: f32) -> Option<RayHit> {
        raycast::cast_sphere(from, dir, radius, max_distance, &self.bodies, &self.colliders, &self.query_pipeline)
    }

    pub fn cast_box(
        &self,
        from: nalgebra::Point3<f32>,
        dir: Vector3<f32>,
        half_extents: Vector3<f32>,
        max_distance: f32,
    ) -> Option<RayHit> {
        raycast::cast_box(from, dir, half_extents, max_distance, &self.bodies, &self.colliders, &self.query_pipeline)
    }

    /// Advances the simulation by `dt`, running every due substep and
    /// refreshing the query pipeline so this frame's casts see the new
    /// poses (SPEC_FULL.md §4.6).
    pub fn update(&mut self, dt: f32) {
        let mut state = SolverState {
            gravity: self.gravity,
            integration_parameters: &mut self.integration_parameters,
            island_manager: &mut self.island_manager,
            physics_pipeline: &mut self.physics_pipeline,
            broad_phase: &mut self.broad_phase,
            narrow_phase: &mut self.narrow_phase,
            bodies: &mut self.bodies,
            colliders: &mut self.colliders,
            impulse_joints: &mut self.impulse_joints,
            multibody_joints: &mut self.multibody_joints,
            ccd_solver: &mut self.ccd_solver,
            query_pipeline: &mut self.query_pipeline,
        };
        self.step_engine.update(dt, &self.settings, &mut state, &self.actors, &mut self.joints, &mut self.events);
        self.query_pipeline.update(&self.colliders);
    }

    /// Pose synchronization inbound (SPEC_FULL.md §4.7): applies aligned
    /// `units`/`world_poses` slices to whichever component (actor or mover)
    /// each unit owns. Units with neither are silently ignored, scaling is
    /// stripped (only rotation/translation survive).
    pub fn update_actor_world_poses(&mut self, units: &[UnitId], world_poses: &[Isometry3<f32>]) {
        assert_eq!(units.len(), world_poses.len(), "update_actor_world_poses: mismatched slice lengths");

        for (&unit, &pose) in units.iter().zip(world_poses.iter()) {
            let actor_instance = self.actors.instance_of(unit);
            if actor_instance.is_valid() {
                let body = &mut self.bodies[self.actors.component(actor_instance).rigid_body];
                match body.body_type() {
                    RigidBodyType::KinematicPositionBased => body.set_next_kinematic_position(pose),
                    _ => body.set_position(pose, true),
                }
                continue;
            }

            let mover_instance = self.movers.instance_of(unit);
            if mover_instance.is_valid() {
                self.movers.set_position(mover_instance, pose.translation.vector, pose.rotation, &mut self.colliders);
            }
        }
    }
}

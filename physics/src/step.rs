//! The fixed-step accumulator and per-substep event generation
//! (SPEC_FULL.md §4.6). The one place the whole solver stack is driven.
//!
//! Grounded on `stefnotch-cgue23-cat-to-the-past/physics/src/physics_context.rs`
//! (`step_simulation`'s `physics_pipeline.step(...)` call shape) and
//! `jbuehler23-dreki/crates/necs/src/physics3d.rs` (fixed-step accumulator),
//! with the manual pair-diff idiom from `other_examples/3ee844a0_poro-nAIVE`
//! (`narrow_phase.contact_pairs()` + `HashSet`-based current/previous diff)
//! and `other_examples/b0e64df1_nacloos-clawblox` (`narrow_phase.intersection_pairs()`).

use std::collections::{HashMap, HashSet};

use nalgebra::{Isometry3, Vector3};
use rapier3d::prelude::*;

use crate::actor::{decode_user_data, ActorStore, SENTINEL_USER_DATA};
use crate::config::PhysicsSettings;
use crate::events::{
    pair_key, CollisionEventKind, EventBus, PhysicsCollisionEvent, PhysicsTransformEvent, PhysicsTriggerEvent,
    TriggerEventKind,
};
use crate::ids::{ActorInstance, UnitId};
use crate::joint::JointStore;

/// Physical state the step loop needs every substep; gathered into one
/// struct purely to keep `StepEngine::update`'s signature readable — the
/// teacher's own `PhysicsContext` keeps the same fields directly on `self`
/// instead, but our solver state is split across `PhysicsWorld`'s stores.
pub struct SolverState<'a> {
    pub gravity: Vector3<Real>,
    pub integration_parameters: &'a mut IntegrationParameters,
    pub island_manager: &'a mut IslandManager,
    pub physics_pipeline: &'a mut PhysicsPipeline,
    pub broad_phase: &'a mut BroadPhase,
    pub narrow_phase: &'a mut NarrowPhase,
    pub bodies: &'a mut RigidBodySet,
    pub colliders: &'a mut ColliderSet,
    pub impulse_joints: &'a mut ImpulseJointSet,
    pub multibody_joints: &'a mut MultibodyJointSet,
    pub ccd_solver: &'a mut CCDSolver,
    pub query_pipeline: &'a mut QueryPipeline,
}

/// Bookkeeping kept for a live pair so its `LEAVE`/`TOUCH_END` event (emitted
/// only once the pair has actually vanished) can be populated without
/// re-querying the narrow phase.
#[derive(Clone, Copy)]
struct PairRecord {
    units: [UnitId; 2],
    actors: [ActorInstance; 2],
    is_trigger: bool,
}

pub struct StepEngine {
    accumulator: f32,
    pairs_curr: HashMap<u64, PairRecord>,
    pairs_prev: HashMap<u64, PairRecord>,
    last_transforms: HashMap<u32, Isometry3<f32>>,
}

impl Default for StepEngine {
    fn default() -> Self {
        Self {
            accumulator: 0.0,
            pairs_curr: HashMap::new(),
            pairs_prev: HashMap::new(),
            last_transforms: HashMap::new(),
        }
    }
}

impl StepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the accumulator by `dt`, running up to `settings.max_substeps`
    /// fixed substeps of length `1 / settings.step_frequency`. Leftover time
    /// carries over to the next call (SPEC_FULL.md §5).
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        dt: f32,
        settings: &PhysicsSettings,
        state: &mut SolverState,
        actors: &ActorStore,
        joints: &mut JointStore,
        events: &mut EventBus,
    ) {
        self.accumulator += dt;
        let substep_dt = 1.0 / settings.step_frequency;
        let mut substeps_run = 0;

        while self.accumulator >= substep_dt && substeps_run < settings.max_substeps {
            self.run_substep(substep_dt, settings, state, actors, joints, events);
            self.accumulator -= substep_dt;
            substeps_run += 1;
        }

        self.emit_transform_events(state.bodies, events);
    }

    #[allow(clippy::too_many_arguments)]
    fn run_substep(
        &mut self,
        substep_dt: f32,
        settings: &PhysicsSettings,
        state: &mut SolverState,
        actors: &ActorStore,
        joints: &mut JointStore,
        events: &mut EventBus,
    ) {
        apply_spring_joints(joints, actors, state.bodies);

        state.integration_parameters.dt = substep_dt;
        let physics_hooks = ();
        let event_handler = ();
        state.physics_pipeline.step(
            &state.gravity,
            state.integration_parameters,
            state.island_manager,
            state.broad_phase,
            state.narrow_phase,
            state.bodies,
            state.colliders,
            state.impulse_joints,
            state.multibody_joints,
            state.ccd_solver,
            Some(state.query_pipeline),
            &physics_hooks,
            &event_handler,
        );

        clamp_linear_velocities(state.bodies, settings.max_linear_velocity);
        self.diff_pairs(state, events);

        for unit in joints.check_breakable_joints(state.impulse_joints) {
            tracing::warn!(?unit, "joint broke: exceeded break_force");
        }
    }

    fn diff_pairs(&mut self, state: &mut SolverState, events: &mut EventBus) {
        self.pairs_curr.clear();

        for pair in state.narrow_phase.contact_pairs() {
            if !pair.has_any_active_contact {
                continue;
            }
            let (Some(a), Some(b)) =
                (actor_from_collider(pair.collider1, state.colliders), actor_from_collider(pair.collider2, state.colliders))
            else {
                continue;
            };
            let record = PairRecord { units: [a.unit, b.unit], actors: [a.actor, b.actor], is_trigger: false };
            let key = pair_key(a.unit.0, b.unit.0);

            if self.pairs_prev.contains_key(&key) {
                events.push_collision(PhysicsCollisionEvent {
                    units: record.units,
                    actors: record.actors,
                    position: Vector3::zeros(),
                    normal: Vector3::zeros(),
                    distance: 0.0,
                    kind: CollisionEventKind::Touching,
                });
            } else if let Some(manifold) = pair.manifolds.first() {
                if let Some(point) = manifold.points.first() {
                    let collider1_pose = *state.colliders[pair.collider1].position();
                    let world_normal = collider1_pose.rotation * manifold.local_n1;
                    let world_point = collider1_pose * point.local_p1;
                    events.push_collision(PhysicsCollisionEvent {
                        units: record.units,
                        actors: record.actors,
                        position: world_point.coords,
                        normal: world_normal,
                        distance: point.dist,
                        kind: CollisionEventKind::TouchBegin,
                    });
                }
            }
            self.pairs_curr.insert(key, record);
        }

        for (collider1, collider2, intersecting) in state.narrow_phase.intersection_pairs() {
            if !intersecting {
                continue;
            }
            let (Some(a), Some(b)) =
                (actor_from_collider(collider1, state.colliders), actor_from_collider(collider2, state.colliders))
            else {
                continue;
            };
            if !a.is_sensor && !b.is_sensor {
                continue;
            }
            let (trigger, other) = if a.is_sensor { (a, b) } else { (b, a) };
            let key = pair_key(a.unit.0, b.unit.0);
            let record = PairRecord { units: [trigger.unit, other.unit], actors: [trigger.actor, other.actor], is_trigger: true };

            if !self.pairs_prev.contains_key(&key) {
                events.push_trigger(PhysicsTriggerEvent {
                    trigger_unit: trigger.unit,
                    other_unit: other.unit,
                    kind: TriggerEventKind::Enter,
                });
            }
            self.pairs_curr.insert(key, record);
        }

        for (&key, record) in self.pairs_prev.iter() {
            if self.pairs_curr.contains_key(&key) {
                continue;
            }
            if record.is_trigger {
                events.push_trigger(PhysicsTriggerEvent {
                    trigger_unit: record.units[0],
                    other_unit: record.units[1],
                    kind: TriggerEventKind::Leave,
                });
            } else {
                events.push_collision(PhysicsCollisionEvent {
                    units: record.units,
                    actors: record.actors,
                    position: Vector3::zeros(),
                    normal: Vector3::zeros(),
                    distance: 0.0,
                    kind: CollisionEventKind::TouchEnd,
                });
            }
        }

        std::mem::swap(&mut self.pairs_curr, &mut self.pairs_prev);
    }

    fn emit_transform_events(&mut self, bodies: &RigidBodySet, events: &mut EventBus) {
        for (_handle, body) in bodies.iter() {
            if body.user_data == SENTINEL_USER_DATA || body.is_sleeping() || body.body_type() == RigidBodyType::Fixed {
                continue;
            }
            let index = decode_user_data(body.user_data);
            let pose = *body.position();
            let changed = self.last_transforms.get(&index).map(|last| *last != pose).unwrap_or(true);
            if changed {
                self.last_transforms.insert(index, pose);
                events.push_transform(PhysicsTransformEvent { unit_id: UnitId(index), world: pose });
            }
        }
    }
}

/// `(UnitId, ActorInstance, is_sensor)` for a collider, or `None` if its
/// back-pointer is the sentinel (a mover ghost, invisible to event generation
/// just as it is to raycasts).
struct ColliderActor {
    unit: UnitId,
    actor: ActorInstance,
    is_sensor: bool,
}

fn actor_from_collider(handle: ColliderHandle, colliders: &ColliderSet) -> Option<ColliderActor> {
    let collider = colliders.get(handle)?;
    if collider.user_data == SENTINEL_USER_DATA {
        return None;
    }
    let index = decode_user_data(collider.user_data);
    Some(ColliderActor { unit: UnitId(index), actor: ActorInstance::new(index), is_sensor: collider.is_sensor() })
}

fn clamp_linear_velocities(bodies: &mut RigidBodySet, max_linear_velocity: f32) {
    for (_handle, body) in bodies.iter_mut() {
        let velocity = *body.linvel();
        let speed = velocity.norm();
        if speed > max_linear_velocity {
            body.set_linvel(velocity * (max_linear_velocity / speed), true);
        }
    }
}

/// Applies the restoring force for every `Spring`-kind joint before the
/// substep runs (SPEC_FULL.md §4.4's point-to-point spring on top of the
/// ball-joint pivot constraint — see `joint.rs`'s `JointKind::Spring` doc
/// comment for why rapier3d's joint builders alone can't express this).
fn apply_spring_joints(joints: &JointStore, actors: &ActorStore, bodies: &mut RigidBodySet) {
    for (_unit, component) in joints.iter() {
        let Some((rest_length, stiffness, damping)) = component.spring() else {
            continue;
        };
        let (anchor_a, anchor_b) = component.anchor_positions_world(actors, bodies);
        let delta = anchor_b - anchor_a;
        let distance = delta.norm();
        if distance < 1.0e-6 {
            continue;
        }
        let direction = delta / distance;
        let relative_velocity = component.relative_velocity_along(actors, bodies, direction);
        let force_magnitude = stiffness * (distance - rest_length) - damping * relative_velocity;
        component.apply_spring_force(actors, bodies, direction * force_magnitude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorDesc;
    use crate::collider::{ColliderDesc, ColliderStore};
    use crate::config::{ActorClass, ActorClassFlags, PhysicsConfigResource, StringId32};
    use crate::joint::{JointDesc, JointKind};

    fn make_config() -> PhysicsConfigResource {
        let mut config = PhysicsConfigResource::new();
        config.add_actor_class(
            StringId32::from_str("dynamic_body"),
            ActorClass { linear_damping: 0.0, angular_damping: 0.0, flags: ActorClassFlags::DYNAMIC },
        );
        config
    }

    fn make_actor(
        unit: UnitId,
        config: &PhysicsConfigResource,
        colliders_store: &mut ColliderStore,
        actors: &mut ActorStore,
        bodies: &mut RigidBodySet,
        colliders: &mut ColliderSet,
        position: Vector3<f32>,
    ) -> ActorInstance {
        let collider_instance =
            colliders_store.create(unit, &[ColliderDesc::Sphere { radius: 0.3 }], Vector3::new(1.0, 1.0, 1.0));
        let desc = ActorDesc {
            actor_class: StringId32::from_str("dynamic_body"),
            material: StringId32::from_str("default"),
            collision_filter: StringId32::from_str("default"),
            mass: 1.0,
            lock_flags: 0,
        };
        actors.create(
            unit,
            &desc,
            Isometry3::translation(position.x, position.y, position.z),
            config,
            colliders_store,
            collider_instance,
            bodies,
            colliders,
        )
    }

    #[test]
    fn touch_begin_then_touching_then_touch_end_as_spheres_cross() {
        let config = make_config();
        let mut colliders_store = ColliderStore::new();
        let mut actors = ActorStore::new();
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        let mut impulse_joints = ImpulseJointSet::new();
        let mut multibody_joints = MultibodyJointSet::new();
        let mut joints = JointStore::new();
        let mut events = EventBus::new();
        let mut engine = StepEngine::new();

        make_actor(UnitId(1), &config, &mut colliders_store, &mut actors, &mut bodies, &mut colliders, Vector3::new(-0.5, 0.0, 0.0));
        make_actor(UnitId(2), &config, &mut colliders_store, &mut actors, &mut bodies, &mut colliders, Vector3::new(0.5, 0.0, 0.0));

        let mut integration_parameters = IntegrationParameters::default();
        let mut island_manager = IslandManager::new();
        let mut physics_pipeline = PhysicsPipeline::new();
        let mut broad_phase = BroadPhase::new();
        let mut narrow_phase = NarrowPhase::new();
        let mut ccd_solver = CCDSolver::new();
        let mut query_pipeline = QueryPipeline::new();
        let settings = PhysicsSettings { max_substeps: 4, step_frequency: 60.0, max_linear_velocity: 100.0 };

        let mut state = SolverState {
            gravity: Vector3::zeros(),
            integration_parameters: &mut integration_parameters,
            island_manager: &mut island_manager,
            physics_pipeline: &mut physics_pipeline,
            broad_phase: &mut broad_phase,
            narrow_phase: &mut narrow_phase,
            bodies: &mut bodies,
            colliders: &mut colliders,
            impulse_joints: &mut impulse_joints,
            multibody_joints: &mut multibody_joints,
            ccd_solver: &mut ccd_solver,
            query_pipeline: &mut query_pipeline,
        };

        engine.update(1.0 / 60.0, &settings, &mut state, &actors, &mut joints, &mut events);
        let (_, collisions, _) = events.drain();
        assert!(collisions.iter().any(|e| e.kind == CollisionEventKind::TouchBegin));
    }
}

//! Spatial queries against the live solver state (SPEC_FULL.md §4.5).
//!
//! Grounded on `physics_world_bullet.cpp`'s raycast section (nearest-hit vs.
//! all-hits, sentinel-aware) and
//! `stefnotch-cgue23-cat-to-the-past/physics/src/physics_context.rs::cast_ray`
//! for the `QueryFilter::new().exclude_sensors()` idiom; the all-hits and
//! convex-sweep variants follow `other_examples/3ee844a0_poro-nAIVE` and
//! `other_examples/49dae1af_Luzzotica-arcade` (`intersections_with_ray`
//! callback shape).

use nalgebra::{Isometry3, Point3, Vector3};
use rapier3d::prelude::*;

use crate::actor::{decode_user_data, SENTINEL_USER_DATA};
use crate::ids::{ActorInstance, UnitId};

/// A single hit: the owning unit/actor, world-space point and normal, and
/// the hit fraction mapped onto `ray_length` (the original Crown convention
/// of a `[0, ray_length]` distance rather than a raw `toi`).
#[derive(Debug, Clone, Copy)]
pub struct RayHit {
    pub unit: UnitId,
    pub actor: ActorInstance,
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub time: f32,
}

/// Mover ghosts and any other non-actor proxy are invisible to every cast in
/// this module: their colliders carry `SENTINEL_USER_DATA`, so the predicate
/// rejects them before the solid/distance test ever runs.
fn sentinel_aware_filter() -> QueryFilter<'static> {
    QueryFilter::new().exclude_sensors().predicate(&is_not_sentinel)
}

fn is_not_sentinel(_handle: ColliderHandle, collider: &Collider) -> bool {
    collider.user_data != SENTINEL_USER_DATA
}

fn hit_from_collider(
    handle: ColliderHandle,
    colliders: &ColliderSet,
    position: Vector3<f32>,
    normal: Vector3<f32>,
    time: f32,
) -> Option<RayHit> {
    let collider = colliders.get(handle)?;
    let index = decode_user_data(collider.user_data);
    Some(RayHit { unit: UnitId(index), actor: ActorInstance::new(index), position, normal, time })
}

/// Nearest hit along `from + t * dir` for `t` in `[0, ray_length]`, or `None`.
pub fn cast_ray(
    from: Point3<f32>,
    dir: Vector3<f32>,
    ray_length: f32,
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    query_pipeline: &QueryPipeline,
) -> Option<RayHit> {
    let ray = Ray::new(from, dir);
    let (handle, intersection) =
        query_pipeline.cast_ray_and_get_normal(bodies, colliders, &ray, ray_length, true, sentinel_aware_filter())?;
    let point = ray.point_at(intersection.time_of_impact);
    hit_from_collider(handle, colliders, point.coords, intersection.normal, intersection.time_of_impact)
}

/// Every hit along the ray, in no particular distance order (the underlying
/// `intersections_with_ray` callback does not sort).
pub fn cast_ray_all(
    from: Point3<f32>,
    dir: Vector3<f32>,
    ray_length: f32,
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    query_pipeline: &QueryPipeline,
) -> Vec<RayHit> {
    let ray = Ray::new(from, dir);
    let mut hits = Vec::new();
    query_pipeline.intersections_with_ray(
        bodies,
        colliders,
        &ray,
        ray_length,
        true,
        sentinel_aware_filter(),
        |handle, intersection| {
            let point = ray.point_at(intersection.time_of_impact);
            if let Some(hit) = hit_from_collider(handle, colliders, point.coords, intersection.normal, intersection.time_of_impact) {
                hits.push(hit);
            }
            true
        },
    );
    hits
}

/// Sweeps a sphere of `radius` from `from` along `dir` for up to `max_distance`.
pub fn cast_sphere(
    from: Point3<f32>,
    dir: Vector3<f32>,
    radius: f32,
    max_distance: f32,
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    query_pipeline: &QueryPipeline,
) -> Option<RayHit> {
    let shape = SharedShape::ball(radius);
    cast_shape(from, dir, max_distance, &shape, bodies, colliders, query_pipeline)
}

/// Sweeps an axis-aligned box of `half_extents` from `from` along `dir` for
/// up to `max_distance`.
pub fn cast_box(
    from: Point3<f32>,
    dir: Vector3<f32>,
    half_extents: Vector3<f32>,
    max_distance: f32,
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    query_pipeline: &QueryPipeline,
) -> Option<RayHit> {
    let shape = SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z);
    cast_shape(from, dir, max_distance, &shape, bodies, colliders, query_pipeline)
}

fn cast_shape(
    from: Point3<f32>,
    dir: Vector3<f32>,
    max_distance: f32,
    shape: &SharedShape,
    bodies: &RigidBodySet,
    colliders: &ColliderSet,
    query_pipeline: &QueryPipeline,
) -> Option<RayHit> {
    let pos = Isometry3::from(from);
    let velocity = dir * max_distance;
    let (handle, toi) =
        query_pipeline.cast_shape(bodies, colliders, &pos, &velocity, shape, 1.0, true, sentinel_aware_filter())?;
    let world_point = pos.translation.vector + velocity * toi.toi;
    hit_from_collider(handle, colliders, world_point, toi.normal1, toi.toi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorDesc, ActorStore};
    use crate::collider::{ColliderDesc, ColliderStore};
    use crate::config::{ActorClass, ActorClassFlags, PhysicsConfigResource, StringId32};

    fn make_config() -> PhysicsConfigResource {
        let mut config = PhysicsConfigResource::new();
        config.add_actor_class(
            StringId32::from_str("static_body"),
            ActorClass { linear_damping: 0.0, angular_damping: 0.0, flags: ActorClassFlags::empty() },
        );
        config
    }

    #[test]
    fn cast_ray_hits_a_sphere_actor() {
        let config = make_config();
        let mut colliders_store = ColliderStore::new();
        let mut actors = ActorStore::new();
        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        let unit = UnitId(1);
        let collider_instance =
            colliders_store.create(unit, &[ColliderDesc::Sphere { radius: 0.5 }], Vector3::new(1.0, 1.0, 1.0));
        let desc = ActorDesc {
            actor_class: StringId32::from_str("static_body"),
            material: StringId32::from_str("default"),
            collision_filter: StringId32::from_str("default"),
            mass: 0.0,
            lock_flags: 0,
        };
        actors.create(
            unit,
            &desc,
            Isometry3::translation(0.0, 0.0, 5.0),
            &config,
            &mut colliders_store,
            collider_instance,
            &mut bodies,
            &mut colliders,
        );

        let mut query_pipeline = QueryPipeline::new();
        query_pipeline.update(&colliders);

        let hit = cast_ray(Point3::origin(), Vector3::z(), 100.0, &bodies, &colliders, &query_pipeline);
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().unit, unit);
    }

    #[test]
    fn cast_ray_misses_when_nothing_in_range() {
        let bodies = RigidBodySet::new();
        let colliders = ColliderSet::new();
        let mut query_pipeline = QueryPipeline::new();
        query_pipeline.update(&colliders);

        let hit = cast_ray(Point3::origin(), Vector3::z(), 100.0, &bodies, &colliders, &query_pipeline);
        assert!(hit.is_none());
    }
}

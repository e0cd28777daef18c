//! Collider store: packed descriptor parsing and the dense shape array.
//!
//! Grounded on `physics_world_bullet.cpp`'s `collider_create_instances` and
//! `engine/resource/physics_resource.h`'s `PhysicsShapeType` enum for the
//! wire format (SPEC_FULL.md §6).

use nalgebra::Vector3;
use rapier3d::math::Real;
use rapier3d::prelude::SharedShape;

use crate::ids::{ColliderInstance, InstanceStore, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ShapeKind {
    Sphere = 0,
    Capsule = 1,
    Box = 2,
    ConvexHull = 3,
    Mesh = 4,
}

impl ShapeKind {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => ShapeKind::Sphere,
            1 => ShapeKind::Capsule,
            2 => ShapeKind::Box,
            3 => ShapeKind::ConvexHull,
            4 => ShapeKind::Mesh,
            other => panic!("unknown collider shape type {other}"),
        }
    }
}

/// One parsed record from the collider descriptor stream.
pub enum ColliderDesc {
    Sphere { radius: f32 },
    Capsule { radius: f32, height: f32 },
    Box { half_size: Vector3<f32> },
    ConvexHull { points: Vec<Vector3<f32>> },
    Mesh { points: Vec<Vector3<f32>>, indices: Vec<u16> },
}

/// A malformed (truncated) descriptor byte stream. This is the one place in
/// the physics core that returns a `Result` rather than panicking — see
/// SPEC_FULL.md §7: a truncated buffer is an I/O-adjacent boundary
/// condition, not a pure logic error. A *well-formed but wrong* shape type
/// is still fatal, per §4.1.
#[derive(Debug)]
pub struct DescriptorError(pub &'static str);

impl std::fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed collider descriptor stream: {}", self.0)
    }
}

impl std::error::Error for DescriptorError {}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DescriptorError> {
        if self.pos + n > self.bytes.len() {
            return Err(DescriptorError("unexpected end of stream"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, DescriptorError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u16(&mut self) -> Result<u16, DescriptorError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32, DescriptorError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn vector3(&mut self) -> Result<Vector3<f32>, DescriptorError> {
        Ok(Vector3::new(self.f32()?, self.f32()?, self.f32()?))
    }
}

/// Parse one `{type, size, payload}` record. `size` is trusted only to the
/// extent of being skipped if we don't recognise the fields past it; we
/// still read the payload by its documented shape for the four known kinds.
fn parse_one(cursor: &mut Cursor) -> Result<ColliderDesc, DescriptorError> {
    let kind = ShapeKind::from_u32(cursor.u32()?);
    let _size = cursor.u32()?;
    match kind {
        ShapeKind::Sphere => Ok(ColliderDesc::Sphere {
            radius: cursor.f32()?,
        }),
        ShapeKind::Capsule => Ok(ColliderDesc::Capsule {
            radius: cursor.f32()?,
            height: cursor.f32()?,
        }),
        ShapeKind::Box => Ok(ColliderDesc::Box {
            half_size: cursor.vector3()?,
        }),
        ShapeKind::ConvexHull => {
            let n = cursor.u32()? as usize;
            let mut points = Vec::with_capacity(n);
            for _ in 0..n {
                points.push(cursor.vector3()?);
            }
            Ok(ColliderDesc::ConvexHull { points })
        }
        ShapeKind::Mesh => {
            let np = cursor.u32()? as usize;
            let mut points = Vec::with_capacity(np);
            for _ in 0..np {
                points.push(cursor.vector3()?);
            }
            let ni = cursor.u32()? as usize;
            let mut indices = Vec::with_capacity(ni);
            for _ in 0..ni {
                indices.push(cursor.u16()?);
            }
            Ok(ColliderDesc::Mesh { points, indices })
        }
    }
}

/// Parse every record in a packed descriptor stream, in order.
pub fn parse_descriptor_stream(bytes: &[u8]) -> Result<Vec<ColliderDesc>, DescriptorError> {
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::new();
    while cursor.pos < cursor.bytes.len() {
        out.push(parse_one(&mut cursor)?);
    }
    Ok(out)
}

fn build_shape(desc: &ColliderDesc, scale: Vector3<f32>) -> SharedShape {
    match desc {
        ColliderDesc::Sphere { radius } => SharedShape::ball(radius * scale.x),
        ColliderDesc::Capsule { radius, height } => {
            SharedShape::capsule_y(0.5 * height * scale.y, radius * scale.x)
        }
        ColliderDesc::Box { half_size } => SharedShape::cuboid(
            half_size.x * scale.x,
            half_size.y * scale.y,
            half_size.z * scale.z,
        ),
        ColliderDesc::ConvexHull { points } => {
            let scaled: Vec<_> = points
                .iter()
                .map(|p| nalgebra::Point3::new(p.x * scale.x, p.y * scale.y, p.z * scale.z))
                .collect();
            SharedShape::convex_hull(&scaled)
                .expect("convex hull construction failed for collider descriptor")
        }
        ColliderDesc::Mesh { points, indices } => {
            let vertices: Vec<_> = points
                .iter()
                .map(|p| nalgebra::Point3::new(p.x * scale.x, p.y * scale.y, p.z * scale.z))
                .collect();
            assert!(
                indices.len() % 3 == 0,
                "mesh collider index buffer is not triangle-triplets"
            );
            let triangles: Vec<[u32; 3]> = indices
                .chunks_exact(3)
                .map(|c| [c[0] as u32, c[1] as u32, c[2] as u32])
                .collect();
            SharedShape::trimesh(vertices, triangles)
        }
    }
}

/// A collider record: the built shape plus the owning unit.
pub struct ColliderComponent {
    pub shape: SharedShape,
}

#[derive(Default)]
pub struct ColliderStore {
    store: InstanceStore<ColliderComponent>,
}

impl ColliderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds shapes for every parsed descriptor and appends them for
    /// `unit`, applying `scale` (the unit's world scale at creation time,
    /// per §4.1). Returns the instance for the *last* created collider —
    /// mirrors the original contract of one collider per unit; multiple
    /// descriptors for a single unit is a caller error handled by the
    /// `InstanceStore::insert` assertion.
    pub fn create(&mut self, unit: UnitId, descs: &[ColliderDesc], scale: Vector3<Real>) -> ColliderInstance {
        assert!(!descs.is_empty(), "collider_create_instances called with zero descriptors");
        assert_eq!(
            descs.len(),
            1,
            "a unit may hold at most one collider (SPEC_FULL.md §3 invariant)"
        );
        let shape = build_shape(&descs[0], scale);
        let index = self.store.insert(unit, ColliderComponent { shape });
        ColliderInstance::new(index)
    }

    pub fn destroy(&mut self, instance: ColliderInstance) -> Option<(UnitId, u32)> {
        assert!(instance.is_valid(), "collider_destroy on sentinel instance");
        let (_, moved) = self.store.remove(instance.index);
        moved
    }

    pub fn instance_of(&self, unit: UnitId) -> ColliderInstance {
        ColliderInstance::new(self.store.index_of(unit))
    }

    pub fn shape(&self, instance: ColliderInstance) -> &SharedShape {
        assert!(instance.is_valid(), "collider op on sentinel instance");
        &self.store.get(instance.index).shape
    }

    pub fn unit_of(&self, instance: ColliderInstance) -> UnitId {
        self.store.unit_at(instance.index)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_sphere(radius: f32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(ShapeKind::Sphere as u32).to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&radius.to_le_bytes());
        bytes
    }

    #[test]
    fn parses_sphere_descriptor() {
        let bytes = pack_sphere(0.3);
        let descs = parse_descriptor_stream(&bytes).unwrap();
        assert_eq!(descs.len(), 1);
        match &descs[0] {
            ColliderDesc::Sphere { radius } => assert_eq!(*radius, 0.3),
            _ => panic!("expected sphere"),
        }
    }

    #[test]
    fn truncated_stream_is_a_recoverable_error() {
        let mut bytes = pack_sphere(0.3);
        bytes.truncate(bytes.len() - 2);
        assert!(parse_descriptor_stream(&bytes).is_err());
    }

    #[test]
    #[should_panic(expected = "unknown collider shape type")]
    fn unknown_shape_type_is_fatal() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&99u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let _ = parse_descriptor_stream(&bytes);
    }

    #[test]
    fn create_and_destroy_middle_collider_swaps_tail() {
        let mut store = ColliderStore::new();
        let scale = Vector3::new(1.0, 1.0, 1.0);
        store.create(UnitId(1), &[ColliderDesc::Sphere { radius: 1.0 }], scale);
        let b = store.create(UnitId(2), &[ColliderDesc::Sphere { radius: 1.0 }], scale);
        store.create(UnitId(3), &[ColliderDesc::Sphere { radius: 1.0 }], scale);

        let moved = store.destroy(b);
        assert_eq!(moved, Some((UnitId(3), b.index)));
        assert_eq!(store.len(), 2);
    }
}

//! The EventBus and its typed output records. `StepEngine` (step.rs) is the
//! only writer; callers drain/rotate once per frame (SPEC_FULL.md §5).
//!
//! Grounded on `physics_world_bullet.cpp`'s `tick_callback` (pair-diff
//! producing touch/trigger events) and
//! `stefnotch-cgue23-cat-to-the-past/physics/src/physics_events.rs` for the
//! Rust event-enum shape; the `HashSet`-based current/previous pair diffing
//! idiom comes from `other_examples/3ee844a0_poro-nAIVE`'s physics module.

use nalgebra::{Isometry3, Vector3};

use crate::ids::{ActorInstance, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionEventKind {
    TouchBegin,
    Touching,
    TouchEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEventKind {
    Enter,
    Leave,
}

#[derive(Debug, Clone, Copy)]
pub struct PhysicsTransformEvent {
    pub unit_id: UnitId,
    pub world: Isometry3<f32>,
}

#[derive(Debug, Clone, Copy)]
pub struct PhysicsCollisionEvent {
    pub units: [UnitId; 2],
    pub actors: [ActorInstance; 2],
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub distance: f32,
    pub kind: CollisionEventKind,
}

#[derive(Debug, Clone, Copy)]
pub struct PhysicsTriggerEvent {
    pub trigger_unit: UnitId,
    pub other_unit: UnitId,
    pub kind: TriggerEventKind,
}

/// Unordered pair key: `(min << 32) | max`, so `(a,b)` and `(b,a)` collide to
/// the same key (SPEC_FULL.md §4.6).
pub fn pair_key(a: u32, b: u32) -> u64 {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    ((lo as u64) << 32) | hi as u64
}

/// Frame-scoped buffer of the three typed event kinds. Accumulates until
/// drained; `StepEngine::update` is the sole writer.
#[derive(Default)]
pub struct EventBus {
    transforms: Vec<PhysicsTransformEvent>,
    collisions: Vec<PhysicsCollisionEvent>,
    triggers: Vec<PhysicsTriggerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_transform(&mut self, event: PhysicsTransformEvent) {
        self.transforms.push(event);
    }

    pub fn push_collision(&mut self, event: PhysicsCollisionEvent) {
        self.collisions.push(event);
    }

    pub fn push_trigger(&mut self, event: PhysicsTriggerEvent) {
        self.triggers.push(event);
    }

    pub fn transforms(&self) -> &[PhysicsTransformEvent] {
        &self.transforms
    }

    pub fn collisions(&self) -> &[PhysicsCollisionEvent] {
        &self.collisions
    }

    pub fn triggers(&self) -> &[PhysicsTriggerEvent] {
        &self.triggers
    }

    /// Drains and returns every event kind, leaving the bus empty for the
    /// next frame. Unread events otherwise accumulate (§5).
    pub fn drain(&mut self) -> (Vec<PhysicsTransformEvent>, Vec<PhysicsCollisionEvent>, Vec<PhysicsTriggerEvent>) {
        (
            std::mem::take(&mut self.transforms),
            std::mem::take(&mut self.collisions),
            std::mem::take(&mut self.triggers),
        )
    }

    pub fn clear(&mut self) {
        self.transforms.clear();
        self.collisions.clear();
        self.triggers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(pair_key(3, 7), pair_key(7, 3));
        assert_ne!(pair_key(3, 7), pair_key(3, 8));
    }

    #[test]
    fn drain_empties_the_bus() {
        let mut bus = EventBus::new();
        bus.push_trigger(PhysicsTriggerEvent {
            trigger_unit: UnitId(1),
            other_unit: UnitId(2),
            kind: TriggerEventKind::Enter,
        });
        assert_eq!(bus.triggers().len(), 1);
        let (_, _, triggers) = bus.drain();
        assert_eq!(triggers.len(), 1);
        assert!(bus.triggers().is_empty());
    }
}

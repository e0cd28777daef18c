pub mod actor;
pub mod collider;
pub mod config;
pub mod events;
pub mod ids;
pub mod joint;
pub mod mover;
pub mod raycast;
pub mod step;
pub mod world;

pub use config::{PhysicsConfigResource, PhysicsSettings};
pub use ids::UnitId;
pub use world::PhysicsWorld;

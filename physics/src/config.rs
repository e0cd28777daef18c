//! Shared, read-only physics configuration: actor classes, materials and
//! collision filters, looked up by a 32-bit string hash.
//!
//! Grounded on `engine/resource/physics_resource.h`'s `PhysicsConfigResource`
//! / `PhysicsMaterial` / `PhysicsActor2` / `PhysicsCollisionFilter`.

/// 32-bit hash of a human-readable name, the same role Crown's `StringId32`
/// plays: a stable, compact key produced once (offline, by the resource
/// compiler) and carried everywhere at runtime instead of the string itself.
///
/// No crate in the retrieved corpus implements this exact scheme, since the
/// hash must bit-for-bit match whatever the external compiler already
/// produced for existing compiled assets — a generic hashing crate would not
/// reproduce that scheme. FNV-1a is used because it is a well-known,
/// trivially reproducible fixed-point algorithm, not because it is claimed
/// to be what the original compiler used bit-for-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId32(pub u32);

impl StringId32 {
    pub const fn from_str(s: &str) -> Self {
        const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
        const FNV_PRIME: u32 = 0x0100_0193;
        let bytes = s.as_bytes();
        let mut hash = FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
            i += 1;
        }
        StringId32(hash)
    }
}

impl From<&str> for StringId32 {
    fn from(s: &str) -> Self {
        StringId32::from_str(s)
    }
}

/// Tiny hand-rolled bitflags since pulling in the `bitflags` crate for three
/// bits would be the kind of dependency-for-its-own-sake the process
/// discourages; this is not reused outside `config.rs`.
macro_rules! bitflags_lite {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name($ty);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn from_bits(bits: $ty) -> Self {
                $name(bits)
            }

            pub const fn bits(self) -> $ty {
                self.0
            }

            pub fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bitflags_lite! {
    /// Bits carried on [`ActorClass::flags`].
    pub struct ActorClassFlags: u32 {
        const KINEMATIC = 1 << 0;
        const DYNAMIC = 1 << 1;
        const TRIGGER = 1 << 2;
    }
}

/// Damping and kind bits shared by every actor created from this class.
/// Mirrors `PhysicsActor2` in `physics_resource.h`.
#[derive(Debug, Clone, Copy)]
pub struct ActorClass {
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub flags: ActorClassFlags,
}

impl ActorClass {
    pub fn is_trigger(&self) -> bool {
        self.flags.contains(ActorClassFlags::TRIGGER)
    }

    pub fn is_kinematic(&self) -> bool {
        self.flags.contains(ActorClassFlags::KINEMATIC)
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(ActorClassFlags::DYNAMIC)
    }
}

/// Surface properties. `rolling_friction`/`spinning_friction` are retained
/// for descriptor-format fidelity with `PhysicsMaterial`; rapier3d's contact
/// model only consumes `friction`/`restitution` (see DESIGN.md).
#[derive(Debug, Clone, Copy)]
pub struct Material {
    pub friction: f32,
    pub restitution: f32,
    pub rolling_friction: f32,
    pub spinning_friction: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
            rolling_friction: 0.0,
            spinning_friction: 0.0,
        }
    }
}

/// Broadphase interaction groups. Mirrors `PhysicsCollisionFilter`.
#[derive(Debug, Clone, Copy)]
pub struct CollisionFilter {
    pub me: u32,
    pub mask: u32,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            me: u32::MAX,
            mask: u32::MAX,
        }
    }
}

impl CollisionFilter {
    pub fn to_interaction_groups(self) -> rapier3d::geometry::InteractionGroups {
        rapier3d::geometry::InteractionGroups::new(
            rapier3d::geometry::Group::from_bits_truncate(self.me),
            rapier3d::geometry::Group::from_bits_truncate(self.mask),
        )
    }
}

/// Read-only, shareable table of actor classes/materials/filters, keyed by
/// [`StringId32`]. Grounded on `PhysicsConfigResource`'s linear lookup
/// tables; we use hash maps instead of linear scans since nothing here
/// requires matching the original's storage layout, only its lookup
/// semantics.
#[derive(Default)]
pub struct PhysicsConfigResource {
    actor_classes: std::collections::HashMap<StringId32, ActorClass>,
    materials: std::collections::HashMap<StringId32, Material>,
    filters: std::collections::HashMap<StringId32, CollisionFilter>,
}

impl PhysicsConfigResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_actor_class(&mut self, name: StringId32, class: ActorClass) -> &mut Self {
        self.actor_classes.insert(name, class);
        self
    }

    pub fn add_material(&mut self, name: StringId32, material: Material) -> &mut Self {
        self.materials.insert(name, material);
        self
    }

    pub fn add_filter(&mut self, name: StringId32, filter: CollisionFilter) -> &mut Self {
        self.filters.insert(name, filter);
        self
    }

    pub fn actor_class(&self, name: StringId32) -> &ActorClass {
        self.actor_classes
            .get(&name)
            .unwrap_or_else(|| panic!("unknown actor class {:?}", name))
    }

    pub fn material(&self, name: StringId32) -> Material {
        self.materials.get(&name).copied().unwrap_or_default()
    }

    pub fn filter(&self, name: StringId32) -> CollisionFilter {
        self.filters.get(&name).copied().unwrap_or_default()
    }
}

/// Global step-rate and safety-valve settings. Resolves Open Question #2
/// (SPEC_FULL.md §10): the velocity clamp is a setting, not a hard-coded
/// constant.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsSettings {
    pub max_substeps: u32,
    pub step_frequency: f32,
    pub max_linear_velocity: f32,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            max_substeps: 8,
            step_frequency: 60.0,
            max_linear_velocity: 100.0,
        }
    }
}

/// Hash of `"global"`, the default physics config identifier (SPEC_FULL §6).
pub const GLOBAL_CONFIG_ID: StringId32 = StringId32::from_str("global");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_distinct() {
        let a = StringId32::from_str("global");
        let b = StringId32::from_str("global");
        let c = StringId32::from_str("player");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn actor_class_flags_roundtrip() {
        let flags = ActorClassFlags::DYNAMIC | ActorClassFlags::TRIGGER;
        assert!(flags.contains(ActorClassFlags::DYNAMIC));
        assert!(flags.contains(ActorClassFlags::TRIGGER));
        assert!(!flags.contains(ActorClassFlags::KINEMATIC));
    }

    #[test]
    fn unknown_filter_defaults_to_collide_with_everything() {
        let config = PhysicsConfigResource::new();
        let filter = config.filter(StringId32::from_str("nonexistent"));
        assert_eq!(filter.me, u32::MAX);
        assert_eq!(filter.mask, u32::MAX);
    }
}

//! Descriptors and value types for the native structs passed to contact callbacks.
//!
//! Each struct has a process-wide [`StructLayout`], a Rust value type implementing
//! [`NativeStruct`], and a `#[repr(C)]` mirror whose size and field offsets the tests compare
//! against the descriptor.

use glam::{DVec3, Vec3, Vec3A};
use once_cell::sync::Lazy;

use super::handles::{BodyId, SubShapeId};
use crate::interop::{
    BridgeResult, FieldKind, LayoutBuilder, NativeStruct, StructLayout, ValueView, ValueViewMut,
};

// Fails only on an inconsistent declaration below. `verify_layouts` forces every descriptor,
// so such a mistake panics there, at startup, rather than inside a native callback.
fn build(builder: LayoutBuilder) -> StructLayout {
    match builder.build() {
        Ok(layout) => layout,
        Err(error) => panic!("{}", error),
    }
}

pub static COLLIDE_SHAPE_RESULT: Lazy<StructLayout> = Lazy::new(|| {
    build(
        LayoutBuilder::new("CollideShapeResult")
            .field("contact_point1", FieldKind::Vec3A)
            .field("contact_point2", FieldKind::Vec3A)
            .field("penetration_axis", FieldKind::Vec3A)
            .field("penetration_depth", FieldKind::F32)
            .field("sub_shape1_id", FieldKind::U32)
            .field("sub_shape2_id", FieldKind::U32)
            .field("body2_id", FieldKind::U32),
    )
});

pub static CONTACT_SETTINGS: Lazy<StructLayout> = Lazy::new(|| {
    build(
        LayoutBuilder::new("ContactSettings")
            .field("combined_friction", FieldKind::F32)
            .field("combined_restitution", FieldKind::F32)
            .field("inv_mass_scale1", FieldKind::F32)
            .field("inv_inertia_scale1", FieldKind::F32)
            .field("inv_mass_scale2", FieldKind::F32)
            .field("inv_inertia_scale2", FieldKind::F32)
            .field("is_sensor", FieldKind::Bool)
            .field("relative_linear_surface_velocity", FieldKind::Vec3A)
            .field("relative_angular_surface_velocity", FieldKind::Vec3A),
    )
});

pub static CONTACT_MANIFOLD: Lazy<StructLayout> = Lazy::new(|| {
    build(
        LayoutBuilder::new("ContactManifold")
            .field("base_offset", FieldKind::DVec3)
            .field("normal", FieldKind::Vec3A)
            .field("penetration_depth", FieldKind::F32)
            .field("sub_shape1_id", FieldKind::U32)
            .field("sub_shape2_id", FieldKind::U32),
    )
});

pub static SUB_SHAPE_ID_PAIR: Lazy<StructLayout> = Lazy::new(|| {
    build(
        LayoutBuilder::new("SubShapeIDPair")
            .field("body1_id", FieldKind::U32)
            .field("sub_shape1_id", FieldKind::U32)
            .field("body2_id", FieldKind::U32)
            .field("sub_shape2_id", FieldKind::U32),
    )
});

/// `#[repr(C)]` mirrors of the native structs.
pub mod raw {
    /// A 16-byte aligned vector slot, as the native library stores its vectors.
    #[repr(C, align(16))]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Float4(pub [f32; 4]);

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct CollideShapeResult {
        pub contact_point1: Float4,
        pub contact_point2: Float4,
        pub penetration_axis: Float4,
        pub penetration_depth: f32,
        pub sub_shape1_id: u32,
        pub sub_shape2_id: u32,
        pub body2_id: u32,
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ContactSettings {
        pub combined_friction: f32,
        pub combined_restitution: f32,
        pub inv_mass_scale1: f32,
        pub inv_inertia_scale1: f32,
        pub inv_mass_scale2: f32,
        pub inv_inertia_scale2: f32,
        pub is_sensor: bool,
        pub relative_linear_surface_velocity: Float4,
        pub relative_angular_surface_velocity: Float4,
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ContactManifold {
        pub base_offset: [f64; 3],
        pub normal: Float4,
        pub penetration_depth: f32,
        pub sub_shape1_id: u32,
        pub sub_shape2_id: u32,
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SubShapeIdPair {
        pub body1_id: u32,
        pub sub_shape1_id: u32,
        pub body2_id: u32,
        pub sub_shape2_id: u32,
    }
}

/// Builds every descriptor and checks it against its mirror.
///
/// Call once at startup, before creating contact listeners: the descriptors are built lazily
/// and the first use would otherwise happen on a native simulation thread. Panics if a
/// descriptor declaration is inconsistent, which is a bug in this module.
pub fn verify_layouts() -> BridgeResult<()> {
    COLLIDE_SHAPE_RESULT.check_mirror::<raw::CollideShapeResult>()?;
    CONTACT_SETTINGS.check_mirror::<raw::ContactSettings>()?;
    CONTACT_MANIFOLD.check_mirror::<raw::ContactManifold>()?;
    SUB_SHAPE_ID_PAIR.check_mirror::<raw::SubShapeIdPair>()
}

/// Result of a narrow phase shape query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollideShapeResult {
    /// Deepest point on the first shape, relative to the base offset.
    pub contact_point1: Vec3,
    /// Deepest point on the second shape, relative to the base offset.
    pub contact_point2: Vec3,
    pub penetration_axis: Vec3,
    pub penetration_depth: f32,
    pub sub_shape1_id: SubShapeId,
    pub sub_shape2_id: SubShapeId,
    pub body2_id: BodyId,
}

impl NativeStruct for CollideShapeResult {
    fn layout() -> &'static StructLayout {
        &COLLIDE_SHAPE_RESULT
    }

    fn store(&self, view: &mut ValueViewMut<'_>) -> BridgeResult<()> {
        view.set("contact_point1", Vec3A::from(self.contact_point1))?;
        view.set("contact_point2", Vec3A::from(self.contact_point2))?;
        view.set("penetration_axis", Vec3A::from(self.penetration_axis))?;
        view.set("penetration_depth", self.penetration_depth)?;
        view.set("sub_shape1_id", self.sub_shape1_id.0)?;
        view.set("sub_shape2_id", self.sub_shape2_id.0)?;
        view.set("body2_id", self.body2_id.0)
    }

    fn load(view: &ValueView<'_>) -> BridgeResult<Self> {
        Ok(Self {
            contact_point1: view.get::<Vec3A>("contact_point1")?.into(),
            contact_point2: view.get::<Vec3A>("contact_point2")?.into(),
            penetration_axis: view.get::<Vec3A>("penetration_axis")?.into(),
            penetration_depth: view.get("penetration_depth")?,
            sub_shape1_id: SubShapeId(view.get("sub_shape1_id")?),
            sub_shape2_id: SubShapeId(view.get("sub_shape2_id")?),
            body2_id: BodyId(view.get("body2_id")?),
        })
    }
}

/// Per-contact settings a listener may adjust before the contact constraint is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactSettings {
    pub combined_friction: f32,
    pub combined_restitution: f32,
    pub inv_mass_scale1: f32,
    pub inv_inertia_scale1: f32,
    pub inv_mass_scale2: f32,
    pub inv_inertia_scale2: f32,
    /// Report the contact without any collision response.
    pub is_sensor: bool,
    pub relative_linear_surface_velocity: Vec3,
    pub relative_angular_surface_velocity: Vec3,
}

impl Default for ContactSettings {
    fn default() -> Self {
        Self {
            combined_friction: 0.0,
            combined_restitution: 0.0,
            inv_mass_scale1: 1.0,
            inv_inertia_scale1: 1.0,
            inv_mass_scale2: 1.0,
            inv_inertia_scale2: 1.0,
            is_sensor: false,
            relative_linear_surface_velocity: Vec3::ZERO,
            relative_angular_surface_velocity: Vec3::ZERO,
        }
    }
}

impl NativeStruct for ContactSettings {
    fn layout() -> &'static StructLayout {
        &CONTACT_SETTINGS
    }

    fn store(&self, view: &mut ValueViewMut<'_>) -> BridgeResult<()> {
        view.set("combined_friction", self.combined_friction)?;
        view.set("combined_restitution", self.combined_restitution)?;
        view.set("inv_mass_scale1", self.inv_mass_scale1)?;
        view.set("inv_inertia_scale1", self.inv_inertia_scale1)?;
        view.set("inv_mass_scale2", self.inv_mass_scale2)?;
        view.set("inv_inertia_scale2", self.inv_inertia_scale2)?;
        view.set("is_sensor", self.is_sensor)?;
        view.set(
            "relative_linear_surface_velocity",
            Vec3A::from(self.relative_linear_surface_velocity),
        )?;
        view.set(
            "relative_angular_surface_velocity",
            Vec3A::from(self.relative_angular_surface_velocity),
        )
    }

    fn load(view: &ValueView<'_>) -> BridgeResult<Self> {
        Ok(Self {
            combined_friction: view.get("combined_friction")?,
            combined_restitution: view.get("combined_restitution")?,
            inv_mass_scale1: view.get("inv_mass_scale1")?,
            inv_inertia_scale1: view.get("inv_inertia_scale1")?,
            inv_mass_scale2: view.get("inv_mass_scale2")?,
            inv_inertia_scale2: view.get("inv_inertia_scale2")?,
            is_sensor: view.get("is_sensor")?,
            relative_linear_surface_velocity: view
                .get::<Vec3A>("relative_linear_surface_velocity")?
                .into(),
            relative_angular_surface_velocity: view
                .get::<Vec3A>("relative_angular_surface_velocity")?
                .into(),
        })
    }
}

/// Contact between two bodies, in world space relative to `base_offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactManifold {
    pub base_offset: DVec3,
    /// Direction to move the second body out of collision.
    pub normal: Vec3,
    pub penetration_depth: f32,
    pub sub_shape1_id: SubShapeId,
    pub sub_shape2_id: SubShapeId,
}

impl NativeStruct for ContactManifold {
    fn layout() -> &'static StructLayout {
        &CONTACT_MANIFOLD
    }

    fn store(&self, view: &mut ValueViewMut<'_>) -> BridgeResult<()> {
        view.set("base_offset", self.base_offset)?;
        view.set("normal", Vec3A::from(self.normal))?;
        view.set("penetration_depth", self.penetration_depth)?;
        view.set("sub_shape1_id", self.sub_shape1_id.0)?;
        view.set("sub_shape2_id", self.sub_shape2_id.0)
    }

    fn load(view: &ValueView<'_>) -> BridgeResult<Self> {
        Ok(Self {
            base_offset: view.get("base_offset")?,
            normal: view.get::<Vec3A>("normal")?.into(),
            penetration_depth: view.get("penetration_depth")?,
            sub_shape1_id: SubShapeId(view.get("sub_shape1_id")?),
            sub_shape2_id: SubShapeId(view.get("sub_shape2_id")?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubShapeIdPair {
    pub body1_id: BodyId,
    pub sub_shape1_id: SubShapeId,
    pub body2_id: BodyId,
    pub sub_shape2_id: SubShapeId,
}

impl NativeStruct for SubShapeIdPair {
    fn layout() -> &'static StructLayout {
        &SUB_SHAPE_ID_PAIR
    }

    fn store(&self, view: &mut ValueViewMut<'_>) -> BridgeResult<()> {
        view.set("body1_id", self.body1_id.0)?;
        view.set("sub_shape1_id", self.sub_shape1_id.0)?;
        view.set("body2_id", self.body2_id.0)?;
        view.set("sub_shape2_id", self.sub_shape2_id.0)
    }

    fn load(view: &ValueView<'_>) -> BridgeResult<Self> {
        Ok(Self {
            body1_id: BodyId(view.get("body1_id")?),
            sub_shape1_id: SubShapeId(view.get("sub_shape1_id")?),
            body2_id: BodyId(view.get("body2_id")?),
            sub_shape2_id: SubShapeId(view.get("sub_shape2_id")?),
        })
    }
}

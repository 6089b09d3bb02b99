//! Conversion between native struct bytes and Rust value types.
//!
//! Values are stored in native byte order with their exact bit patterns; nothing is widened,
//! truncated or range checked. Out of range values are the caller's problem, as they are for
//! the native functions receiving them.

use std::ffi::c_void;
use std::fmt;

use glam::{DVec3, Mat4, Quat, Vec3, Vec3A, Vec4};

use super::error::{BridgeError, BridgeResult};
use super::layout::{FieldKind, StructLayout};
use super::value_view::{ValueView, ValueViewMut};

/// A fixed-width value that maps onto exactly one [`FieldKind`].
pub trait NativeValue: Sized {
    /// The field kind this value is stored as.
    const KIND: FieldKind;

    /// Reads the value from exactly `KIND.size()` bytes.
    fn read_from(bytes: &[u8]) -> Self;

    /// Writes the value into exactly `KIND.size()` bytes.
    fn write_to(&self, bytes: &mut [u8]);
}

/// A pointer-sized native address stored inside a struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub usize);

impl Address {
    pub const NULL: Address = Address(0);

    #[inline(always)]
    pub fn from_ptr<T>(pointer: *const T) -> Self {
        Address(pointer as usize)
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    #[inline(always)]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

macro_rules! impl_native_scalar {
    ($t:ty, $kind:expr) => {
        impl NativeValue for $t {
            const KIND: FieldKind = $kind;

            #[inline(always)]
            fn read_from(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }

            #[inline(always)]
            fn write_to(&self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

impl_native_scalar!(u8, FieldKind::U8);
impl_native_scalar!(u16, FieldKind::U16);
impl_native_scalar!(i32, FieldKind::I32);
impl_native_scalar!(u32, FieldKind::U32);
impl_native_scalar!(i64, FieldKind::I64);
impl_native_scalar!(u64, FieldKind::U64);
// Floats go through to_ne_bytes/from_ne_bytes, which preserves NaN payloads and signed zero.
impl_native_scalar!(f32, FieldKind::F32);
impl_native_scalar!(f64, FieldKind::F64);

impl NativeValue for bool {
    const KIND: FieldKind = FieldKind::Bool;

    #[inline(always)]
    fn read_from(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    #[inline(always)]
    fn write_to(&self, bytes: &mut [u8]) {
        bytes[0] = *self as u8;
    }
}

impl NativeValue for Address {
    const KIND: FieldKind = FieldKind::Address;

    #[inline(always)]
    fn read_from(bytes: &[u8]) -> Self {
        let mut raw = [0u8; std::mem::size_of::<usize>()];
        raw.copy_from_slice(bytes);
        Address(usize::from_ne_bytes(raw))
    }

    #[inline(always)]
    fn write_to(&self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.0.to_ne_bytes());
    }
}

#[inline(always)]
fn read_f32_lanes<const N: usize>(bytes: &[u8]) -> [f32; N] {
    let mut lanes = [0.0; N];
    for (i, lane) in lanes.iter_mut().enumerate() {
        *lane = f32::read_from(&bytes[i * 4..i * 4 + 4]);
    }
    lanes
}

#[inline(always)]
fn write_f32_lanes(lanes: &[f32], bytes: &mut [u8]) {
    for (i, lane) in lanes.iter().enumerate() {
        lane.write_to(&mut bytes[i * 4..i * 4 + 4]);
    }
}

impl NativeValue for Vec3 {
    const KIND: FieldKind = FieldKind::Vec3;

    #[inline(always)]
    fn read_from(bytes: &[u8]) -> Self {
        Vec3::from_array(read_f32_lanes::<3>(bytes))
    }

    #[inline(always)]
    fn write_to(&self, bytes: &mut [u8]) {
        write_f32_lanes(&self.to_array(), bytes);
    }
}

impl NativeValue for Vec3A {
    const KIND: FieldKind = FieldKind::Vec3A;

    #[inline(always)]
    fn read_from(bytes: &[u8]) -> Self {
        let [x, y, z, _] = read_f32_lanes::<4>(bytes);
        Vec3A::new(x, y, z)
    }

    /// The unused fourth lane repeats `z`, the convention native SIMD vectors keep so that
    /// lane-wise operations never see garbage.
    #[inline(always)]
    fn write_to(&self, bytes: &mut [u8]) {
        write_f32_lanes(&[self.x, self.y, self.z, self.z], bytes);
    }
}

impl NativeValue for Vec4 {
    const KIND: FieldKind = FieldKind::Vec4;

    #[inline(always)]
    fn read_from(bytes: &[u8]) -> Self {
        Vec4::from_array(read_f32_lanes::<4>(bytes))
    }

    #[inline(always)]
    fn write_to(&self, bytes: &mut [u8]) {
        write_f32_lanes(&self.to_array(), bytes);
    }
}

impl NativeValue for Quat {
    const KIND: FieldKind = FieldKind::Quat;

    #[inline(always)]
    fn read_from(bytes: &[u8]) -> Self {
        let [x, y, z, w] = read_f32_lanes::<4>(bytes);
        Quat::from_xyzw(x, y, z, w)
    }

    #[inline(always)]
    fn write_to(&self, bytes: &mut [u8]) {
        write_f32_lanes(&[self.x, self.y, self.z, self.w], bytes);
    }
}

impl NativeValue for Mat4 {
    const KIND: FieldKind = FieldKind::Mat44;

    fn read_from(bytes: &[u8]) -> Self {
        Mat4::from_cols(
            Vec4::read_from(&bytes[0..16]),
            Vec4::read_from(&bytes[16..32]),
            Vec4::read_from(&bytes[32..48]),
            Vec4::read_from(&bytes[48..64]),
        )
    }

    fn write_to(&self, bytes: &mut [u8]) {
        for column in 0..4 {
            self.col(column)
                .write_to(&mut bytes[column * 16..column * 16 + 16]);
        }
    }
}

impl NativeValue for DVec3 {
    const KIND: FieldKind = FieldKind::DVec3;

    #[inline(always)]
    fn read_from(bytes: &[u8]) -> Self {
        DVec3::new(
            f64::read_from(&bytes[0..8]),
            f64::read_from(&bytes[8..16]),
            f64::read_from(&bytes[16..24]),
        )
    }

    #[inline(always)]
    fn write_to(&self, bytes: &mut [u8]) {
        self.x.write_to(&mut bytes[0..8]);
        self.y.write_to(&mut bytes[8..16]);
        self.z.write_to(&mut bytes[16..24]);
    }
}

/// A Rust type mirrored by a native struct with a fixed layout.
pub trait NativeStruct: Sized {
    /// The shared descriptor of the native struct.
    fn layout() -> &'static StructLayout;

    /// Copies every field into `view`.
    fn store(&self, view: &mut ValueViewMut<'_>) -> BridgeResult<()>;

    /// Builds a value from every field of `view`.
    fn load(view: &ValueView<'_>) -> BridgeResult<Self>;
}

/// Writes `value` into `buffer`, which must be exactly the size of the value's layout.
pub fn write<T: NativeStruct>(value: &T, buffer: &mut [u8]) -> BridgeResult<()> {
    let mut view = ValueViewMut::new(T::layout(), buffer)?;
    value.store(&mut view)
}

/// Reads a value out of `buffer`, which must be exactly the size of the value's layout.
pub fn read<T: NativeStruct>(buffer: &[u8]) -> BridgeResult<T> {
    let view = ValueView::new(T::layout(), buffer)?;
    T::load(&view)
}

/// Reads a value out of native memory.
///
/// # Safety
/// `pointer` must be null or point to at least `T::layout().size()` readable bytes that stay
/// valid and unmodified for the duration of the call.
pub unsafe fn read_from_ptr<T: NativeStruct>(pointer: *const c_void) -> BridgeResult<T> {
    let view = ValueView::from_ptr(T::layout(), pointer)?;
    T::load(&view)
}

/// Writes a value into native memory.
///
/// # Safety
/// `pointer` must be null or point to at least `T::layout().size()` writable bytes that no one
/// else accesses for the duration of the call.
pub unsafe fn write_to_ptr<T: NativeStruct>(value: &T, pointer: *mut c_void) -> BridgeResult<()> {
    let mut view = ValueViewMut::from_ptr(T::layout(), pointer)?;
    value.store(&mut view)
}

/// Reads a single standalone value (not a struct) out of native memory.
///
/// # Safety
/// `pointer` must be null or point to `V::KIND.size()` readable bytes.
pub unsafe fn read_value_from_ptr<V: NativeValue>(
    pointer: *const c_void,
    what: &str,
) -> BridgeResult<V> {
    if pointer.is_null() {
        return Err(BridgeError::NullAddress {
            symbol: what.to_string(),
        });
    }
    let bytes = std::slice::from_raw_parts(pointer as *const u8, V::KIND.size());
    Ok(V::read_from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::layout::LayoutBuilder;
    use once_cell::sync::Lazy;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Pose {
        position: Vec3,
        active: bool,
        orientation: Quat,
        transform: Mat4,
        origin: DVec3,
        user: Address,
    }

    static POSE: Lazy<StructLayout> = Lazy::new(|| {
        LayoutBuilder::new("Pose")
            .field("position", FieldKind::Vec3)
            .field("active", FieldKind::Bool)
            .field("orientation", FieldKind::Quat)
            .field("transform", FieldKind::Mat44)
            .field("origin", FieldKind::DVec3)
            .field("user", FieldKind::Address)
            .build()
            .unwrap()
    });

    impl NativeStruct for Pose {
        fn layout() -> &'static StructLayout {
            &POSE
        }

        fn store(&self, view: &mut ValueViewMut<'_>) -> BridgeResult<()> {
            view.set("position", self.position)?;
            view.set("active", self.active)?;
            view.set("orientation", self.orientation)?;
            view.set("transform", self.transform)?;
            view.set("origin", self.origin)?;
            view.set("user", self.user)
        }

        fn load(view: &ValueView<'_>) -> BridgeResult<Self> {
            Ok(Self {
                position: view.get("position")?,
                active: view.get("active")?,
                orientation: view.get("orientation")?,
                transform: view.get("transform")?,
                origin: view.get("origin")?,
                user: view.get("user")?,
            })
        }
    }

    fn bits3(v: Vec3) -> [u32; 3] {
        [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()]
    }

    #[test]
    fn vec3_round_trip_is_bit_exact() {
        let mut bytes = [0u8; 12];
        let value = Vec3::new(1.5, -2.25, 0.0);
        value.write_to(&mut bytes);
        assert_eq!(bits3(Vec3::read_from(&bytes)), bits3(value));

        let odd = Vec3::new(-0.0, f32::from_bits(0x7fc0_1234), f32::MIN_POSITIVE);
        odd.write_to(&mut bytes);
        assert_eq!(bits3(Vec3::read_from(&bytes)), bits3(odd));
    }

    #[test]
    fn vec3a_fills_fourth_lane_with_z() {
        let mut bytes = [0xffu8; 16];
        Vec3A::new(1.0, 2.0, 3.0).write_to(&mut bytes);
        assert_eq!(f32::read_from(&bytes[12..16]), 3.0);
        assert_eq!(Vec3A::read_from(&bytes), Vec3A::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn matrix_is_four_column_vectors() {
        let matrix = Mat4::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0,
            16.0,
        ]);
        let mut bytes = [0u8; 64];
        matrix.write_to(&mut bytes);
        assert_eq!(Vec4::read_from(&bytes[16..32]), Vec4::new(5.0, 6.0, 7.0, 8.0));
        assert_eq!(Mat4::read_from(&bytes), matrix);
    }

    #[test]
    fn struct_round_trip() {
        let pose = Pose {
            position: Vec3::new(1.5, -2.25, 0.0),
            active: true,
            orientation: Quat::from_xyzw(0.0, 0.0, 0.70710677, 0.70710677),
            transform: Mat4::from_translation(Vec3::new(4.0, 5.0, 6.0)),
            origin: DVec3::new(1e12, -3.5, 0.25),
            user: Address(0xdead_beef),
        };
        let mut buffer = vec![0u8; POSE.size()];
        write(&pose, &mut buffer).unwrap();
        let back: Pose = read(&buffer).unwrap();
        assert_eq!(back, pose);
        assert_eq!(buffer[POSE.offset_of("active").unwrap()], 1);
    }

    #[test]
    fn wrong_sized_buffer_is_rejected() {
        let mut buffer = vec![0u8; POSE.size() - 1];
        let pose_err = read::<Pose>(&buffer).unwrap_err();
        assert!(matches!(pose_err, BridgeError::BufferSize { .. }));

        let pose = Pose {
            position: Vec3::ZERO,
            active: false,
            orientation: Quat::IDENTITY,
            transform: Mat4::IDENTITY,
            origin: DVec3::ZERO,
            user: Address::NULL,
        };
        assert!(write(&pose, &mut buffer).is_err());
    }

    #[test]
    fn pointer_variants() {
        let pose = Pose {
            position: Vec3::X,
            active: true,
            orientation: Quat::IDENTITY,
            transform: Mat4::IDENTITY,
            origin: DVec3::Y,
            user: Address(8),
        };
        let mut backing = vec![0u64; POSE.size() / 8];
        let pointer = backing.as_mut_ptr() as *mut c_void;
        unsafe {
            write_to_ptr(&pose, pointer).unwrap();
            assert_eq!(read_from_ptr::<Pose>(pointer).unwrap(), pose);
            assert!(read_from_ptr::<Pose>(std::ptr::null()).is_err());
            let value: f64 =
                read_value_from_ptr(&backing[0] as *const u64 as *const c_void, "x").unwrap();
            assert_eq!(value.to_bits(), backing[0]);
        }
    }
}

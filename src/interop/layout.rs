//! Declarative descriptions of native struct layouts.
//!
//! Offsets are computed from declaration order using C alignment rules. Explicit padding and
//! alignment directives exist for the places where the native compiler does something a plain
//! declaration cannot express, but hand-written offsets should stay the exception: a drifted
//! offset corrupts memory silently.

use std::fmt;

use super::error::{BridgeError, BridgeResult};

/// Semantic type of a field in a native struct.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// One byte, zero is false.
    Bool,
    U8,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// A pointer-sized address.
    Address,
    /// Three packed 32-bit floats.
    Vec3,
    /// Three 32-bit floats stored in a 16-byte aligned, four-lane slot.
    Vec3A,
    /// Four 32-bit floats, 16-byte aligned.
    Vec4,
    /// Quaternion stored as x, y, z, w.
    Quat,
    /// Column-major 4x4 matrix made of four `Vec4` columns.
    Mat44,
    /// Three packed 64-bit floats.
    DVec3,
    /// A nested struct.
    Struct(&'static StructLayout),
}

impl FieldKind {
    /// Size of the field in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        match self {
            FieldKind::Bool | FieldKind::U8 => 1,
            FieldKind::U16 => 2,
            FieldKind::I32 | FieldKind::U32 | FieldKind::F32 => 4,
            FieldKind::I64 | FieldKind::U64 | FieldKind::F64 => 8,
            FieldKind::Address => std::mem::size_of::<usize>(),
            FieldKind::Vec3 => 12,
            FieldKind::Vec3A | FieldKind::Vec4 | FieldKind::Quat => 16,
            FieldKind::Mat44 => 64,
            FieldKind::DVec3 => 24,
            FieldKind::Struct(layout) => layout.size(),
        }
    }

    /// Required alignment of the field in bytes.
    #[inline]
    pub fn align(&self) -> usize {
        match self {
            FieldKind::Bool | FieldKind::U8 => 1,
            FieldKind::U16 => 2,
            FieldKind::I32 | FieldKind::U32 | FieldKind::F32 | FieldKind::Vec3 => 4,
            FieldKind::I64 | FieldKind::U64 | FieldKind::F64 | FieldKind::DVec3 => 8,
            FieldKind::Address => std::mem::align_of::<usize>(),
            FieldKind::Vec3A | FieldKind::Vec4 | FieldKind::Quat | FieldKind::Mat44 => 16,
            FieldKind::Struct(layout) => layout.align(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::U8 => write!(f, "u8"),
            FieldKind::U16 => write!(f, "u16"),
            FieldKind::I32 => write!(f, "i32"),
            FieldKind::U32 => write!(f, "u32"),
            FieldKind::I64 => write!(f, "i64"),
            FieldKind::U64 => write!(f, "u64"),
            FieldKind::F32 => write!(f, "f32"),
            FieldKind::F64 => write!(f, "f64"),
            FieldKind::Address => write!(f, "address"),
            FieldKind::Vec3 => write!(f, "Vec3"),
            FieldKind::Vec3A => write!(f, "Vec3A"),
            FieldKind::Vec4 => write!(f, "Vec4"),
            FieldKind::Quat => write!(f, "Quat"),
            FieldKind::Mat44 => write!(f, "Mat44"),
            FieldKind::DVec3 => write!(f, "DVec3"),
            FieldKind::Struct(layout) => write!(f, "struct {}", layout.name()),
        }
    }
}

/// A named field at a fixed byte offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDesc {
    pub name: &'static str,
    pub kind: FieldKind,
    pub offset: usize,
}

impl FieldDesc {
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.kind.size()
    }

    /// One past the last byte of the field.
    #[inline(always)]
    pub fn end(&self) -> usize {
        self.offset + self.kind.size()
    }
}

/// A run of bytes that belongs to no field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub offset: usize,
    pub len: usize,
    /// Whether the padding was requested with a directive rather than inserted for alignment.
    pub explicit: bool,
}

/// Immutable description of a native struct. Created once per struct kind and shared.
#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    name: &'static str,
    fields: Vec<FieldDesc>,
    padding: Vec<Padding>,
    size: usize,
    align: usize,
}

impl StructLayout {
    #[inline(always)]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Total size in bytes, including tail padding.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Fields in declaration order.
    #[inline(always)]
    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    #[inline(always)]
    pub fn padding(&self) -> &[Padding] {
        &self.padding
    }

    /// Looks a field up by name.
    pub fn field(&self, name: &str) -> BridgeResult<&FieldDesc> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| BridgeError::UnknownField {
                layout: self.name.to_string(),
                field: name.to_string(),
            })
    }

    pub fn offset_of(&self, name: &str) -> BridgeResult<usize> {
        self.field(name).map(|field| field.offset)
    }

    /// Sum of all field sizes.
    pub fn field_bytes(&self) -> usize {
        self.fields.iter().map(FieldDesc::size).sum()
    }

    /// Sum of all padding, implicit and explicit.
    pub fn padding_bytes(&self) -> usize {
        self.padding.iter().map(|padding| padding.len).sum()
    }

    /// Checks that fields and padding tile `[0, size)` exactly once.
    pub fn validate(&self) -> BridgeResult<()> {
        let mut spans: Vec<(usize, usize, &str)> = self
            .fields
            .iter()
            .map(|field| (field.offset, field.size(), field.name))
            .chain(
                self.padding
                    .iter()
                    .map(|padding| (padding.offset, padding.len, "<padding>")),
            )
            .collect();
        spans.sort_by_key(|span| span.0);

        let mut cursor = 0;
        for (offset, len, name) in spans {
            if offset < cursor {
                return Err(self.invalid(format!(
                    "`{name}` at offset {offset} overlaps the previous {cursor} bytes"
                )));
            }
            if offset > cursor {
                return Err(self.invalid(format!(
                    "bytes {cursor}..{offset} are neither a field nor padding"
                )));
            }
            cursor = offset + len;
        }
        if cursor != self.size {
            return Err(self.invalid(format!(
                "fields and padding cover {cursor} bytes, declared size is {}",
                self.size
            )));
        }
        if self.size % self.align != 0 {
            return Err(self.invalid(format!(
                "size {} is not a multiple of the alignment {}",
                self.size, self.align
            )));
        }
        Ok(())
    }

    /// Checks the descriptor against a `#[repr(C)]` Rust mirror of the same struct.
    pub fn check_mirror<T>(&self) -> BridgeResult<()> {
        let actual = std::mem::size_of::<T>();
        let actual_align = std::mem::align_of::<T>();
        if actual != self.size || actual_align != self.align {
            return Err(BridgeError::LayoutMismatch {
                layout: self.name.to_string(),
                expected: self.size,
                expected_align: self.align,
                actual,
                actual_align,
            });
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> BridgeError {
        BridgeError::InvalidLayout {
            layout: self.name.to_string(),
            reason,
        }
    }
}

/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Builds a [`StructLayout`] from ordered field declarations.
///
/// # Examples
/// ```
/// use rust_physics_bridge::interop::{FieldKind, LayoutBuilder};
///
/// let layout = LayoutBuilder::new("Settings")
///     .field("position", FieldKind::Vec3)
///     .field("enabled", FieldKind::Bool)
///     .field("mass", FieldKind::F32)
///     .build()
///     .unwrap();
/// assert_eq!(layout.offset_of("mass").unwrap(), 16);
/// assert_eq!(layout.size(), 20);
/// ```
#[derive(Debug)]
pub struct LayoutBuilder {
    name: &'static str,
    fields: Vec<FieldDesc>,
    padding: Vec<Padding>,
    cursor: usize,
    align: usize,
    total_size: Option<usize>,
    error: Option<String>,
}

impl LayoutBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            padding: Vec::new(),
            cursor: 0,
            align: 1,
            total_size: None,
            error: None,
        }
    }

    /// Appends a field at the next offset satisfying its alignment.
    pub fn field(self, name: &'static str, kind: FieldKind) -> Self {
        let offset = align_up(self.cursor, kind.align());
        self.place(name, kind, offset)
    }

    /// Appends a field at an explicit offset. The gap before it becomes padding.
    pub fn field_at(mut self, name: &'static str, kind: FieldKind, offset: usize) -> Self {
        if offset < self.cursor {
            let reason = format!(
                "`{name}` at offset {offset} overlaps the {} bytes already declared",
                self.cursor
            );
            self.fail(reason);
            return self;
        }
        if offset % kind.align() != 0 {
            let reason = format!(
                "`{name}` at offset {offset} is not aligned to {}",
                kind.align()
            );
            self.fail(reason);
            return self;
        }
        self.place(name, kind, offset)
    }

    /// Inserts explicit padding bytes at the current position.
    pub fn pad(mut self, bytes: usize) -> Self {
        if bytes > 0 {
            self.push_padding(self.cursor, bytes, true);
            self.cursor += bytes;
        }
        self
    }

    /// Pads up to the next multiple of `alignment`.
    pub fn align_to(mut self, alignment: usize) -> Self {
        if !alignment.is_power_of_two() {
            self.fail(format!("alignment {alignment} is not a power of two"));
            return self;
        }
        let target = align_up(self.cursor, alignment);
        let bytes = target - self.cursor;
        self.pad(bytes)
    }

    /// Raises the struct alignment, the equivalent of `alignas` on the native side.
    pub fn min_align(mut self, alignment: usize) -> Self {
        if !alignment.is_power_of_two() {
            self.fail(format!("alignment {alignment} is not a power of two"));
            return self;
        }
        self.align = self.align.max(alignment);
        self
    }

    /// Declares the total size. Anything past the last field becomes explicit tail padding.
    pub fn total_size(mut self, size: usize) -> Self {
        self.total_size = Some(size);
        self
    }

    pub fn build(self) -> BridgeResult<StructLayout> {
        let LayoutBuilder {
            name,
            fields,
            mut padding,
            cursor,
            align,
            total_size,
            error,
        } = self;

        if let Some(reason) = error {
            return Err(BridgeError::InvalidLayout {
                layout: name.to_string(),
                reason,
            });
        }

        let natural_size = align_up(cursor, align);
        let (size, explicit_tail) = match total_size {
            Some(declared) if declared < natural_size => {
                return Err(BridgeError::InvalidLayout {
                    layout: name.to_string(),
                    reason: format!(
                        "declared size {declared} is smaller than the {natural_size} bytes the fields need"
                    ),
                });
            }
            Some(declared) if declared % align != 0 => {
                return Err(BridgeError::InvalidLayout {
                    layout: name.to_string(),
                    reason: format!(
                        "declared size {declared} is not a multiple of the alignment {align}"
                    ),
                });
            }
            Some(declared) => (declared, true),
            None => (natural_size, false),
        };
        if size > cursor {
            padding.push(Padding {
                offset: cursor,
                len: size - cursor,
                explicit: explicit_tail,
            });
        }

        let layout = StructLayout {
            name,
            fields,
            padding,
            size,
            align,
        };
        layout.validate()?;
        Ok(layout)
    }

    fn place(mut self, name: &'static str, kind: FieldKind, offset: usize) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.fields.iter().any(|field| field.name == name) {
            self.fail(format!("field `{name}` is declared twice"));
            return self;
        }
        if offset > self.cursor {
            self.push_padding(self.cursor, offset - self.cursor, false);
        }
        self.fields.push(FieldDesc { name, kind, offset });
        self.cursor = offset + kind.size();
        self.align = self.align.max(kind.align());
        self
    }

    fn push_padding(&mut self, offset: usize, len: usize, explicit: bool) {
        self.padding.push(Padding {
            offset,
            len,
            explicit,
        });
    }

    fn fail(&mut self, reason: String) {
        if self.error.is_none() {
            self.error = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static INNER: Lazy<StructLayout> = Lazy::new(|| {
        LayoutBuilder::new("Inner")
            .field("flag", FieldKind::Bool)
            .field("value", FieldKind::F64)
            .build()
            .unwrap()
    });

    #[test]
    fn implicit_padding_after_bool() {
        let layout = LayoutBuilder::new("Settings")
            .field("position", FieldKind::Vec3)
            .field("enabled", FieldKind::Bool)
            .field("velocity", FieldKind::Vec3A)
            .build()
            .unwrap();

        assert_eq!(layout.offset_of("position").unwrap(), 0);
        assert_eq!(layout.offset_of("enabled").unwrap(), 12);
        assert_eq!(layout.offset_of("velocity").unwrap(), 16);
        assert_eq!(layout.size(), 32);
        assert_eq!(layout.align(), 16);
        assert_eq!(
            layout.padding(),
            &[Padding {
                offset: 13,
                len: 3,
                explicit: false
            }]
        );
        assert_eq!(layout.field_bytes() + layout.padding_bytes(), layout.size());
    }

    #[test]
    fn nested_struct_uses_inner_alignment() {
        let layout = LayoutBuilder::new("Outer")
            .field("tag", FieldKind::U16)
            .field("inner", FieldKind::Struct(&INNER))
            .build()
            .unwrap();
        assert_eq!(INNER.size(), 16);
        assert_eq!(layout.offset_of("inner").unwrap(), 8);
        assert_eq!(layout.size(), 24);
        assert_eq!(layout.align(), 8);
    }

    #[test]
    fn explicit_directives() {
        let layout = LayoutBuilder::new("Explicit")
            .field("a", FieldKind::U8)
            .pad(3)
            .field("b", FieldKind::U32)
            .align_to(16)
            .field_at("c", FieldKind::U64, 24)
            .min_align(16)
            .total_size(48)
            .build()
            .unwrap();

        assert_eq!(layout.offset_of("b").unwrap(), 4);
        assert_eq!(layout.offset_of("c").unwrap(), 24);
        assert_eq!(layout.size(), 48);
        assert_eq!(layout.align(), 16);
        let explicit: usize = layout
            .padding()
            .iter()
            .filter(|padding| padding.explicit)
            .map(|padding| padding.len)
            .sum();
        // 3 from pad, 8 from align_to, 16 of declared tail.
        assert_eq!(explicit, 27);
        assert_eq!(layout.field_bytes() + layout.padding_bytes(), 48);
    }

    #[test]
    fn overlapping_explicit_offset_is_rejected() {
        let err = LayoutBuilder::new("Broken")
            .field("a", FieldKind::U64)
            .field_at("b", FieldKind::U32, 4)
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidLayout { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn misaligned_offset_is_rejected() {
        let err = LayoutBuilder::new("Broken")
            .field_at("a", FieldKind::F32, 2)
            .build()
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidLayout { .. }));
    }

    #[test]
    fn duplicate_and_undersized_declarations_are_rejected() {
        assert!(LayoutBuilder::new("Dup")
            .field("a", FieldKind::U32)
            .field("a", FieldKind::U32)
            .build()
            .is_err());
        assert!(LayoutBuilder::new("Small")
            .field("a", FieldKind::Mat44)
            .total_size(32)
            .build()
            .is_err());
        assert!(LayoutBuilder::new("Odd")
            .field("a", FieldKind::U8)
            .align_to(3)
            .build()
            .is_err());
    }

    #[test]
    fn unknown_field_lookup() {
        let err = INNER.field("missing").unwrap_err();
        assert!(matches!(err, BridgeError::UnknownField { .. }));
    }

    #[test]
    fn mirror_check() {
        #[repr(C)]
        struct InnerMirror {
            flag: bool,
            value: f64,
        }
        INNER.check_mirror::<InnerMirror>().unwrap();
        assert!(matches!(
            INNER.check_mirror::<u32>(),
            Err(BridgeError::LayoutMismatch { .. })
        ));
    }
}

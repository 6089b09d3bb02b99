//! Typed lenses over bytes laid out by a [`StructLayout`].

use std::ffi::c_void;

use super::error::{BridgeError, BridgeResult};
use super::layout::{FieldDesc, FieldKind, StructLayout};
use super::marshal::NativeValue;

#[inline]
fn check_len(layout: &StructLayout, len: usize) -> BridgeResult<()> {
    if len != layout.size() {
        return Err(BridgeError::BufferSize {
            layout: layout.name().to_string(),
            expected: layout.size(),
            actual: len,
        });
    }
    Ok(())
}

#[inline]
fn check_kind(layout: &StructLayout, field: &FieldDesc, requested: &FieldKind) -> BridgeResult<()> {
    if field.kind != *requested {
        return Err(BridgeError::FieldKind {
            layout: layout.name().to_string(),
            field: field.name.to_string(),
            actual: field.kind.to_string(),
            requested: requested.to_string(),
        });
    }
    Ok(())
}

#[inline]
fn nested_layout(layout: &StructLayout, field: &FieldDesc) -> BridgeResult<&'static StructLayout> {
    match field.kind {
        FieldKind::Struct(inner) => Ok(inner),
        other => Err(BridgeError::FieldKind {
            layout: layout.name().to_string(),
            field: field.name.to_string(),
            actual: other.to_string(),
            requested: "struct".to_string(),
        }),
    }
}

/// Read-only view of a native struct.
#[derive(Debug, Clone, Copy)]
pub struct ValueView<'a> {
    layout: &'a StructLayout,
    bytes: &'a [u8],
}

impl<'a> ValueView<'a> {
    /// Binds `layout` to `bytes`. Fails unless the buffer has exactly the layout's size.
    pub fn new(layout: &'a StructLayout, bytes: &'a [u8]) -> BridgeResult<Self> {
        check_len(layout, bytes.len())?;
        Ok(Self { layout, bytes })
    }

    /// Binds `layout` to native memory.
    ///
    /// # Safety
    /// `pointer` must be null or point to `layout.size()` readable bytes valid for `'a`.
    pub unsafe fn from_ptr(layout: &'a StructLayout, pointer: *const c_void) -> BridgeResult<Self> {
        if pointer.is_null() {
            return Err(BridgeError::NullAddress {
                symbol: layout.name().to_string(),
            });
        }
        let bytes = std::slice::from_raw_parts(pointer as *const u8, layout.size());
        Ok(Self { layout, bytes })
    }

    #[inline(always)]
    pub fn layout(&self) -> &'a StructLayout {
        self.layout
    }

    #[inline(always)]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Start of the viewed struct, for passing to native code.
    #[inline(always)]
    pub fn as_ptr(&self) -> *const c_void {
        self.bytes.as_ptr() as *const c_void
    }

    /// Reads the named field.
    pub fn get<V: NativeValue>(&self, name: &str) -> BridgeResult<V> {
        let field = self.layout.field(name)?;
        self.get_field(field)
    }

    /// Reads a field through a descriptor already looked up from this view's layout.
    pub fn get_field<V: NativeValue>(&self, field: &FieldDesc) -> BridgeResult<V> {
        check_kind(self.layout, field, &V::KIND)?;
        Ok(V::read_from(&self.bytes[field.offset..field.end()]))
    }

    /// A view of a nested struct field.
    pub fn nested(&self, name: &str) -> BridgeResult<ValueView<'a>> {
        let field = self.layout.field(name)?;
        let inner = nested_layout(self.layout, field)?;
        Ok(ValueView {
            layout: inner,
            bytes: &self.bytes[field.offset..field.end()],
        })
    }
}

/// Writable view of a native struct.
#[derive(Debug)]
pub struct ValueViewMut<'a> {
    layout: &'a StructLayout,
    bytes: &'a mut [u8],
}

impl<'a> ValueViewMut<'a> {
    /// Binds `layout` to `bytes`. Fails unless the buffer has exactly the layout's size.
    pub fn new(layout: &'a StructLayout, bytes: &'a mut [u8]) -> BridgeResult<Self> {
        check_len(layout, bytes.len())?;
        Ok(Self { layout, bytes })
    }

    /// Binds `layout` to writable native memory.
    ///
    /// # Safety
    /// `pointer` must be null or point to `layout.size()` writable bytes valid for `'a` and not
    /// accessed through any other path while the view lives.
    pub unsafe fn from_ptr(layout: &'a StructLayout, pointer: *mut c_void) -> BridgeResult<Self> {
        if pointer.is_null() {
            return Err(BridgeError::NullAddress {
                symbol: layout.name().to_string(),
            });
        }
        let bytes = std::slice::from_raw_parts_mut(pointer as *mut u8, layout.size());
        Ok(Self { layout, bytes })
    }

    #[inline(always)]
    pub fn layout(&self) -> &'a StructLayout {
        self.layout
    }

    #[inline(always)]
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.bytes.as_mut_ptr() as *mut c_void
    }

    pub fn as_view(&self) -> ValueView<'_> {
        ValueView {
            layout: self.layout,
            bytes: &*self.bytes,
        }
    }

    pub fn get<V: NativeValue>(&self, name: &str) -> BridgeResult<V> {
        self.as_view().get(name)
    }

    /// Writes the named field.
    pub fn set<V: NativeValue>(&mut self, name: &str, value: V) -> BridgeResult<()> {
        let field = *self.layout.field(name)?;
        self.set_field(&field, value)
    }

    pub fn set_field<V: NativeValue>(&mut self, field: &FieldDesc, value: V) -> BridgeResult<()> {
        check_kind(self.layout, field, &V::KIND)?;
        value.write_to(&mut self.bytes[field.offset..field.end()]);
        Ok(())
    }

    /// A writable view of a nested struct field.
    pub fn nested_mut(&mut self, name: &str) -> BridgeResult<ValueViewMut<'_>> {
        let field = *self.layout.field(name)?;
        let inner = nested_layout(self.layout, &field)?;
        Ok(ValueViewMut {
            layout: inner,
            bytes: &mut self.bytes[field.offset..field.end()],
        })
    }

    /// Zeroes every byte, padding included.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }
}

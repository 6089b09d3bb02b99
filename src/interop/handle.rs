use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Weak;

use super::arena::ArenaShared;
use super::error::{BridgeError, BridgeResult};
use super::layout::StructLayout;
use super::marshal::NativeStruct;
use super::value_view::{ValueView, ValueViewMut};

struct Owner {
    arena: Weak<ArenaShared>,
    slot: usize,
    sequence: u64,
}

/// A native address, either owned through an [`Arena`](super::arena::Arena) or borrowed.
///
/// Dropping a handle never releases it; the owning arena does, unless [`NativeHandle::release`]
/// or [`NativeHandle::detach`] got there first.
pub struct NativeHandle {
    address: NonNull<c_void>,
    owner: Option<Owner>,
}

// SAFETY: the handle is an address plus bookkeeping; the native library decides which thread
// may touch the object behind it, same as for the raw pointer.
unsafe impl Send for NativeHandle {}

impl NativeHandle {
    pub(crate) fn owned(
        address: NonNull<c_void>,
        arena: Weak<ArenaShared>,
        slot: usize,
        sequence: u64,
    ) -> Self {
        Self {
            address,
            owner: Some(Owner {
                arena,
                slot,
                sequence,
            }),
        }
    }

    /// Wraps an address owned by someone else. Releasing it does nothing.
    #[inline(always)]
    pub fn borrowed(address: NonNull<c_void>) -> Self {
        Self {
            address,
            owner: None,
        }
    }

    /// Wraps a raw address received from `symbol`, refusing null.
    pub fn try_borrowed(symbol: &str, address: *mut c_void) -> BridgeResult<Self> {
        NonNull::new(address)
            .map(Self::borrowed)
            .ok_or_else(|| BridgeError::NullAddress {
                symbol: symbol.to_string(),
            })
    }

    /// A borrowed handle to the same address.
    #[inline(always)]
    pub fn borrow(&self) -> NativeHandle {
        Self::borrowed(self.address)
    }

    #[inline(always)]
    pub fn address(&self) -> NonNull<c_void> {
        self.address
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut c_void {
        self.address.as_ptr()
    }

    #[inline(always)]
    pub fn addr(&self) -> usize {
        self.address.as_ptr() as usize
    }

    #[inline(always)]
    pub fn is_owning(&self) -> bool {
        self.owner.is_some()
    }

    /// Whether an owning handle's release action already ran (or its arena is gone).
    /// Borrowed handles are never released.
    pub fn is_released(&self) -> bool {
        match &self.owner {
            None => false,
            Some(owner) => match owner.arena.upgrade() {
                Some(arena) => !arena.contains(owner.slot, owner.sequence),
                None => true,
            },
        }
    }

    /// The address, or [`BridgeError::Released`] once an owning handle was released.
    pub fn checked_ptr(&self) -> BridgeResult<*mut c_void> {
        if self.is_released() {
            return Err(BridgeError::Released { address: self.addr() });
        }
        Ok(self.as_ptr())
    }

    /// Runs the release action now. Later calls, and the arena's teardown, do nothing.
    pub fn release(&self) -> BridgeResult<()> {
        let Some(owner) = &self.owner else {
            return Ok(());
        };
        let Some(arena) = owner.arena.upgrade() else {
            return Ok(());
        };
        match arena.take(owner.slot, owner.sequence) {
            Some(entry) => {
                log::trace!("releasing {:#x}", self.addr());
                entry.release()
            }
            None => Ok(()),
        }
    }

    /// Gives up ownership without releasing: native code now owns the address.
    pub fn detach(self) -> NonNull<c_void> {
        if let Some(owner) = &self.owner {
            if let Some(arena) = owner.arena.upgrade() {
                drop(arena.take(owner.slot, owner.sequence));
            }
        }
        self.address
    }

    /// A view of the memory behind the handle.
    ///
    /// # Safety
    /// The address must point to `layout.size()` readable bytes.
    pub unsafe fn view(&self, layout: &'static StructLayout) -> BridgeResult<ValueView<'_>> {
        let pointer = self.checked_ptr()?;
        ValueView::from_ptr(layout, pointer)
    }

    /// A writable view of the memory behind the handle.
    ///
    /// # Safety
    /// The address must point to `layout.size()` writable bytes that nothing else accesses
    /// while the view lives.
    pub unsafe fn view_mut(
        &mut self,
        layout: &'static StructLayout,
    ) -> BridgeResult<ValueViewMut<'_>> {
        let pointer = self.checked_ptr()?;
        ValueViewMut::from_ptr(layout, pointer)
    }

    /// # Safety
    /// See [`NativeHandle::view`].
    pub unsafe fn load<T: NativeStruct>(&self) -> BridgeResult<T> {
        T::load(&self.view(T::layout())?)
    }

    /// # Safety
    /// See [`NativeHandle::view_mut`].
    pub unsafe fn store<T: NativeStruct>(&mut self, value: &T) -> BridgeResult<()> {
        value.store(&mut self.view_mut(T::layout())?)
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "NativeHandle<{:#x}, {}>",
            self.addr(),
            if self.is_owning() { "owned" } else { "borrowed" }
        )
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NativeHandle<{:#x}>", self.addr())
    }
}

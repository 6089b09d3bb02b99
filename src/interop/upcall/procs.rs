//! Per-kind function pointer tables and the trampolines' entry point.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;

use super::registry::UpcallRegistry;
use super::slot_table::Token;
use crate::interop::downcall::DowncallTable;
use crate::interop::error::BridgeResult;

/// Native `SetProcs(const Procs *procs)`.
pub type SetProcsFn = unsafe extern "C" fn(*const c_void);
/// Native `new(const void *user_data)`, returning the native listener object.
pub type CreateFn = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
/// Native `delete(void *object)`.
pub type DestroyFn = unsafe extern "C" fn(*mut c_void);

/// A callback interface of the native library.
///
/// Each kind owns a process-wide `#[repr(C)]` table of trampolines, the registry those
/// trampolines dispatch through, and the cell recording that the table was handed to native code.
pub trait ListenerKind: Sized + 'static {
    /// The Rust trait user code implements, usually `dyn SomeListener`.
    type Listener: ?Sized + Send + Sync + 'static;
    /// The `#[repr(C)]` struct of trampolines.
    type Procs: Sync + 'static;

    const NAME: &'static str;
    const SET_PROCS: &'static str;
    const CREATE: &'static str;
    const DESTROY: &'static str;

    fn procs() -> &'static Self::Procs;
    fn registry() -> &'static UpcallRegistry<Self::Listener>;
    fn installation() -> &'static ProcsInstallation;
}

/// Records the one-time installation of a procs table.
#[derive(Debug)]
pub struct ProcsInstallation {
    cell: OnceCell<()>,
    installs: AtomicUsize,
}

impl ProcsInstallation {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            installs: AtomicUsize::new(0),
        }
    }

    /// Runs `install` unless an earlier call succeeded. A failed install is retried next time.
    pub fn install_with<F>(&self, install: F) -> BridgeResult<()>
    where
        F: FnOnce() -> BridgeResult<()>,
    {
        self.cell
            .get_or_try_init(|| {
                install()?;
                self.installs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .map(|_| ())
    }

    pub fn is_installed(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Number of successful installations; at most one.
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

impl Default for ProcsInstallation {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands the procs table of `K` to native code, once per process.
pub fn install<K: ListenerKind>(table: &DowncallTable) -> BridgeResult<()> {
    K::installation().install_with(|| {
        let set_procs = table.bind::<SetProcsFn>(K::SET_PROCS)?;
        unsafe { set_procs.call(K::procs() as *const K::Procs as *const c_void) };
        log::debug!("installed {} procs through `{}`", K::NAME, K::SET_PROCS);
        Ok(())
    })
}

/// Native-visible memory passed as the first argument of every trampoline.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData {
    /// Bits of the listener's [`Token`].
    pub token: u64,
}

impl UserData {
    #[inline(always)]
    pub fn new(token: Token) -> Self {
        Self {
            token: token.to_bits(),
        }
    }

    /// Reads the token behind a user data pointer received from native code.
    ///
    /// # Safety
    /// `user_data` must be null or point to a live [`UserData`].
    #[inline(always)]
    pub unsafe fn token_from_ptr(user_data: *const c_void) -> Option<Token> {
        if user_data.is_null() {
            return None;
        }
        Token::from_bits((*(user_data as *const UserData)).token)
    }
}

/// Entry point of every trampoline: resolves the listener behind `user_data` and runs `call`.
///
/// `None` means nothing ran (null user data, retired token, dropped listener) or the listener
/// panicked; trampolines then answer with the kind's default.
///
/// # Safety
/// `user_data` must be null or point to a live [`UserData`].
#[inline]
pub unsafe fn dispatch<K, R, F>(user_data: *const c_void, call: F) -> Option<R>
where
    K: ListenerKind,
    F: FnOnce(&K::Listener) -> R,
{
    K::registry().dispatch(UserData::token_from_ptr(user_data), call)
}

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use super::procs::{install, CreateFn, DestroyFn, ListenerKind, UserData};
use super::slot_table::Token;
use crate::interop::arena::{Arena, ReleaseAction};
use crate::interop::downcall::{require_address, DowncallTable};
use crate::interop::error::BridgeResult;
use crate::interop::handle::NativeHandle;

/// A listener's token and the native-visible user data carrying it.
///
/// Dropping the registration retires the token.
pub struct Registration<K: ListenerKind> {
    listener: Arc<K::Listener>,
    token: Token,
    user_data: Box<UserData>,
}

impl<K: ListenerKind> Registration<K> {
    pub fn new(listener: Arc<K::Listener>) -> Self {
        let token = K::registry().register(&listener);
        Self {
            listener,
            token,
            user_data: Box::new(UserData::new(token)),
        }
    }

    #[inline(always)]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline(always)]
    pub fn listener(&self) -> &Arc<K::Listener> {
        &self.listener
    }

    /// Address of the user data. Stable for the registration's lifetime.
    #[inline(always)]
    pub fn user_data_ptr(&self) -> *mut c_void {
        &*self.user_data as *const UserData as *mut c_void
    }
}

impl<K: ListenerKind> Drop for Registration<K> {
    fn drop(&mut self) {
        K::registry().unregister(self.token);
    }
}

/// A native listener object that forwards its callbacks to a Rust listener.
///
/// Holds the listener strongly, so it stays alive for as long as the native object can call it.
/// Dropping destroys the native object first and then retires the token.
pub struct ManagedListener<K: ListenerKind> {
    handle: NativeHandle,
    registration: Registration<K>,
}

impl<K: ListenerKind> ManagedListener<K> {
    /// Registers `listener`, installs the kind's procs if needed and creates the native object
    /// inside `arena`.
    pub fn create(
        table: &DowncallTable,
        arena: &Arena,
        listener: Arc<K::Listener>,
    ) -> BridgeResult<Self> {
        let registration = Registration::<K>::new(listener);
        install::<K>(table)?;
        let create = table.bind::<CreateFn>(K::CREATE)?;
        let destroy = table.bind::<DestroyFn>(K::DESTROY)?;

        let address = require_address(
            unsafe { create.call(registration.user_data_ptr()) },
            K::CREATE,
        )?;
        let release = ReleaseAction::custom(move |address: NonNull<c_void>| {
            K::registry().unbind_address(address);
            unsafe { destroy.call(address.as_ptr()) };
            Ok(())
        });
        let handle = match arena.wrap_owning(address, release) {
            Ok(handle) => handle,
            Err(error) => {
                unsafe { destroy.call(address.as_ptr()) };
                return Err(error);
            }
        };
        K::registry().bind_address(address, registration.listener());
        log::trace!(
            "{}: created native listener {:p} for {}",
            K::NAME,
            address.as_ptr(),
            registration.token()
        );
        Ok(Self {
            handle,
            registration,
        })
    }

    #[inline(always)]
    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    /// The native object address to hand to the library.
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut c_void {
        self.handle.as_ptr()
    }

    #[inline(always)]
    pub fn token(&self) -> Token {
        self.registration.token()
    }

    #[inline(always)]
    pub fn listener(&self) -> &Arc<K::Listener> {
        self.registration.listener()
    }
}

impl<K: ListenerKind> Drop for ManagedListener<K> {
    fn drop(&mut self) {
        if let Err(error) = self.handle.release() {
            log::warn!("{}: {}", K::NAME, error);
        }
    }
}

impl<K: ListenerKind> fmt::Debug for ManagedListener<K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ManagedListener")
            .field("kind", &K::NAME)
            .field("handle", &self.handle)
            .field("token", &self.registration.token())
            .finish()
    }
}

/// A listener handed to the native library: either one of its built-in implementations or a
/// Rust listener behind a managed native object.
pub enum ListenerRef<K: ListenerKind> {
    Native(NativeHandle),
    Managed(ManagedListener<K>),
}

impl<K: ListenerKind> ListenerRef<K> {
    pub fn native_ptr(&self) -> *mut c_void {
        match self {
            ListenerRef::Native(handle) => handle.as_ptr(),
            ListenerRef::Managed(managed) => managed.as_ptr(),
        }
    }

    /// The Rust listener, for managed references.
    pub fn listener(&self) -> Option<&Arc<K::Listener>> {
        match self {
            ListenerRef::Native(_) => None,
            ListenerRef::Managed(managed) => Some(managed.listener()),
        }
    }

    /// Resolves an address the native library reports as the current listener.
    ///
    /// Addresses of managed native objects resolve to their Rust listener; any other address is
    /// returned as a borrowed native reference.
    pub fn resolve(address: NonNull<c_void>) -> Resolved<K> {
        match K::registry().lookup_address(address) {
            Some(listener) => Resolved::Managed(listener),
            None => Resolved::Native(NativeHandle::borrowed(address)),
        }
    }
}

impl<K: ListenerKind> From<ManagedListener<K>> for ListenerRef<K> {
    fn from(managed: ManagedListener<K>) -> Self {
        ListenerRef::Managed(managed)
    }
}

impl<K: ListenerKind> fmt::Debug for ListenerRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ListenerRef::Native(handle) => f.debug_tuple("Native").field(handle).finish(),
            ListenerRef::Managed(managed) => f.debug_tuple("Managed").field(managed).finish(),
        }
    }
}

/// What a native listener address refers to, without taking ownership.
pub enum Resolved<K: ListenerKind> {
    Native(NativeHandle),
    Managed(Arc<K::Listener>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::error::BridgeError;
    use crate::interop::symbols::StaticSymbols;
    use crate::interop::upcall::procs::{dispatch, ProcsInstallation, SetProcsFn};
    use crate::interop::upcall::registry::UpcallRegistry;
    use once_cell::sync::Lazy;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    trait Counter: Send + Sync {
        fn count(&self, value: u32) -> u32;
    }

    struct Doubler;

    impl Counter for Doubler {
        fn count(&self, value: u32) -> u32 {
            value * 2
        }
    }

    struct Offset(u32);

    impl Counter for Offset {
        fn count(&self, value: u32) -> u32 {
            value + self.0
        }
    }

    #[repr(C)]
    struct CounterProcs {
        count: unsafe extern "C" fn(*const c_void, u32) -> u32,
    }

    unsafe extern "C" fn count_trampoline(user_data: *const c_void, value: u32) -> u32 {
        dispatch::<CounterKind, _, _>(user_data, |listener| listener.count(value)).unwrap_or(0)
    }

    static PROCS: CounterProcs = CounterProcs {
        count: count_trampoline,
    };
    static REGISTRY: Lazy<UpcallRegistry<dyn Counter>> =
        Lazy::new(|| UpcallRegistry::new("Counter"));
    static INSTALLATION: ProcsInstallation = ProcsInstallation::new();

    struct CounterKind;

    impl ListenerKind for CounterKind {
        type Listener = dyn Counter;
        type Procs = CounterProcs;

        const NAME: &'static str = "Counter";
        const SET_PROCS: &'static str = "Counter_SetProcs";
        const CREATE: &'static str = "Counter_new";
        const DESTROY: &'static str = "Counter_delete";

        fn procs() -> &'static CounterProcs {
            &PROCS
        }

        fn registry() -> &'static UpcallRegistry<dyn Counter> {
            &REGISTRY
        }

        fn installation() -> &'static ProcsInstallation {
            &INSTALLATION
        }
    }

    // Native side: keeps the installed table and the user data of each object it creates.
    static INSTALLED_PROCS: AtomicUsize = AtomicUsize::new(0);
    static SET_PROCS_CALLS: AtomicUsize = AtomicUsize::new(0);
    static LIVE_OBJECTS: Lazy<Mutex<HashSet<usize>>> = Lazy::new(|| Mutex::new(HashSet::new()));

    struct NativeCounter {
        user_data: *const c_void,
    }

    unsafe extern "C" fn native_set_procs(procs: *const c_void) {
        INSTALLED_PROCS.store(procs as usize, Ordering::SeqCst);
        SET_PROCS_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn native_new(user_data: *mut c_void) -> *mut c_void {
        let object = Box::into_raw(Box::new(NativeCounter { user_data })) as *mut c_void;
        LIVE_OBJECTS.lock().unwrap().insert(object as usize);
        object
    }

    unsafe extern "C" fn native_delete(object: *mut c_void) {
        LIVE_OBJECTS.lock().unwrap().remove(&(object as usize));
        drop(Box::from_raw(object as *mut NativeCounter));
    }

    unsafe fn native_fire(object: *mut c_void, value: u32) -> u32 {
        let procs = &*(INSTALLED_PROCS.load(Ordering::SeqCst) as *const CounterProcs);
        let object = &*(object as *const NativeCounter);
        (procs.count)(object.user_data, value)
    }

    fn table() -> DowncallTable {
        DowncallTable::new(
            StaticSymbols::new("counter stub")
                .with::<SetProcsFn>("Counter_SetProcs", native_set_procs)
                .with::<CreateFn>("Counter_new", native_new)
                .with::<DestroyFn>("Counter_delete", native_delete),
        )
    }

    #[test]
    fn callbacks_reach_each_listener() {
        let table = table();
        let arena = Arena::new();
        let doubler = ManagedListener::<CounterKind>::create(&table, &arena, Arc::new(Doubler)).unwrap();
        let offset = ManagedListener::<CounterKind>::create(&table, &arena, Arc::new(Offset(100))).unwrap();

        assert_eq!(unsafe { native_fire(doubler.as_ptr(), 21) }, 42);
        assert_eq!(unsafe { native_fire(offset.as_ptr(), 1) }, 101);
        assert_eq!(SET_PROCS_CALLS.load(Ordering::SeqCst), 1);
        assert!(CounterKind::installation().is_installed());
    }

    #[test]
    fn drop_destroys_native_object_then_retires_token() {
        let table = table();
        let arena = Arena::new();
        let managed = ManagedListener::<CounterKind>::create(&table, &arena, Arc::new(Doubler)).unwrap();
        let address = managed.as_ptr() as usize;
        let token = managed.token();
        assert!(LIVE_OBJECTS.lock().unwrap().contains(&address));
        assert!(matches!(
            ListenerRef::<CounterKind>::resolve(managed.handle().address()),
            Resolved::Managed(_)
        ));

        drop(managed);
        assert!(!LIVE_OBJECTS.lock().unwrap().contains(&address));
        assert!(REGISTRY.resolve(token).is_none());
        assert_eq!(arena.live_handles(), 0);

        // A late callback carrying the retired token is a no-op.
        let stale = UserData::new(token);
        let answer =
            unsafe { count_trampoline(&stale as *const UserData as *const c_void, 5) };
        assert_eq!(answer, 0);
    }

    #[test]
    fn arena_close_destroys_native_objects() {
        let table = table();
        let arena = Arena::new();
        let managed = ManagedListener::<CounterKind>::create(&table, &arena, Arc::new(Doubler)).unwrap();
        let address = managed.as_ptr() as usize;
        arena.close().unwrap();
        assert!(!LIVE_OBJECTS.lock().unwrap().contains(&address));
        assert!(managed.handle().is_released());
        drop(managed);
    }

    #[test]
    fn missing_constructor_unregisters() {
        let table = DowncallTable::new(
            StaticSymbols::new("partial stub")
                .with::<SetProcsFn>("Counter_SetProcs", native_set_procs),
        );
        let arena = Arena::new();
        let listener: Arc<dyn Counter> = Arc::new(Doubler);
        let err = ManagedListener::<CounterKind>::create(&table, &arena, listener.clone()).unwrap_err();
        assert!(matches!(err, BridgeError::MissingSymbol { .. }));
        // Only the local clone remains: the registry held the listener weakly.
        assert_eq!(Arc::strong_count(&listener), 1);
    }

    #[test]
    fn native_references_pass_through() {
        let address = NonNull::new(0xdead0 as *mut c_void).unwrap();
        let native = ListenerRef::<CounterKind>::Native(NativeHandle::borrowed(address));
        assert_eq!(native.native_ptr(), address.as_ptr());
        assert!(native.listener().is_none());
        assert!(matches!(
            ListenerRef::<CounterKind>::resolve(address),
            Resolved::Native(_)
        ));
    }
}

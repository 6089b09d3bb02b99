//! Scoped ownership of native resources.
//!
//! An [`Arena`] remembers how to release every native address wrapped through it. Closing the
//! arena (explicitly or on drop) closes its child arenas first, then runs its own release
//! actions newest first. A failing action does not stop the rest of the teardown.

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::error::{panic_message, BridgeError, BridgeResult};
use super::handle::NativeHandle;
use super::layout::StructLayout;
use super::marshal::NativeStruct;
use super::value_view::ValueViewMut;

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// What to do with a native address when its owner lets go of it.
pub enum ReleaseAction {
    /// A native destructor taking the address.
    Native(unsafe extern "C" fn(*mut c_void)),
    /// Arbitrary Rust cleanup.
    Custom(Box<dyn FnOnce(NonNull<c_void>) -> BridgeResult<()> + Send>),
}

impl ReleaseAction {
    pub fn custom<F>(release: F) -> Self
    where
        F: FnOnce(NonNull<c_void>) -> BridgeResult<()> + Send + 'static,
    {
        ReleaseAction::Custom(Box::new(release))
    }

    /// Runs the action. Panics are caught and reported as [`BridgeError::ReleaseFailed`].
    pub(crate) fn run(self, address: NonNull<c_void>) -> BridgeResult<()> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || match self {
            ReleaseAction::Native(destroy) => {
                unsafe { destroy(address.as_ptr()) };
                Ok(())
            }
            ReleaseAction::Custom(release) => release(address),
        }));
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(BridgeError::ReleaseFailed {
                address: address.as_ptr() as usize,
                reason: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl fmt::Debug for ReleaseAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReleaseAction::Native(destroy) => write!(f, "Native({:p})", *destroy as *const ()),
            ReleaseAction::Custom(_) => write!(f, "Custom"),
        }
    }
}

pub(crate) struct Entry {
    sequence: u64,
    address: NonNull<c_void>,
    action: ReleaseAction,
}

#[derive(Default)]
struct ArenaState {
    closed: bool,
    next_sequence: u64,
    entries: Vec<Option<Entry>>,
    free_slots: Vec<usize>,
    children: Vec<Weak<ArenaShared>>,
}

/// State shared between an arena and the handles it produced.
pub(crate) struct ArenaShared {
    id: u64,
    state: Mutex<ArenaState>,
}

// SAFETY: entries only carry native addresses and `Send` release actions; every access goes
// through the mutex.
unsafe impl Send for ArenaShared {}
unsafe impl Sync for ArenaShared {}

impl ArenaShared {
    fn new() -> Self {
        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(ArenaState::default()),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, ArenaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the entry at `slot` if it is still the one registered under `sequence`.
    pub(crate) fn take(&self, slot: usize, sequence: u64) -> Option<Entry> {
        let mut state = self.lock();
        let matches = matches!(state.entries.get(slot), Some(Some(entry)) if entry.sequence == sequence);
        if !matches {
            return None;
        }
        let entry = state.entries[slot].take();
        state.free_slots.push(slot);
        entry
    }

    pub(crate) fn contains(&self, slot: usize, sequence: u64) -> bool {
        let state = self.lock();
        matches!(state.entries.get(slot), Some(Some(entry)) if entry.sequence == sequence)
    }

    fn close(&self, failures: &mut Vec<BridgeError>) {
        let (children, mut entries) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.free_slots.clear();
            let children = std::mem::take(&mut state.children);
            let entries: Vec<Entry> = state.entries.drain(..).flatten().collect();
            (children, entries)
        };

        // Children opened later close first.
        for child in children.iter().rev() {
            if let Some(child) = child.upgrade() {
                child.close(failures);
            }
        }

        entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        let count = entries.len();
        for entry in entries {
            if let Err(error) = entry.action.run(entry.address) {
                log::warn!("arena {}: {}", self.id, error);
                failures.push(error);
            }
        }
        log::trace!("arena {} closed, released {} handle(s)", self.id, count);
    }
}

impl Entry {
    #[inline(always)]
    pub(crate) fn release(self) -> BridgeResult<()> {
        self.action.run(self.address)
    }
}

/// Owner of a group of native resources.
pub struct Arena {
    shared: Arc<ArenaShared>,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ArenaShared::new()),
        }
    }

    /// Opens an arena that is closed before this one.
    pub fn child(&self) -> BridgeResult<Arena> {
        let child = Arena::new();
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BridgeError::ArenaClosed);
        }
        state.children.retain(|child| child.strong_count() > 0);
        state.children.push(Arc::downgrade(&child.shared));
        Ok(child)
    }

    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of handles registered here and not yet released or detached.
    pub fn live_handles(&self) -> usize {
        self.shared
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.is_some())
            .count()
    }

    /// Takes ownership of `address`, releasing it with `action` at the latest when the arena closes.
    pub fn wrap_owning(
        &self,
        address: NonNull<c_void>,
        action: ReleaseAction,
    ) -> BridgeResult<NativeHandle> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(BridgeError::ArenaClosed);
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let entry = Entry {
            sequence,
            address,
            action,
        };
        let slot = match state.free_slots.pop() {
            Some(slot) => {
                debug_assert!(state.entries[slot].is_none(), "Free slot must be empty.");
                state.entries[slot] = Some(entry);
                slot
            }
            None => {
                state.entries.push(Some(entry));
                state.entries.len() - 1
            }
        };
        Ok(NativeHandle::owned(
            address,
            Arc::downgrade(&self.shared),
            slot,
            sequence,
        ))
    }

    /// Like [`Arena::wrap_owning`] for a raw address returned by `symbol`; null is an error.
    pub fn adopt(
        &self,
        symbol: &str,
        address: *mut c_void,
        action: ReleaseAction,
    ) -> BridgeResult<NativeHandle> {
        let address = NonNull::new(address).ok_or_else(|| BridgeError::NullAddress {
            symbol: symbol.to_string(),
        })?;
        self.wrap_owning(address, action)
    }

    /// Allocates zeroed memory shaped by `layout`, freed when the handle is released.
    pub fn allocate(&self, layout: &'static StructLayout) -> BridgeResult<NativeHandle> {
        let failed = || BridgeError::AllocationFailed {
            layout: layout.name().to_string(),
            size: layout.size(),
            align: layout.align(),
        };
        let memory = Layout::from_size_align(layout.size().max(1), layout.align())
            .map_err(|_| failed())?;
        let pointer = unsafe { alloc::alloc_zeroed(memory) };
        let address = NonNull::new(pointer as *mut c_void).ok_or_else(failed)?;

        let free = ReleaseAction::custom(move |address| {
            unsafe { alloc::dealloc(address.as_ptr() as *mut u8, memory) };
            Ok(())
        });
        match self.wrap_owning(address, free) {
            Ok(handle) => Ok(handle),
            Err(error) => {
                unsafe { alloc::dealloc(pointer, memory) };
                Err(error)
            }
        }
    }

    /// Allocates native memory for `value` and copies it in.
    pub fn store<T: NativeStruct>(&self, value: &T) -> BridgeResult<NativeHandle> {
        let handle = self.allocate(T::layout())?;
        let stored = unsafe { ValueViewMut::from_ptr(T::layout(), handle.as_ptr()) }
            .and_then(|mut view| value.store(&mut view));
        if let Err(error) = stored {
            if let Err(release_error) = handle.release() {
                log::warn!("freeing unwritten {}: {}", T::layout().name(), release_error);
            }
            return Err(error);
        }
        Ok(handle)
    }

    /// Closes child arenas, then releases every live handle newest first.
    ///
    /// Closing twice is a no-op. Failures are collected into [`BridgeError::Teardown`].
    pub fn close(&self) -> BridgeResult<()> {
        let mut failures = Vec::new();
        self.shared.close(&mut failures);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Teardown(failures))
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.shared.id)
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            log::warn!("arena {} dropped with failures: {}", self.shared.id, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::layout::{FieldKind, LayoutBuilder};
    use crate::interop::value_view::ValueView;
    use glam::Vec3;
    use once_cell::sync::Lazy;
    use std::sync::atomic::AtomicUsize;

    fn fake_address(n: usize) -> NonNull<c_void> {
        NonNull::new((n * 16) as *mut c_void).unwrap()
    }

    fn logging(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> ReleaseAction {
        let log = log.clone();
        ReleaseAction::custom(move |_| {
            log.lock().unwrap().push(label);
            Ok(())
        })
    }

    #[test]
    fn nested_arenas_release_children_first_newest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parent = Arena::new();
        let c1 = parent.child().unwrap();
        let c2 = c1.child().unwrap();

        let _pa = parent.wrap_owning(fake_address(1), logging(&log, "pa")).unwrap();
        let _c1a = c1.wrap_owning(fake_address(2), logging(&log, "c1a")).unwrap();
        let _c2a = c2.wrap_owning(fake_address(3), logging(&log, "c2a")).unwrap();
        let _pb = parent.wrap_owning(fake_address(4), logging(&log, "pb")).unwrap();
        let _c1b = c1.wrap_owning(fake_address(5), logging(&log, "c1b")).unwrap();
        let _c2b = c2.wrap_owning(fake_address(6), logging(&log, "c2b")).unwrap();

        parent.close().unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["c2b", "c2a", "c1b", "c1a", "pb", "pa"]
        );
        assert!(c1.is_closed());
        assert!(c2.is_closed());

        // A second close, and the drops that follow, release nothing more.
        parent.close().unwrap();
        drop((c2, c1, parent));
        assert_eq!(log.lock().unwrap().len(), 6);
    }

    #[test]
    fn release_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let arena = Arena::new();
        let handle = arena.wrap_owning(fake_address(1), logging(&log, "a")).unwrap();
        assert_eq!(arena.live_handles(), 1);

        handle.release().unwrap();
        handle.release().unwrap();
        assert!(handle.is_released());
        assert_eq!(arena.live_handles(), 0);

        arena.close().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn stale_handle_does_not_release_reused_slot() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let arena = Arena::new();
        let first = arena.wrap_owning(fake_address(1), logging(&log, "first")).unwrap();
        first.release().unwrap();
        let second = arena.wrap_owning(fake_address(2), logging(&log, "second")).unwrap();

        first.release().unwrap();
        assert!(!second.is_released());
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn detach_skips_release() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let arena = Arena::new();
        let handle = arena.wrap_owning(fake_address(7), logging(&log, "x")).unwrap();
        let address = handle.detach();
        assert_eq!(address, fake_address(7));
        arena.close().unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn teardown_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let arena = Arena::new();
        arena.wrap_owning(fake_address(1), logging(&log, "a")).unwrap();
        arena
            .wrap_owning(
                fake_address(2),
                ReleaseAction::custom(|address| {
                    Err(BridgeError::ReleaseFailed {
                        address: address.as_ptr() as usize,
                        reason: "refused".into(),
                    })
                }),
            )
            .unwrap();
        arena
            .wrap_owning(
                fake_address(3),
                ReleaseAction::custom(|_| panic!("destructor blew up")),
            )
            .unwrap();
        arena.wrap_owning(fake_address(4), logging(&log, "d")).unwrap();

        match arena.close() {
            Err(BridgeError::Teardown(failures)) => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].to_string().contains("destructor blew up"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(*log.lock().unwrap(), vec!["d", "a"]);
    }

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_release(_: *mut c_void) {
        RELEASED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn native_release_action() {
        let arena = Arena::new();
        arena
            .wrap_owning(fake_address(1), ReleaseAction::Native(count_release))
            .unwrap();
        assert!(matches!(
            arena.adopt("JPC_Thing_new", std::ptr::null_mut(), ReleaseAction::Native(count_release)),
            Err(BridgeError::NullAddress { .. })
        ));
        drop(arena);
        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_arena_refuses_new_handles() {
        let arena = Arena::new();
        arena.close().unwrap();
        assert!(matches!(
            arena.wrap_owning(fake_address(1), ReleaseAction::custom(|_| Ok(()))),
            Err(BridgeError::ArenaClosed)
        ));
        assert!(matches!(arena.child(), Err(BridgeError::ArenaClosed)));
    }

    #[derive(Debug, PartialEq)]
    struct Sample {
        position: Vec3,
        count: u32,
    }

    static SAMPLE: Lazy<StructLayout> = Lazy::new(|| {
        LayoutBuilder::new("Sample")
            .field("position", FieldKind::Vec3)
            .field("count", FieldKind::U32)
            .build()
            .unwrap()
    });

    impl NativeStruct for Sample {
        fn layout() -> &'static StructLayout {
            &SAMPLE
        }

        fn store(&self, view: &mut ValueViewMut<'_>) -> BridgeResult<()> {
            view.set("position", self.position)?;
            view.set("count", self.count)
        }

        fn load(view: &ValueView<'_>) -> BridgeResult<Self> {
            Ok(Self {
                position: view.get("position")?,
                count: view.get("count")?,
            })
        }
    }

    #[test]
    fn allocate_store_and_load() {
        let arena = Arena::new();
        let zeroed = arena.allocate(&SAMPLE).unwrap();
        let view = unsafe { zeroed.view(&SAMPLE) }.unwrap();
        assert!(view.bytes().iter().all(|byte| *byte == 0));

        let sample = Sample {
            position: Vec3::new(1.0, 2.0, 3.0),
            count: 9,
        };
        let mut stored = arena.store(&sample).unwrap();
        assert_eq!(unsafe { stored.load::<Sample>() }.unwrap(), sample);

        unsafe { stored.view_mut(&SAMPLE) }
            .unwrap()
            .set("count", 10u32)
            .unwrap();
        assert_eq!(unsafe { stored.load::<Sample>() }.unwrap().count, 10);

        stored.release().unwrap();
        assert!(matches!(
            unsafe { stored.load::<Sample>() },
            Err(BridgeError::Released { .. })
        ));
        assert_eq!(arena.live_handles(), 1);
    }

    /// Writes a field its layout does not declare.
    struct Misdeclared;

    impl NativeStruct for Misdeclared {
        fn layout() -> &'static StructLayout {
            &SAMPLE
        }

        fn store(&self, view: &mut ValueViewMut<'_>) -> BridgeResult<()> {
            view.set("mass", 1.0f32)
        }

        fn load(_view: &ValueView<'_>) -> BridgeResult<Self> {
            Ok(Misdeclared)
        }
    }

    #[test]
    fn failed_store_frees_memory_and_keeps_the_marshalling_error() {
        let arena = Arena::new();
        let err = arena.store(&Misdeclared).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownField { .. }));
        assert_eq!(arena.live_handles(), 0);
    }
}

use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, Weak};

use crossbeam_utils::sync::ShardedLock;
use once_cell::sync::OnceCell;

use super::slot_table::{SlotTable, Token};
use crate::interop::config::{BridgeConfig, DanglingCallbackLog};
use crate::interop::error::panic_message;
use crate::interop::identity_cache::IdentityCache;

/// Token to listener table for one listener kind.
///
/// Listeners are held weakly; whoever registered one keeps it alive. Dispatch resolves the
/// token under a read lock and calls the listener after the lock is released, so callbacks may
/// arrive on any thread while other listeners register or retire.
pub struct UpcallRegistry<L: ?Sized> {
    kind: &'static str,
    slots: ShardedLock<SlotTable<Weak<L>>>,
    /// Native object address to the listener it calls.
    addresses: IdentityCache<L>,
    dangling_log: AtomicU8,
    /// Policy taken from the first configuration applied.
    configured_log: OnceCell<DanglingCallbackLog>,
    dangling_warned: AtomicBool,
    dangling: AtomicUsize,
}

impl<L: ?Sized> UpcallRegistry<L> {
    pub fn new(kind: &'static str) -> Self {
        Self::with_capacity(kind, 0)
    }

    pub fn with_capacity(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            slots: ShardedLock::new(SlotTable::new(capacity)),
            addresses: IdentityCache::with_capacity(capacity),
            dangling_log: AtomicU8::new(DanglingCallbackLog::default().to_raw()),
            configured_log: OnceCell::new(),
            dangling_warned: AtomicBool::new(false),
            dangling: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Grows the tables to the configured capacities and, the first time only, applies the
    /// dangling-callback policy.
    ///
    /// The registry is shared by every bridge in the process, so a later configuration asking
    /// for another policy is logged and ignored. [`UpcallRegistry::set_dangling_log`] still
    /// overrides it explicitly.
    pub fn configure(&self, config: &BridgeConfig) {
        let requested = config.dangling_callbacks;
        let applied = *self.configured_log.get_or_init(|| {
            self.set_dangling_log(requested);
            requested
        });
        if applied != requested {
            log::warn!(
                "{}: keeping dangling callback policy {:?}, ignoring {:?}",
                self.kind,
                applied,
                requested
            );
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let missing = config.registry_capacity.saturating_sub(slots.slot_count());
        slots.reserve(missing);
        drop(slots);
        let missing = config
            .identity_cache_capacity
            .saturating_sub(self.addresses.len());
        self.addresses.reserve(missing);
    }

    pub fn register(&self, listener: &Arc<L>) -> Token {
        let token = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Arc::downgrade(listener));
        log::trace!("{}: registered {}", self.kind, token);
        token
    }

    /// Retires `token`. Returns false if it was already retired.
    pub fn unregister(&self, token: Token) -> bool {
        let removed = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some();
        if removed {
            log::trace!("{}: retired {}", self.kind, token);
        }
        removed
    }

    /// The listener behind `token`, if it is registered and still alive.
    pub fn resolve(&self, token: Token) -> Option<Arc<L>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .and_then(Weak::upgrade)
    }

    /// Runs `call` on the listener behind `token`.
    ///
    /// Returns `None` when there is no token, when the token is retired or its listener is gone,
    /// and when the listener panics. None of these reach the caller as errors; they are logged
    /// according to the dangling-callback policy and at error level respectively.
    pub fn dispatch<R, F>(&self, token: Option<Token>, call: F) -> Option<R>
    where
        F: FnOnce(&L) -> R,
    {
        let Some(listener) = token.and_then(|token| self.resolve(token)) else {
            self.note_dangling(token);
            return None;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| call(&*listener))) {
            Ok(result) => Some(result),
            Err(payload) => {
                log::error!(
                    "{} listener panicked in a native callback: {}",
                    self.kind,
                    panic_message(payload.as_ref())
                );
                None
            }
        }
    }

    fn note_dangling(&self, token: Option<Token>) {
        self.dangling.fetch_add(1, Ordering::Relaxed);
        let describe = || match token {
            Some(token) => token.to_string(),
            None => "missing user data".to_string(),
        };
        match self.dangling_log() {
            DanglingCallbackLog::Silent => {}
            DanglingCallbackLog::Once => {
                if !self.dangling_warned.swap(true, Ordering::Relaxed) {
                    log::warn!(
                        "{}: callback for {} has no live listener; further ones are not logged",
                        self.kind,
                        describe()
                    );
                }
            }
            DanglingCallbackLog::Every => {
                log::warn!("{}: callback for {} has no live listener", self.kind, describe());
            }
        }
    }

    pub fn set_dangling_log(&self, policy: DanglingCallbackLog) {
        self.dangling_log.store(policy.to_raw(), Ordering::Relaxed);
    }

    pub fn dangling_log(&self) -> DanglingCallbackLog {
        DanglingCallbackLog::from_raw(self.dangling_log.load(Ordering::Relaxed))
    }

    /// Number of callbacks that found no live listener.
    pub fn dangling_dispatches(&self) -> usize {
        self.dangling.load(Ordering::Relaxed)
    }

    /// Records which listener the native object at `address` calls.
    pub fn bind_address(&self, address: NonNull<c_void>, listener: &Arc<L>) {
        self.addresses.insert(address, listener);
    }

    pub fn unbind_address(&self, address: NonNull<c_void>) -> bool {
        self.addresses.invalidate(address)
    }

    /// The listener behind a native object address received from native code.
    pub fn lookup_address(&self, address: NonNull<c_void>) -> Option<Arc<L>> {
        self.addresses.get(address)
    }

    /// Listener slots available before the token table reallocates.
    pub fn slot_capacity(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .capacity()
    }

    /// Number of registered tokens.
    pub fn live_count(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<L: ?Sized> fmt::Debug for UpcallRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("UpcallRegistry")
            .field("kind", &self.kind)
            .field("live", &self.live_count())
            .field("dangling", &self.dangling_dispatches())
            .finish()
    }
}

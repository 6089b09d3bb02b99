//! The interop layer: layouts, marshalling, handles, downcalls and upcalls.

pub mod arena;
pub mod config;
pub mod downcall;
pub mod error;
pub mod handle;
pub mod identity_cache;
pub mod layout;
pub mod marshal;
pub mod symbols;
pub mod upcall;
pub mod value_view;

use std::sync::Arc;

pub use arena::{Arena, ReleaseAction};
pub use config::{BridgeConfig, DanglingCallbackLog};
pub use downcall::{
    require_address, AbiArg, AbiReturn, AbiType, Downcall, DowncallTable, NativeArg, NativeFn,
    Signature,
};
pub use error::{BridgeError, BridgeResult, ErrorCategory};
pub use handle::NativeHandle;
pub use identity_cache::IdentityCache;
pub use layout::{FieldDesc, FieldKind, LayoutBuilder, StructLayout};
pub use marshal::{Address, NativeStruct, NativeValue};
pub use symbols::{LibrarySymbols, NativeSymbol, StaticSymbols, SymbolSource};
pub use upcall::{ListenerKind, ListenerRef, ManagedListener, Token, UpcallRegistry};
pub use value_view::{ValueView, ValueViewMut};

/// A connection to one native library: its downcall table and the settings applied to the
/// listener kinds used through it.
pub struct Bridge {
    config: BridgeConfig,
    downcalls: DowncallTable,
}

impl Bridge {
    pub fn new(source: impl SymbolSource + 'static) -> Self {
        Self::with_config(source, BridgeConfig::default())
    }

    pub fn with_config(source: impl SymbolSource + 'static, config: BridgeConfig) -> Self {
        Self {
            config,
            downcalls: DowncallTable::with_source(Box::new(source), config.require_signatures),
        }
    }

    /// Loads the native library at `path`.
    ///
    /// # Safety
    /// See [`LibrarySymbols::open`].
    pub unsafe fn open(path: &str, config: BridgeConfig) -> BridgeResult<Self> {
        Ok(Self::with_config(LibrarySymbols::open(path)?, config))
    }

    #[inline(always)]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[inline(always)]
    pub fn downcalls(&self) -> &DowncallTable {
        &self.downcalls
    }

    /// Creates a native listener object of kind `K` forwarding to `listener`.
    ///
    /// Listener registries are process-wide: the first bridge to create a listener of a kind
    /// sets that kind's dangling-callback policy.
    pub fn listener<K: ListenerKind>(
        &self,
        arena: &Arena,
        listener: Arc<K::Listener>,
    ) -> BridgeResult<ManagedListener<K>> {
        K::registry().configure(&self.config);
        ManagedListener::create(&self.downcalls, arena, listener)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("downcalls", &self.downcalls)
            .finish()
    }
}

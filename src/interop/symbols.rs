//! Where native function addresses come from.

use std::collections::HashMap;
use std::ffi::{c_void, OsStr};
use std::fmt;

use super::downcall::{NativeFn, Signature};
use super::error::{BridgeError, BridgeResult};

/// A symbol found in a [`SymbolSource`].
#[derive(Debug, Clone, Copy)]
pub struct NativeSymbol {
    pub address: *const c_void,
    /// Declared parameter and result classes, when the source knows them.
    pub signature: Option<Signature>,
}

/// A provider of native function addresses.
pub trait SymbolSource: Send + Sync {
    /// Human-readable name used in error messages.
    fn describe(&self) -> String;

    fn lookup(&self, name: &str) -> Option<NativeSymbol>;
}

/// In-process table of `extern "C"` functions, for statically linked natives and tests.
#[derive(Default)]
pub struct StaticSymbols {
    name: String,
    symbols: HashMap<String, (usize, Option<Signature>)>,
}

impl StaticSymbols {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Registers a typed function; its signature is recorded alongside it.
    pub fn with<F: NativeFn>(mut self, name: &str, function: F) -> Self {
        self.symbols.insert(
            name.to_string(),
            (function.to_address() as usize, Some(F::SIGNATURE)),
        );
        self
    }

    /// Registers a bare address with optional signature metadata.
    pub fn with_raw(
        mut self,
        name: &str,
        address: *const c_void,
        signature: Option<Signature>,
    ) -> Self {
        self.symbols
            .insert(name.to_string(), (address as usize, signature));
        self
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolSource for StaticSymbols {
    fn describe(&self) -> String {
        format!("static symbols `{}`", self.name)
    }

    fn lookup(&self, name: &str) -> Option<NativeSymbol> {
        self.symbols
            .get(name)
            .map(|(address, signature)| NativeSymbol {
                address: *address as *const c_void,
                signature: *signature,
            })
    }
}

impl fmt::Debug for StaticSymbols {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StaticSymbols")
            .field("name", &self.name)
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

/// Symbols exported by a shared library.
///
/// Shared libraries carry no signature metadata, so bindings are only checked against each other.
pub struct LibrarySymbols {
    /// Kept alive for as long as resolved addresses may be called.
    library: libloading::Library,
    description: String,
}

impl LibrarySymbols {
    pub fn from_library(library: libloading::Library, description: impl Into<String>) -> Self {
        Self {
            library,
            description: description.into(),
        }
    }

    /// Loads the shared library at `path`.
    ///
    /// # Safety
    /// Loading runs the library's initialisers; the library must be a trusted build of the
    /// native physics library and must not be replaced while loaded.
    pub unsafe fn open<P: AsRef<OsStr>>(path: P) -> BridgeResult<Self> {
        let path = path.as_ref();
        let library = libloading::Library::new(path).map_err(|e| BridgeError::LibraryLoad {
            path: path.to_string_lossy().into_owned(),
            reason: e.to_string(),
        })?;
        log::info!("loaded native library {}", path.to_string_lossy());
        Ok(Self::from_library(
            library,
            format!("library {}", path.to_string_lossy()),
        ))
    }
}

impl SymbolSource for LibrarySymbols {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn lookup(&self, name: &str) -> Option<NativeSymbol> {
        let symbol = unsafe { self.library.get::<*const c_void>(name.as_bytes()) }.ok()?;
        Some(NativeSymbol {
            address: *symbol,
            signature: None,
        })
    }
}

impl fmt::Debug for LibrarySymbols {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LibrarySymbols")
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn version() -> u32 {
        3
    }

    #[test]
    fn static_symbols_carry_signatures() {
        let symbols = StaticSymbols::new("stub")
            .with::<unsafe extern "C" fn() -> u32>("JPC_Version", version)
            .with_raw("JPC_Untyped", version as *const c_void, None);
        assert_eq!(symbols.len(), 2);

        let typed = symbols.lookup("JPC_Version").unwrap();
        assert_eq!(typed.address, version as *const c_void);
        assert_eq!(typed.signature.unwrap().to_string(), "fn() -> u32");
        assert!(symbols.lookup("JPC_Untyped").unwrap().signature.is_none());
        assert!(symbols.lookup("JPC_Missing").is_none());
        assert_eq!(symbols.describe(), "static symbols `stub`");
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let err = unsafe { LibrarySymbols::open("/nonexistent/libjoltc.so") }.unwrap_err();
        assert!(matches!(err, BridgeError::LibraryLoad { .. }));
        assert!(err.is_fatal());
    }
}

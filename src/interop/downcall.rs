//! Typed calls from Rust into native functions.
//!
//! A [`DowncallTable`] resolves each symbol once against a [`SymbolSource`] and checks the
//! binding's [`Signature`], derived from the Rust function pointer type, against whatever the
//! source declares for it. All checks happen when a [`Downcall`] is bound; calling one is a
//! plain indirect call.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::PoisonError;

use crossbeam_utils::sync::ShardedLock;

use super::error::{BridgeError, BridgeResult};
use super::handle::NativeHandle;
use super::symbols::SymbolSource;
use super::value_view::{ValueView, ValueViewMut};

/// Scalar classes the C ABI distinguishes in parameter and return position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiType {
    Void,
    Bool,
    U8,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            AbiType::Void => "void",
            AbiType::Bool => "bool",
            AbiType::U8 => "u8",
            AbiType::U16 => "u16",
            AbiType::I32 => "i32",
            AbiType::U32 => "u32",
            AbiType::I64 => "i64",
            AbiType::U64 => "u64",
            AbiType::F32 => "f32",
            AbiType::F64 => "f64",
            AbiType::Pointer => "pointer",
        };
        f.write_str(name)
    }
}

/// A type that may be passed to a native function by value.
pub trait AbiArg: Copy + 'static {
    const ABI: AbiType;
}

/// A type a native function may return.
pub trait AbiReturn: 'static {
    const ABI: AbiType;
}

macro_rules! impl_abi {
    ($($ty:ty => $abi:ident),* $(,)?) => {
        $(
            impl AbiArg for $ty {
                const ABI: AbiType = AbiType::$abi;
            }

            impl AbiReturn for $ty {
                const ABI: AbiType = AbiType::$abi;
            }
        )*
    };
}

impl_abi!(
    bool => Bool,
    u8 => U8,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl<T: 'static> AbiArg for *const T {
    const ABI: AbiType = AbiType::Pointer;
}

impl<T: 'static> AbiReturn for *const T {
    const ABI: AbiType = AbiType::Pointer;
}

impl<T: 'static> AbiArg for *mut T {
    const ABI: AbiType = AbiType::Pointer;
}

impl<T: 'static> AbiReturn for *mut T {
    const ABI: AbiType = AbiType::Pointer;
}

impl AbiReturn for () {
    const ABI: AbiType = AbiType::Void;
}

/// Something that can be passed where a native function takes an `A`.
///
/// Plain ABI values pass through unchanged. Handles and views lower to their address; a
/// released owning handle fails with [`BridgeError::Released`] instead of handing native code
/// a dangling pointer.
pub trait NativeArg<A: AbiArg> {
    fn to_native(self) -> BridgeResult<A>;
}

impl<A: AbiArg> NativeArg<A> for A {
    #[inline(always)]
    fn to_native(self) -> BridgeResult<A> {
        Ok(self)
    }
}

impl<T: 'static> NativeArg<*const T> for &NativeHandle {
    #[inline]
    fn to_native(self) -> BridgeResult<*const T> {
        Ok(self.checked_ptr()? as *const T)
    }
}

impl<T: 'static> NativeArg<*mut T> for &NativeHandle {
    #[inline]
    fn to_native(self) -> BridgeResult<*mut T> {
        Ok(self.checked_ptr()? as *mut T)
    }
}

impl<T: 'static> NativeArg<*const T> for &ValueView<'_> {
    #[inline(always)]
    fn to_native(self) -> BridgeResult<*const T> {
        Ok(self.as_ptr() as *const T)
    }
}

impl<T: 'static> NativeArg<*mut T> for &mut ValueViewMut<'_> {
    #[inline(always)]
    fn to_native(self) -> BridgeResult<*mut T> {
        Ok(self.as_mut_ptr() as *mut T)
    }
}

/// Parameter and result classes of a native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: &'static [AbiType],
    pub result: AbiType,
}

impl Signature {
    pub const fn new(params: &'static [AbiType], result: AbiType) -> Self {
        Self { params, result }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ") -> {}", self.result)
    }
}

/// An `unsafe extern "C" fn` pointer type whose signature is known at compile time.
///
/// # Safety
/// Implementors must be function pointers with the C calling convention, so that an address
/// of a native function with [`NativeFn::SIGNATURE`] may be reinterpreted as `Self`.
pub unsafe trait NativeFn: Copy + Send + Sync + 'static {
    const SIGNATURE: Signature;

    /// Reinterprets a native address as this function pointer type.
    ///
    /// # Safety
    /// `address` must be non-null and point to a function matching [`NativeFn::SIGNATURE`].
    unsafe fn from_address(address: *const c_void) -> Self;

    fn to_address(self) -> *const c_void;
}

macro_rules! impl_native_fn {
    ($($arg:ident $value:ident),*) => {
        unsafe impl<R: AbiReturn, $($arg: AbiArg),*> NativeFn for unsafe extern "C" fn($($arg),*) -> R {
            const SIGNATURE: Signature = Signature {
                params: &[$($arg::ABI),*],
                result: R::ABI,
            };

            #[inline(always)]
            unsafe fn from_address(address: *const c_void) -> Self {
                std::mem::transmute_copy(&address)
            }

            #[inline(always)]
            fn to_address(self) -> *const c_void {
                self as *const c_void
            }
        }

        impl<R: AbiReturn, $($arg: AbiArg),*> Downcall<unsafe extern "C" fn($($arg),*) -> R> {
            /// Calls the native function on the current thread.
            ///
            /// # Safety
            /// The arguments must satisfy the native function's contract.
            #[inline(always)]
            #[allow(non_snake_case, clippy::too_many_arguments)]
            pub unsafe fn call(&self, $($value: $arg),*) -> R {
                (self.function)($($value),*)
            }

            /// Like [`Downcall::call`], but also takes handles and views and checks that
            /// every handle is still live before calling.
            ///
            /// # Safety
            /// The arguments must satisfy the native function's contract.
            #[inline]
            #[allow(non_snake_case, clippy::too_many_arguments)]
            pub unsafe fn call_checked(&self, $($value: impl NativeArg<$arg>),*) -> BridgeResult<R> {
                $(let $value = $value.to_native()?;)*
                Ok((self.function)($($value),*))
            }
        }
    };
}

impl_native_fn!();
impl_native_fn!(A a);
impl_native_fn!(A a, B b);
impl_native_fn!(A a, B b, C c);
impl_native_fn!(A a, B b, C c, D d);
impl_native_fn!(A a, B b, C c, D d, E e);
impl_native_fn!(A a, B b, C c, D d, E e, G g);

/// A native function bound under its symbol name.
#[derive(Clone, Copy)]
pub struct Downcall<F> {
    symbol: &'static str,
    function: F,
}

impl<F: NativeFn> Downcall<F> {
    #[inline(always)]
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    #[inline(always)]
    pub fn function(&self) -> F {
        self.function
    }

    #[inline(always)]
    pub fn signature(&self) -> Signature {
        F::SIGNATURE
    }
}

impl<F: NativeFn> fmt::Debug for Downcall<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Downcall<{} @ {:p}: {}>",
            self.symbol,
            self.function.to_address(),
            F::SIGNATURE
        )
    }
}

/// Turns a null result of a native constructor into [`BridgeError::NullAddress`].
#[inline]
pub fn require_address(address: *mut c_void, symbol: &str) -> BridgeResult<NonNull<c_void>> {
    NonNull::new(address).ok_or_else(|| BridgeError::NullAddress {
        symbol: symbol.to_string(),
    })
}

#[derive(Debug, Clone, Copy)]
struct ResolvedSymbol {
    address: usize,
    signature: Signature,
}

/// Per-library cache of resolved symbols.
pub struct DowncallTable {
    source: Box<dyn SymbolSource>,
    require_signatures: bool,
    resolved: ShardedLock<HashMap<String, ResolvedSymbol>>,
    lookups: AtomicUsize,
}

impl DowncallTable {
    pub fn new(source: impl SymbolSource + 'static) -> Self {
        Self::with_source(Box::new(source), false)
    }

    pub fn with_source(source: Box<dyn SymbolSource>, require_signatures: bool) -> Self {
        Self {
            source,
            require_signatures,
            resolved: ShardedLock::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn source_name(&self) -> String {
        self.source.describe()
    }

    fn mismatch(symbol: &str, reason: String) -> BridgeError {
        BridgeError::SignatureMismatch {
            symbol: symbol.to_string(),
            reason,
        }
    }

    /// Resolves `symbol`, consulting the source only the first time.
    ///
    /// Fails when the symbol is missing, when the source declares a different signature, when
    /// an earlier resolution used a different signature, or when signatures are required and the
    /// source declares none.
    pub fn resolve(&self, symbol: &str, signature: &Signature) -> BridgeResult<*const c_void> {
        let cached = self
            .resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied();
        if let Some(cached) = cached {
            return Self::check_cached(symbol, &cached, signature);
        }

        self.lookups.fetch_add(1, Ordering::Relaxed);
        let native = self
            .source
            .lookup(symbol)
            .filter(|native| !native.address.is_null())
            .ok_or_else(|| BridgeError::MissingSymbol {
                symbol: symbol.to_string(),
                source_name: self.source.describe(),
            })?;
        match native.signature {
            Some(declared) if declared != *signature => {
                return Err(Self::mismatch(
                    symbol,
                    format!("native declares {}, binding expects {}", declared, signature),
                ));
            }
            None if self.require_signatures => {
                return Err(Self::mismatch(
                    symbol,
                    format!("{} carries no signature metadata", self.source.describe()),
                ));
            }
            _ => {}
        }

        let mut resolved = self.resolved.write().unwrap_or_else(PoisonError::into_inner);
        let entry = resolved
            .entry(symbol.to_string())
            .or_insert_with(|| ResolvedSymbol {
                address: native.address as usize,
                signature: *signature,
            });
        let entry = *entry;
        drop(resolved);
        log::debug!(
            "resolved `{}` at {:#x} as {}",
            symbol,
            entry.address,
            entry.signature
        );
        Self::check_cached(symbol, &entry, signature)
    }

    fn check_cached(
        symbol: &str,
        cached: &ResolvedSymbol,
        signature: &Signature,
    ) -> BridgeResult<*const c_void> {
        if cached.signature != *signature {
            return Err(Self::mismatch(
                symbol,
                format!(
                    "previously bound as {}, now requested as {}",
                    cached.signature, signature
                ),
            ));
        }
        Ok(cached.address as *const c_void)
    }

    /// Binds `symbol` as a function of type `F`.
    pub fn bind<F: NativeFn>(&self, symbol: &'static str) -> BridgeResult<Downcall<F>> {
        let address = self.resolve(symbol, &F::SIGNATURE)?;
        Ok(Downcall {
            symbol,
            function: unsafe { F::from_address(address) },
        })
    }

    /// Number of times the symbol source was consulted.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for DowncallTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DowncallTable")
            .field("source", &self.source.describe())
            .field("resolved", &self.resolved_count())
            .finish()
    }
}

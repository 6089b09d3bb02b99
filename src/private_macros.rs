/// Declares a struct of typed downcalls that are resolved together.
///
/// Every field is a [`Downcall`](crate::interop::Downcall) bound to the given symbol. The
/// generated `resolve` binds them all against a table and fails on the first missing or
/// mismatched symbol.
///
/// # Examples
/// ```
/// use rust_physics_bridge::native_bindings;
///
/// native_bindings! {
///     /// Lifetime of the native allocator.
///     pub struct CoreBindings {
///         register_default_allocator: "JPC_RegisterDefaultAllocator" => unsafe extern "C" fn(),
///         create_factory: "JPC_CreateFactory" => unsafe extern "C" fn() -> bool,
///     }
/// }
/// ```
#[macro_export]
macro_rules! native_bindings {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident : $symbol:literal => $function:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $crate::interop::Downcall<$function>,
            )*
        }

        impl $name {
            /// Binds every function of the set.
            pub fn resolve(
                table: &$crate::interop::DowncallTable,
            ) -> $crate::interop::BridgeResult<Self> {
                Ok(Self {
                    $($field: table.bind::<$function>($symbol)?,)*
                })
            }
        }
    };
}

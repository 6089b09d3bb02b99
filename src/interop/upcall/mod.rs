//! Calls from native code back into Rust.
//!
//! A listener kind pairs a Rust trait with a native callback interface. Each native listener
//! object created for a Rust listener carries a [`UserData`] holding the listener's generational
//! [`Token`]; the kind's trampolines read it back, resolve the listener through the kind's
//! [`UpcallRegistry`] and call it.

mod listener;
mod procs;
mod registry;
mod slot_table;

pub use listener::{ListenerRef, ManagedListener, Registration, Resolved};
pub use procs::{
    dispatch, install, CreateFn, DestroyFn, ListenerKind, ProcsInstallation, SetProcsFn, UserData,
};
pub use registry::UpcallRegistry;
pub use slot_table::{SlotTable, Token};

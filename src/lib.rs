//! Safe interop with a native physics library.
//!
//! The [`interop`] module carries the machinery: struct layouts and marshalling, arena-owned
//! native handles, typed downcalls, the identity cache and callback trampolines. The
//! [`physics`] module applies it to the native library's id types, contact structs and
//! listener interfaces.

#[macro_use]
mod private_macros;

pub mod interop;
pub mod physics;

pub use interop::{Arena, Bridge, BridgeConfig, BridgeError, BridgeResult, NativeHandle};

//! Bindings for the native physics library's ids, contact structs and listener interfaces.

pub mod callbacks;
pub mod handles;
pub mod layouts;

pub use handles::{BodyId, ObjectLayer, SubShapeId};

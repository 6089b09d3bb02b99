//! Listener interfaces of the native physics library.

mod body_activation_listener;
mod contact_listener;
mod object_layer_pair_filter;

#[cfg(test)]
pub(crate) mod native_stub;

pub use body_activation_listener::{
    BodyActivationListener, BodyActivationListenerKind, BodyActivationListenerProcs,
};
pub use contact_listener::{
    ContactListener, ContactListenerKind, ContactListenerProcs, ValidateResult,
};
pub use object_layer_pair_filter::{
    ObjectLayerPairFilter, ObjectLayerPairFilterKind, ObjectLayerPairFilterProcs,
};

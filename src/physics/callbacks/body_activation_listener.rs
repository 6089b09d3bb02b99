use std::ffi::c_void;

use once_cell::sync::Lazy;

use crate::interop::upcall::{dispatch, ListenerKind, ProcsInstallation, UpcallRegistry};
use crate::physics::handles::BodyId;

/// Notified when bodies go to sleep or wake up.
///
/// Called from the native simulation threads while the body is locked, so implementations must
/// not call back into the body interface.
pub trait BodyActivationListener: Send + Sync {
    fn on_body_activated(&self, body_id: BodyId, body_user_data: u64);

    fn on_body_deactivated(&self, body_id: BodyId, body_user_data: u64);
}

#[repr(C)]
pub struct BodyActivationListenerProcs {
    pub on_body_activated: unsafe extern "C" fn(*const c_void, BodyId, u64),
    pub on_body_deactivated: unsafe extern "C" fn(*const c_void, BodyId, u64),
}

unsafe extern "C" fn on_body_activated(user_data: *const c_void, body_id: BodyId, body_user_data: u64) {
    dispatch::<BodyActivationListenerKind, _, _>(user_data, |listener| {
        listener.on_body_activated(body_id, body_user_data)
    });
}

unsafe extern "C" fn on_body_deactivated(
    user_data: *const c_void,
    body_id: BodyId,
    body_user_data: u64,
) {
    dispatch::<BodyActivationListenerKind, _, _>(user_data, |listener| {
        listener.on_body_deactivated(body_id, body_user_data)
    });
}

static PROCS: BodyActivationListenerProcs = BodyActivationListenerProcs {
    on_body_activated,
    on_body_deactivated,
};

static REGISTRY: Lazy<UpcallRegistry<dyn BodyActivationListener>> =
    Lazy::new(|| UpcallRegistry::new(BodyActivationListenerKind::NAME));

static INSTALLATION: ProcsInstallation = ProcsInstallation::new();

pub struct BodyActivationListenerKind;

impl ListenerKind for BodyActivationListenerKind {
    type Listener = dyn BodyActivationListener;
    type Procs = BodyActivationListenerProcs;

    const NAME: &'static str = "BodyActivationListener";
    const SET_PROCS: &'static str = "JPC_BodyActivationListener_SetProcs";
    const CREATE: &'static str = "JPC_BodyActivationListener_new";
    const DESTROY: &'static str = "JPC_BodyActivationListener_delete";

    fn procs() -> &'static BodyActivationListenerProcs {
        &PROCS
    }

    fn registry() -> &'static UpcallRegistry<dyn BodyActivationListener> {
        &REGISTRY
    }

    fn installation() -> &'static ProcsInstallation {
        &INSTALLATION
    }
}

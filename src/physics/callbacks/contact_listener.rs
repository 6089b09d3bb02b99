//! Contact events from the native narrow phase.
//!
//! Native code passes contact data as pointers to its own structs. The trampolines marshal them
//! into the value types of [`crate::physics::layouts`], call the listener, and for added and
//! persisted contacts write the possibly modified [`ContactSettings`] back through the native
//! pointer.

use std::ffi::c_void;

use glam::DVec3;
use once_cell::sync::Lazy;

use crate::interop::marshal::{read_from_ptr, read_value_from_ptr, write_to_ptr};
use crate::interop::upcall::{dispatch, ListenerKind, ProcsInstallation, UpcallRegistry};
use crate::interop::BridgeResult;
use crate::physics::handles::BodyId;
use crate::physics::layouts::{CollideShapeResult, ContactManifold, ContactSettings, SubShapeIdPair};

/// Answer of [`ContactListener::on_contact_validate`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateResult {
    /// Accept this and any further contact points for the body pair.
    AcceptAllContactsForThisBodyPair = 0,
    /// Accept this contact only.
    AcceptContact = 1,
    /// Reject this contact only.
    RejectContact = 2,
    /// Reject this and any further contact points for the body pair.
    RejectAllContactsForThisBodyPair = 3,
}

/// Receives contact events. Called from native simulation threads.
pub trait ContactListener: Send + Sync {
    /// Called after detecting a collision between a body pair, before contact constraints are
    /// created. The default accepts every contact.
    fn on_contact_validate(
        &self,
        body1: BodyId,
        body2: BodyId,
        base_offset: DVec3,
        collision: &CollideShapeResult,
    ) -> ValidateResult {
        let _ = (body1, body2, base_offset, collision);
        ValidateResult::AcceptAllContactsForThisBodyPair
    }

    /// Called when a new contact point is detected. `settings` is written back to the native side.
    fn on_contact_added(
        &self,
        body1: BodyId,
        body2: BodyId,
        manifold: &ContactManifold,
        settings: &mut ContactSettings,
    ) {
        let _ = (body1, body2, manifold, settings);
    }

    /// Called when a contact point existed during the last step and still does.
    fn on_contact_persisted(
        &self,
        body1: BodyId,
        body2: BodyId,
        manifold: &ContactManifold,
        settings: &mut ContactSettings,
    ) {
        let _ = (body1, body2, manifold, settings);
    }

    /// Called when a contact point was detected during the last step but not this one.
    fn on_contact_removed(&self, pair: &SubShapeIdPair) {
        let _ = pair;
    }
}

#[repr(C)]
pub struct ContactListenerProcs {
    pub on_contact_validate:
        unsafe extern "C" fn(*const c_void, BodyId, BodyId, *const f64, *const c_void) -> u32,
    pub on_contact_added:
        unsafe extern "C" fn(*const c_void, BodyId, BodyId, *const c_void, *mut c_void),
    pub on_contact_persisted:
        unsafe extern "C" fn(*const c_void, BodyId, BodyId, *const c_void, *mut c_void),
    pub on_contact_removed: unsafe extern "C" fn(*const c_void, *const c_void),
}

fn report(callback: &str, result: BridgeResult<()>) {
    if let Err(error) = result {
        log::error!("ContactListener::{}: {}", callback, error);
    }
}

unsafe extern "C" fn on_contact_validate(
    user_data: *const c_void,
    body1: BodyId,
    body2: BodyId,
    base_offset: *const f64,
    collision: *const c_void,
) -> u32 {
    let fallback = ValidateResult::AcceptAllContactsForThisBodyPair;
    let base_offset = match read_value_from_ptr::<DVec3>(base_offset as *const c_void, "base_offset") {
        Ok(base_offset) => base_offset,
        Err(error) => {
            log::error!("ContactListener::on_contact_validate: {}", error);
            return fallback as u32;
        }
    };
    let collision = match read_from_ptr::<CollideShapeResult>(collision) {
        Ok(collision) => collision,
        Err(error) => {
            log::error!("ContactListener::on_contact_validate: {}", error);
            return fallback as u32;
        }
    };
    dispatch::<ContactListenerKind, _, _>(user_data, |listener| {
        listener.on_contact_validate(body1, body2, base_offset, &collision)
    })
    .unwrap_or(fallback) as u32
}

/// Shared path of added and persisted contacts: read both structs, run the listener, write the
/// settings back. Nothing is written if the listener did not run.
unsafe fn contact_with_settings<F>(
    user_data: *const c_void,
    manifold: *const c_void,
    settings: *mut c_void,
    call: F,
) -> BridgeResult<()>
where
    F: FnOnce(&dyn ContactListener, &ContactManifold, &mut ContactSettings),
{
    let manifold = read_from_ptr::<ContactManifold>(manifold)?;
    let mut values = read_from_ptr::<ContactSettings>(settings)?;
    let ran = dispatch::<ContactListenerKind, _, _>(user_data, |listener| {
        call(listener, &manifold, &mut values)
    });
    if ran.is_some() {
        write_to_ptr(&values, settings)?;
    }
    Ok(())
}

unsafe extern "C" fn on_contact_added(
    user_data: *const c_void,
    body1: BodyId,
    body2: BodyId,
    manifold: *const c_void,
    settings: *mut c_void,
) {
    let result = contact_with_settings(user_data, manifold, settings, |listener, manifold, settings| {
        listener.on_contact_added(body1, body2, manifold, settings)
    });
    report("on_contact_added", result);
}

unsafe extern "C" fn on_contact_persisted(
    user_data: *const c_void,
    body1: BodyId,
    body2: BodyId,
    manifold: *const c_void,
    settings: *mut c_void,
) {
    let result = contact_with_settings(user_data, manifold, settings, |listener, manifold, settings| {
        listener.on_contact_persisted(body1, body2, manifold, settings)
    });
    report("on_contact_persisted", result);
}

unsafe extern "C" fn on_contact_removed(user_data: *const c_void, pair: *const c_void) {
    let result = read_from_ptr::<SubShapeIdPair>(pair).map(|pair| {
        dispatch::<ContactListenerKind, _, _>(user_data, |listener| {
            listener.on_contact_removed(&pair)
        });
    });
    report("on_contact_removed", result);
}

static PROCS: ContactListenerProcs = ContactListenerProcs {
    on_contact_validate,
    on_contact_added,
    on_contact_persisted,
    on_contact_removed,
};

static REGISTRY: Lazy<UpcallRegistry<dyn ContactListener>> =
    Lazy::new(|| UpcallRegistry::new(ContactListenerKind::NAME));

static INSTALLATION: ProcsInstallation = ProcsInstallation::new();

pub struct ContactListenerKind;

impl ListenerKind for ContactListenerKind {
    type Listener = dyn ContactListener;
    type Procs = ContactListenerProcs;

    const NAME: &'static str = "ContactListener";
    const SET_PROCS: &'static str = "JPC_ContactListener_SetProcs";
    const CREATE: &'static str = "JPC_ContactListener_new";
    const DESTROY: &'static str = "JPC_ContactListener_delete";

    fn procs() -> &'static ContactListenerProcs {
        &PROCS
    }

    fn registry() -> &'static UpcallRegistry<dyn ContactListener> {
        &REGISTRY
    }

    fn installation() -> &'static ProcsInstallation {
        &INSTALLATION
    }
}

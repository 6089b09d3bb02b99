use std::ffi::c_void;

use once_cell::sync::Lazy;

use crate::interop::upcall::{dispatch, ListenerKind, ProcsInstallation, UpcallRegistry};
use crate::physics::handles::ObjectLayer;

/// Decides whether objects on two layers may collide.
pub trait ObjectLayerPairFilter: Send + Sync {
    fn should_collide(&self, layer1: ObjectLayer, layer2: ObjectLayer) -> bool;
}

/// Native trampolines for [`ObjectLayerPairFilter`].
#[repr(C)]
pub struct ObjectLayerPairFilterProcs {
    pub should_collide: unsafe extern "C" fn(*const c_void, ObjectLayer, ObjectLayer) -> bool,
}

unsafe extern "C" fn should_collide(
    user_data: *const c_void,
    layer1: ObjectLayer,
    layer2: ObjectLayer,
) -> bool {
    // Without a listener, keep the native default of colliding everything.
    dispatch::<ObjectLayerPairFilterKind, _, _>(user_data, |filter| {
        filter.should_collide(layer1, layer2)
    })
    .unwrap_or(true)
}

static PROCS: ObjectLayerPairFilterProcs = ObjectLayerPairFilterProcs { should_collide };

static REGISTRY: Lazy<UpcallRegistry<dyn ObjectLayerPairFilter>> =
    Lazy::new(|| UpcallRegistry::new(ObjectLayerPairFilterKind::NAME));

static INSTALLATION: ProcsInstallation = ProcsInstallation::new();

pub struct ObjectLayerPairFilterKind;

impl ListenerKind for ObjectLayerPairFilterKind {
    type Listener = dyn ObjectLayerPairFilter;
    type Procs = ObjectLayerPairFilterProcs;

    const NAME: &'static str = "ObjectLayerPairFilter";
    const SET_PROCS: &'static str = "JPC_ObjectLayerPairFilter_SetProcs";
    const CREATE: &'static str = "JPC_ObjectLayerPairFilter_new";
    const DESTROY: &'static str = "JPC_ObjectLayerPairFilter_delete";

    fn procs() -> &'static ObjectLayerPairFilterProcs {
        &PROCS
    }

    fn registry() -> &'static UpcallRegistry<dyn ObjectLayerPairFilter> {
        &REGISTRY
    }

    fn installation() -> &'static ProcsInstallation {
        &INSTALLATION
    }
}
